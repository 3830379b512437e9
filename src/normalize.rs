//! Canonical view of query parameters.
//!
//! [`CanonicalQuery`] keeps only the fields that decide which rows a query
//! returns, in a form where cosmetic differences disappear: the keyword is
//! trimmed, SQL whitespace is collapsed and the field list is sorted. The
//! same form backs [`has_substantive_change`] and request signatures, so the
//! two can never disagree about whether two queries are the same.

use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::params::QueryParameters;
use crate::time::TimeGrouping;

/// Identity-bearing subset of [`QueryParameters`]. Offset and page size are
/// deliberately absent: they move a cursor within a result set, they do not
/// pick a different one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalQuery {
	pub datasource: String,
	pub table: String,
	pub keyword: String,
	pub sql_filter: String,
	pub start: Option<NaiveDateTime>,
	pub end: Option<NaiveDateTime>,
	pub time_grouping: TimeGrouping,
	pub fields: Vec<String>,
}

impl From<&QueryParameters> for CanonicalQuery {
	fn from(params: &QueryParameters) -> Self {
		Self {
			datasource: params.datasource.trim().to_string(),
			table: params.table.trim().to_string(),
			keyword: params.keyword.trim().to_string(),
			sql_filter: collapse_whitespace(&params.sql_filter),
			start: params.start,
			end: params.end,
			time_grouping: params.time_grouping,
			fields: sorted_fields(&params.fields),
		}
	}
}

/// Whether moving from `previous` to `next` starts a new result set.
///
/// Returns `true` when there is no previous query. Offset and page size never
/// count as a change; the field list is compared as a set of names.
pub fn has_substantive_change(previous: Option<&QueryParameters>, next: &QueryParameters) -> bool {
	let Some(previous) = previous else {
		return true;
	};
	let before = CanonicalQuery::from(previous);
	let after = CanonicalQuery::from(next);

	before.datasource != after.datasource
		|| before.table != after.table
		|| before.keyword != after.keyword
		|| before.sql_filter != after.sql_filter
		|| before.start != after.start
		|| before.end != after.end
		|| before.time_grouping != after.time_grouping
		|| !same_field_set(&before.fields, &after.fields)
}

/// Compare two already sorted field lists: length first, then element-wise.
fn same_field_set(left: &[String], right: &[String]) -> bool {
	left.len() == right.len() && left.iter().zip(right).all(|(a, b)| a == b)
}

fn sorted_fields(fields: &[String]) -> Vec<String> {
	let mut sorted: Vec<String> = fields.iter().map(|field| field.trim().to_string()).collect();
	sorted.sort_unstable();
	sorted
}

/// Trim and squeeze every whitespace run to a single space.
pub fn collapse_whitespace(text: &str) -> String {
	text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Combine several SQL conditions into one filter clause.
///
/// Clauses that only differ in whitespace are kept once (first spelling
/// wins). With more than one clause left, each is parenthesised and the
/// results are joined with `AND`.
pub fn merge_where_clauses<I, S>(clauses: I) -> String
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut seen = HashSet::new();
	let unique: Vec<String> = clauses
		.into_iter()
		.filter_map(|clause| {
			let clause = clause.as_ref().trim();
			let key: String = clause.chars().filter(|c| !c.is_whitespace()).collect();
			(!key.is_empty() && seen.insert(key)).then(|| clause.to_string())
		})
		.collect();

	match unique.as_slice() {
		[] => String::new(),
		[single] => single.clone(),
		many => many
			.iter()
			.map(|clause| format!("({clause})"))
			.collect::<Vec<_>>()
			.join(" AND "),
	}
}
