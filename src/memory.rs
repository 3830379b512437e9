//! In-process log store implementing both source traits.
//!
//! Backs the `logq` binary and the integration tests. Records are grouped by
//! `(datasource, table)` and filtered on every call, so it is only meant for
//! data that fits comfortably in memory.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::params::{DistributionQuery, QueryParameters};
use crate::source::{DistributionSource, FetchContext, PageResponse, PageSource, Record};
use crate::time::{TimeGrouping, format_timestamp, parse_timestamp};

/// Field holding each record's timestamp unless configured otherwise.
pub const DEFAULT_TIME_FIELD: &str = "log_time";

type TableKey = (String, String);

#[derive(Debug, Clone)]
pub struct MemorySource {
	tables: HashMap<TableKey, Vec<Record>>,
	time_field: String,
	latency: Duration,
}

impl Default for MemorySource {
	fn default() -> Self {
		Self::new()
	}
}

impl MemorySource {
	pub fn new() -> Self {
		Self {
			tables: HashMap::new(),
			time_field: DEFAULT_TIME_FIELD.to_string(),
			latency: Duration::ZERO,
		}
	}

	/// Load records from a JSON array or a JSON-lines file.
	///
	/// Records may name their own `datasource` and `table`; the defaults are
	/// used otherwise. Both keys are removed from the stored record.
	pub fn from_path(path: &Path, datasource: &str, table: &str) -> Result<Self> {
		let text = fs::read_to_string(path)
			.with_context(|| format!("failed to read log records from {}", path.display()))?;
		let values = parse_records(&text)
			.with_context(|| format!("failed to parse log records in {}", path.display()))?;

		let mut source = Self::new();
		let count = values.len();
		for (index, value) in values.into_iter().enumerate() {
			let Value::Object(mut record) = value else {
				bail!("record {} in {} is not a JSON object", index + 1, path.display());
			};
			let datasource = take_string(&mut record, "datasource").unwrap_or_else(|| datasource.to_string());
			let table = take_string(&mut record, "table").unwrap_or_else(|| table.to_string());
			source.insert(datasource, table, record);
		}
		info!(path = %path.display(), records = count, tables = source.tables.len(), "loaded log records");
		Ok(source)
	}

	#[must_use]
	pub fn with_time_field(mut self, field: impl Into<String>) -> Self {
		self.time_field = field.into();
		self
	}

	/// Sleep this long inside every fetch. Used to exercise superseding.
	#[must_use]
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = latency;
		self
	}

	pub fn time_field(&self) -> &str {
		&self.time_field
	}

	pub fn insert(&mut self, datasource: impl Into<String>, table: impl Into<String>, record: Record) {
		self.tables
			.entry((datasource.into(), table.into()))
			.or_default()
			.push(record);
	}

	pub fn extend<I>(&mut self, datasource: &str, table: &str, records: I)
	where
		I: IntoIterator<Item = Record>,
	{
		self.tables
			.entry((datasource.to_string(), table.to_string()))
			.or_default()
			.extend(records);
	}

	/// Number of records stored for one table.
	pub fn len(&self, datasource: &str, table: &str) -> usize {
		self.tables
			.get(&(datasource.to_string(), table.to_string()))
			.map_or(0, Vec::len)
	}

	pub fn is_empty(&self) -> bool {
		self.tables.values().all(Vec::is_empty)
	}

	fn simulate_latency(&self, context: &FetchContext) -> Result<()> {
		if !self.latency.is_zero() {
			thread::sleep(self.latency);
		}
		if context.is_superseded() {
			bail!("request {} was superseded", context.ticket());
		}
		Ok(())
	}

	/// Records of one table matching the bounds, keyword and filter.
	fn matching<'a>(&'a self, filter: &Filter<'_>) -> Result<Vec<(Option<NaiveDateTime>, &'a Record)>> {
		let key = (filter.datasource.to_string(), filter.table.to_string());
		let Some(records) = self.tables.get(&key) else {
			bail!("unknown table `{}` in datasource `{}`", filter.table, filter.datasource);
		};
		let conditions = parse_conditions(filter.sql_filter)?;
		let keyword = filter.keyword.trim().to_lowercase();

		Ok(records
			.iter()
			.map(|record| (self.timestamp_of(record), record))
			.filter(|(at, _)| within(*at, filter.start, filter.end))
			.filter(|(_, record)| keyword.is_empty() || contains_keyword(record, &keyword))
			.filter(|(_, record)| {
				conditions
					.iter()
					.all(|(field, expected)| record.get(*field).is_some_and(|v| render(v) == *expected))
			})
			.collect())
	}

	fn timestamp_of(&self, record: &Record) -> Option<NaiveDateTime> {
		record
			.get(&self.time_field)
			.and_then(Value::as_str)
			.and_then(parse_timestamp)
	}

	fn project(&self, record: &Record, fields: &[String]) -> Record {
		if fields.is_empty() {
			return record.clone();
		}
		record
			.iter()
			.filter(|(name, _)| **name == self.time_field || fields.contains(name))
			.map(|(name, value)| (name.clone(), value.clone()))
			.collect()
	}

	fn columns(&self, rows: &[Record], fields: &[String]) -> Vec<String> {
		let rest: BTreeSet<&String> = if fields.is_empty() {
			rows.iter().flat_map(Record::keys).collect()
		} else {
			fields.iter().collect()
		};
		std::iter::once(self.time_field.clone())
			.chain(rest.into_iter().filter(|name| **name != self.time_field).cloned())
			.collect()
	}
}

impl PageSource for MemorySource {
	fn fetch_page(&self, params: &QueryParameters, context: &FetchContext) -> Result<PageResponse> {
		let started = Instant::now();
		self.simulate_latency(context)?;

		let mut matching = self.matching(&Filter {
			datasource: &params.datasource,
			table: &params.table,
			keyword: &params.keyword,
			sql_filter: &params.sql_filter,
			start: params.start,
			end: params.end,
		})?;
		// Newest first; records without a timestamp sink to the end.
		matching.sort_by(|(a, _), (b, _)| b.cmp(a));

		let total = matching.len();
		let rows: Vec<Record> = matching
			.into_iter()
			.skip(params.offset)
			.take(params.page_size)
			.map(|(_, record)| self.project(record, &params.fields))
			.collect();
		debug!(offset = params.offset, returned = rows.len(), total, "served page");

		Ok(PageResponse {
			columns: self.columns(&rows, &params.fields),
			rows,
			total_count: total as u64,
			execution_time_ms: elapsed_millis(started),
			success: true,
			error_message: None,
		})
	}
}

impl DistributionSource for MemorySource {
	fn fetch_distribution(&self, query: &DistributionQuery, context: &FetchContext) -> Result<Value> {
		self.simulate_latency(context)?;
		let (Some(start), Some(end)) = (query.start, query.end) else {
			bail!("a histogram needs both time bounds");
		};
		let grouping = query.time_grouping.resolve(end - start);

		let matching = self.matching(&Filter {
			datasource: &query.datasource,
			table: &query.table,
			keyword: &query.keyword,
			sql_filter: &query.sql_filter,
			start: Some(start),
			end: Some(end),
		})?;
		let mut buckets: BTreeMap<NaiveDateTime, u64> = BTreeMap::new();
		for at in matching.into_iter().filter_map(|(at, _)| at) {
			*buckets.entry(grouping.truncate(at)).or_default() += 1;
		}

		let points: Vec<Value> = buckets
			.into_iter()
			.map(|(at, count)| json!({ "timePoint": format_timestamp(&at), "count": count }))
			.collect();
		Ok(json!({
			"distributionData": [{
				"distributionData": points,
				"timeUnit": grouping.as_str(),
				"timeInterval": 1,
			}]
		}))
	}
}

struct Filter<'a> {
	datasource: &'a str,
	table: &'a str,
	keyword: &'a str,
	sql_filter: &'a str,
	start: Option<NaiveDateTime>,
	end: Option<NaiveDateTime>,
}

fn parse_records(text: &str) -> Result<Vec<Value>> {
	if text.trim_start().starts_with('[') {
		return serde_json::from_str(text).context("invalid JSON array");
	}
	text.lines()
		.enumerate()
		.filter(|(_, line)| !line.trim().is_empty())
		.map(|(index, line)| {
			serde_json::from_str(line).with_context(|| format!("invalid JSON on line {}", index + 1))
		})
		.collect()
}

fn take_string(record: &mut Record, key: &str) -> Option<String> {
	match record.remove(key)? {
		Value::String(value) => Some(value),
		other => {
			record.insert(key.to_string(), other);
			None
		}
	}
}

/// Start is inclusive, end exclusive. Records without a timestamp only pass
/// when no bound is set.
fn within(at: Option<NaiveDateTime>, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> bool {
	if start.is_none() && end.is_none() {
		return true;
	}
	at.is_some_and(|at| start.is_none_or(|start| at >= start) && end.is_none_or(|end| at < end))
}

fn contains_keyword(record: &Record, keyword: &str) -> bool {
	record
		.values()
		.any(|value| render(value).to_lowercase().contains(keyword))
}

fn render(value: &Value) -> String {
	match value {
		Value::String(text) => text.clone(),
		other => other.to_string(),
	}
}

/// Parse `field = 'value'` conditions joined by `AND`. Parentheses are
/// ignored; anything else is rejected.
fn parse_conditions(sql: &str) -> Result<Vec<(&str, String)>> {
	let mut conditions = Vec::new();
	for clause in split_and(sql) {
		let clause = clause.trim_matches(|c: char| c.is_whitespace() || c == '(' || c == ')');
		if clause.is_empty() {
			continue;
		}
		let Some((field, value)) = clause.split_once('=') else {
			bail!("unsupported filter clause `{clause}`");
		};
		let field = field.trim();
		let value = value.trim();
		let is_identifier = !field.is_empty()
			&& field
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
		let quoted = value
			.strip_prefix('\'')
			.and_then(|rest| rest.strip_suffix('\''))
			.filter(|inner| !inner.contains('\''));
		match (is_identifier, quoted) {
			(true, Some(inner)) => conditions.push((field, inner.to_string())),
			_ => bail!("unsupported filter clause `{clause}`"),
		}
	}
	Ok(conditions)
}

fn split_and(sql: &str) -> Vec<&str> {
	let lower = sql.to_ascii_lowercase();
	let mut parts = Vec::new();
	let mut rest = 0;
	while let Some(found) = lower[rest..].find(" and ") {
		parts.push(&sql[rest..rest + found]);
		rest += found + " and ".len();
	}
	parts.push(&sql[rest..]);
	parts
}

fn elapsed_millis(started: Instant) -> u64 {
	u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use tempfile::NamedTempFile;

	use super::*;
	use crate::accumulator::parse_distribution;

	fn record(at: &str, level: &str, message: &str) -> Record {
		let Value::Object(record) = json!({ "log_time": at, "level": level, "message": message }) else {
			unreachable!()
		};
		record
	}

	fn source() -> MemorySource {
		let mut source = MemorySource::new();
		source.extend(
			"ds1",
			"t1",
			[
				record("2025-01-01 00:00:10", "info", "service started"),
				record("2025-01-01 00:00:40", "error", "Connection Timeout"),
				record("2025-01-01 00:01:30", "warn", "slow query"),
				record("2025-01-01 00:59:59", "error", "disk full"),
				record("2025-01-01 01:00:00", "info", "outside the range"),
			],
		);
		source
	}

	fn params() -> QueryParameters {
		QueryParameters::new("ds1", "t1").with_time_range(
			parse_timestamp("2025-01-01 00:00:00").unwrap(),
			parse_timestamp("2025-01-01 01:00:00").unwrap(),
		)
	}

	fn messages(page: &PageResponse) -> Vec<&str> {
		page.rows
			.iter()
			.map(|row| row["message"].as_str().unwrap())
			.collect()
	}

	#[test]
	fn pages_newest_first_within_bounds() {
		let source = source();
		let page = source
			.fetch_page(&params().with_page_size(2), &FetchContext::detached())
			.unwrap();
		assert_eq!(page.total_count, 4);
		assert_eq!(messages(&page), ["disk full", "slow query"]);

		let next = source
			.fetch_page(&params().with_page_size(2).with_offset(2), &FetchContext::detached())
			.unwrap();
		assert_eq!(messages(&next), ["Connection Timeout", "service started"]);
	}

	#[test]
	fn keyword_matches_any_value_case_insensitively() {
		let page = source()
			.fetch_page(&params().with_keyword("timeout"), &FetchContext::detached())
			.unwrap();
		assert_eq!(messages(&page), ["Connection Timeout"]);
	}

	#[test]
	fn equality_filters_are_conjunctive() {
		let source = source();
		let page = source
			.fetch_page(
				&params().with_sql_filter("(level = 'error') AND (message = 'disk full')"),
				&FetchContext::detached(),
			)
			.unwrap();
		assert_eq!(messages(&page), ["disk full"]);

		let err = source
			.fetch_page(&params().with_sql_filter("level LIKE 'err%'"), &FetchContext::detached())
			.unwrap_err();
		assert!(err.to_string().contains("unsupported filter clause"));
	}

	#[test]
	fn projection_keeps_the_time_field() {
		let page = source()
			.fetch_page(&params().with_fields(["level"]), &FetchContext::detached())
			.unwrap();
		assert_eq!(page.columns, ["log_time", "level"]);
		assert!(page.rows.iter().all(|row| row.len() == 2));
	}

	#[test]
	fn unknown_tables_fail() {
		let err = source()
			.fetch_page(&QueryParameters::new("ds1", "missing"), &FetchContext::detached())
			.unwrap_err();
		assert!(err.to_string().contains("unknown table"));
	}

	#[test]
	fn histogram_buckets_by_resolved_grouping() {
		let raw = source()
			.fetch_distribution(&params().distribution_query(), &FetchContext::detached())
			.unwrap();
		let distribution = parse_distribution(&raw).unwrap();

		assert_eq!(distribution.time_unit.as_deref(), Some("minute"));
		let counts: Vec<(&str, u64)> = distribution
			.buckets
			.iter()
			.map(|bucket| (bucket.time_point.as_str(), bucket.count))
			.collect();
		assert_eq!(
			counts,
			[
				("2025-01-01 00:00:00", 2),
				("2025-01-01 00:01:00", 1),
				("2025-01-01 00:59:00", 1),
			]
		);
	}

	#[test]
	fn loads_json_lines_with_per_record_tables() {
		let mut file = NamedTempFile::new().unwrap();
		writeln!(file, r#"{{"log_time": "2025-01-01 00:00:01", "message": "a"}}"#).unwrap();
		writeln!(file).unwrap();
		writeln!(
			file,
			r#"{{"log_time": "2025-01-01 00:00:02", "message": "b", "datasource": "ds2", "table": "audit"}}"#
		)
		.unwrap();

		let source = MemorySource::from_path(file.path(), "ds1", "t1").unwrap();
		assert_eq!(source.len("ds1", "t1"), 1);
		assert_eq!(source.len("ds2", "audit"), 1);

		let page = source
			.fetch_page(&QueryParameters::new("ds2", "audit"), &FetchContext::detached())
			.unwrap();
		assert!(page.rows[0].get("table").is_none());
	}

	#[test]
	fn loads_json_arrays_and_rejects_non_objects() {
		let mut file = NamedTempFile::new().unwrap();
		write!(file, r#"[{{"log_time": "2025-01-01 00:00:01"}}, {{"log_time": "2025-01-01 00:00:02"}}]"#).unwrap();
		let source = MemorySource::from_path(file.path(), "ds1", "t1").unwrap();
		assert_eq!(source.len("ds1", "t1"), 2);

		let mut bad = NamedTempFile::new().unwrap();
		write!(bad, "[1, 2]").unwrap();
		let err = MemorySource::from_path(bad.path(), "ds1", "t1").unwrap_err();
		assert!(err.to_string().contains("not a JSON object"));
	}
}
