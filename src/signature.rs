//! Deduplication signatures for the two fetch channels.

use std::fmt;

use serde_json::json;

use crate::normalize::CanonicalQuery;
use crate::params::QueryParameters;
use crate::time::format_timestamp;

/// The two independent fetch lanes driven by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
	/// Paginated row search.
	Page,
	/// Time-bucketed histogram.
	Distribution,
}

impl Channel {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Page => "page",
			Self::Distribution => "distribution",
		}
	}
}

impl fmt::Display for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Deterministic identity of a request on one channel. Equal signatures mean
/// the requests are duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature(String);

impl RequestSignature {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RequestSignature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Build the signature of `params` on `channel`.
///
/// Only the page channel includes the offset. The key is rendered as compact
/// JSON with sorted object keys, prefixed by the channel name.
pub fn build_signature(channel: Channel, params: &QueryParameters) -> RequestSignature {
	let canonical = CanonicalQuery::from(params);
	let mut key = json!({
		"datasource": canonical.datasource,
		"table": canonical.table,
		"keyword": canonical.keyword,
		"sql": canonical.sql_filter,
		"start": canonical.start.as_ref().map(format_timestamp),
		"end": canonical.end.as_ref().map(format_timestamp),
		"grouping": canonical.time_grouping.as_str(),
		"fields": canonical.fields,
	});
	if channel == Channel::Page {
		key["offset"] = json!(params.offset);
	}
	RequestSignature(format!("{channel}:{key}"))
}
