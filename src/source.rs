//! Fetch operations supplied by the consumer, and their wire types.
//!
//! Sources are called on worker threads, one call per issued request. They
//! own their timeouts; the coordinator only cares whether a call ended with a
//! value or an error.

use logq_stream::TicketClock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::params::{DistributionQuery, QueryParameters};

/// One opaque log record as delivered by a source.
pub type Record = Map<String, Value>;

/// Per-call context handed to a source.
#[derive(Debug, Clone)]
pub struct FetchContext {
	ticket: u64,
	clock: Option<TicketClock>,
}

impl FetchContext {
	pub(crate) fn new(ticket: u64, clock: TicketClock) -> Self {
		Self {
			ticket,
			clock: Some(clock),
		}
	}

	/// Context for calling a source directly, outside the coordinator.
	pub fn detached() -> Self {
		Self {
			ticket: 0,
			clock: None,
		}
	}

	pub fn ticket(&self) -> u64 {
		self.ticket
	}

	/// Whether a newer request was issued on the same channel. The result of
	/// a superseded call is discarded, so sources may stop early.
	pub fn is_superseded(&self) -> bool {
		self.clock
			.as_ref()
			.is_some_and(|clock| clock.is_superseded(self.ticket))
	}
}

/// Paginated row search.
pub trait PageSource: Send + Sync {
	fn fetch_page(&self, params: &QueryParameters, context: &FetchContext) -> anyhow::Result<PageResponse>;
}

/// Histogram query. The raw JSON is validated by the coordinator so that a
/// malformed answer degrades to an empty histogram instead of an error.
pub trait DistributionSource: Send + Sync {
	fn fetch_distribution(&self, query: &DistributionQuery, context: &FetchContext) -> anyhow::Result<Value>;
}

/// Response of one page search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageResponse {
	pub rows: Vec<Record>,
	pub total_count: u64,
	pub columns: Vec<String>,
	pub execution_time_ms: u64,
	/// A source may answer with `success: false` instead of failing the call.
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_message: Option<String>,
}

impl PageResponse {
	pub fn new(rows: Vec<Record>, total_count: u64) -> Self {
		Self {
			rows,
			total_count,
			..Self::default()
		}
	}

	/// Response reporting a server-side failure.
	pub fn failure(message: impl Into<String>) -> Self {
		Self {
			success: false,
			error_message: Some(message.into()),
			..Self::default()
		}
	}
}

impl Default for PageResponse {
	fn default() -> Self {
		Self {
			rows: Vec::new(),
			total_count: 0,
			columns: Vec::new(),
			execution_time_ms: 0,
			success: true,
			error_message: None,
		}
	}
}

/// One histogram bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionBucket {
	pub time_point: String,
	pub count: u64,
}

/// Ordered histogram, replaced as a whole on every successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
	pub buckets: Vec<DistributionBucket>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub time_unit: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub time_interval: Option<u64>,
}

impl Distribution {
	pub fn is_empty(&self) -> bool {
		self.buckets.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn page_response_defaults_to_success() {
		let response: PageResponse = serde_json::from_value(json!({
			"rows": [{"message": "hello"}],
			"totalCount": 1,
		}))
		.unwrap();
		assert!(response.success);
		assert_eq!(response.rows.len(), 1);
		assert_eq!(response.total_count, 1);
	}

	#[test]
	fn page_response_reads_server_failure() {
		let response: PageResponse = serde_json::from_value(json!({
			"success": false,
			"errorMessage": "table not found",
		}))
		.unwrap();
		assert_eq!(response, PageResponse::failure("table not found"));
	}

	#[test]
	fn detached_context_is_never_superseded() {
		assert!(!FetchContext::detached().is_superseded());
	}

	#[test]
	fn context_follows_the_shared_clock() {
		let clock = TicketClock::new();
		let context = FetchContext::new(clock.issue(), clock.clone());
		assert!(!context.is_superseded());
		clock.issue();
		assert!(context.is_superseded());
	}
}
