//! Accumulated rows and histogram of the current result set.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::source::{Distribution, DistributionBucket, PageResponse, Record};

/// A record plus the key it was given when it was ingested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
	/// Process-local key: ingestion time in ms, page offset and index within
	/// the page. Two identical records from different pages never share it.
	#[serde(rename = "_key")]
	pub key: String,
	#[serde(flatten)]
	pub record: Record,
}

/// Row buffer, totals and histogram. Only the coordinator mutates it.
#[derive(Debug, Clone)]
pub struct ResultAccumulator {
	rows: Vec<LogRow>,
	total_count: u64,
	has_more: bool,
	columns: Vec<String>,
	execution_time_ms: Option<u64>,
	distribution: Distribution,
}

impl Default for ResultAccumulator {
	fn default() -> Self {
		Self::new()
	}
}

impl ResultAccumulator {
	pub fn new() -> Self {
		Self {
			rows: Vec::new(),
			total_count: 0,
			has_more: true,
			columns: Vec::new(),
			execution_time_ms: None,
			distribution: Distribution::default(),
		}
	}

	pub fn rows(&self) -> &[LogRow] {
		&self.rows
	}

	pub fn total_count(&self) -> u64 {
		self.total_count
	}

	pub fn has_more(&self) -> bool {
		self.has_more
	}

	pub fn columns(&self) -> &[String] {
		&self.columns
	}

	pub fn execution_time_ms(&self) -> Option<u64> {
		self.execution_time_ms
	}

	pub fn distribution(&self) -> &Distribution {
		&self.distribution
	}

	/// Start a new result set. The histogram stays until the next
	/// distribution fetch replaces or clears it.
	pub(crate) fn reset(&mut self) {
		self.rows.clear();
		self.total_count = 0;
		self.has_more = true;
		self.columns.clear();
		self.execution_time_ms = None;
	}

	/// Merge one page fetched at `offset`.
	///
	/// The first page of a result set replaces the buffer, later pages are
	/// appended. More rows are expected only while the source reports more
	/// than we hold and the page came back full.
	pub(crate) fn apply_page(
		&mut self,
		page: PageResponse,
		offset: usize,
		first_page: bool,
		page_size: usize,
	) {
		if first_page {
			self.rows.clear();
		}
		let ingested_at = ingest_millis();
		let received = page.rows.len();
		self.rows.extend(page.rows.into_iter().enumerate().map(|(index, record)| LogRow {
			key: format!("{ingested_at}_{offset}_{index}"),
			record,
		}));

		self.total_count = page.total_count;
		self.has_more = page.total_count > self.rows.len() as u64 && received >= page_size;
		if !page.columns.is_empty() || first_page {
			self.columns = page.columns;
		}
		self.execution_time_ms = Some(page.execution_time_ms);
	}

	/// Replace the histogram with a fresh answer. Malformed answers become an
	/// empty histogram.
	pub(crate) fn apply_distribution(&mut self, raw: &Value) {
		self.distribution = parse_distribution(raw).unwrap_or_else(|| {
			warn!(response = %truncate(raw), "malformed distribution response, showing no data");
			Distribution::default()
		});
	}

	pub(crate) fn clear_distribution(&mut self) {
		self.distribution = Distribution::default();
	}
}

fn ingest_millis() -> u128 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis())
		.unwrap_or_default()
}

fn truncate(raw: &Value) -> String {
	let mut text = raw.to_string();
	if text.len() > 200 {
		let mut cut = 200;
		while !text.is_char_boundary(cut) {
			cut -= 1;
		}
		text.truncate(cut);
		text.push('…');
	}
	text
}

/// Read a histogram in either of the shapes sources use:
///
/// * a bare array of `{timePoint, count}` objects, or
/// * `{ "distributionData": [ { "distributionData": [...], "timeUnit", "timeInterval" } ] }`.
///
/// Any entry without a string `timePoint` and an unsigned `count` makes the
/// whole answer malformed.
pub fn parse_distribution(raw: &Value) -> Option<Distribution> {
	match raw {
		Value::Array(items) => Some(Distribution {
			buckets: parse_buckets(items)?,
			time_unit: None,
			time_interval: None,
		}),
		Value::Object(object) => {
			let outer = object.get("distributionData")?.as_array()?;
			let Some(series) = outer.first() else {
				return Some(Distribution::default());
			};
			let buckets = parse_buckets(series.get("distributionData")?.as_array()?)?;
			Some(Distribution {
				buckets,
				time_unit: series
					.get("timeUnit")
					.and_then(Value::as_str)
					.map(str::to_string),
				time_interval: series.get("timeInterval").and_then(Value::as_u64),
			})
		}
		_ => None,
	}
}

fn parse_buckets(items: &[Value]) -> Option<Vec<DistributionBucket>> {
	items
		.iter()
		.map(|item| {
			Some(DistributionBucket {
				time_point: item.get("timePoint")?.as_str()?.to_string(),
				count: item.get("count")?.as_u64()?,
			})
		})
		.collect()
}
