//! Query parameters accepted by the coordinator and the sources.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::time::{TimeGrouping, optional_timestamp};

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

fn default_page_size() -> usize {
	DEFAULT_PAGE_SIZE
}

/// Full description of one log query.
///
/// A new value replaces the previous one wholesale; the coordinator never
/// patches parameters in place except for the offset cursor it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameters {
	#[serde(rename = "datasourceId")]
	pub datasource: String,
	#[serde(rename = "module")]
	pub table: String,
	#[serde(default)]
	pub keyword: String,
	#[serde(rename = "whereSql", default)]
	pub sql_filter: String,
	#[serde(
		rename = "startTime",
		default,
		with = "optional_timestamp",
		skip_serializing_if = "Option::is_none"
	)]
	pub start: Option<NaiveDateTime>,
	#[serde(
		rename = "endTime",
		default,
		with = "optional_timestamp",
		skip_serializing_if = "Option::is_none"
	)]
	pub end: Option<NaiveDateTime>,
	#[serde(default)]
	pub time_grouping: TimeGrouping,
	#[serde(default = "default_page_size")]
	pub page_size: usize,
	#[serde(default)]
	pub offset: usize,
	#[serde(default)]
	pub fields: Vec<String>,
}

impl QueryParameters {
	pub fn new(datasource: impl Into<String>, table: impl Into<String>) -> Self {
		Self {
			datasource: datasource.into(),
			table: table.into(),
			keyword: String::new(),
			sql_filter: String::new(),
			start: None,
			end: None,
			time_grouping: TimeGrouping::default(),
			page_size: DEFAULT_PAGE_SIZE,
			offset: 0,
			fields: Vec::new(),
		}
	}

	#[must_use]
	pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
		self.keyword = keyword.into();
		self
	}

	#[must_use]
	pub fn with_sql_filter(mut self, sql: impl Into<String>) -> Self {
		self.sql_filter = sql.into();
		self
	}

	#[must_use]
	pub fn with_time_range(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
		self.start = Some(start);
		self.end = Some(end);
		self
	}

	#[must_use]
	pub fn with_time_grouping(mut self, grouping: TimeGrouping) -> Self {
		self.time_grouping = grouping;
		self
	}

	#[must_use]
	pub fn with_page_size(mut self, page_size: usize) -> Self {
		self.page_size = page_size;
		self
	}

	#[must_use]
	pub fn with_offset(mut self, offset: usize) -> Self {
		self.offset = offset;
		self
	}

	#[must_use]
	pub fn with_fields<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.fields = fields.into_iter().map(Into::into).collect();
		self
	}

	/// Check that the parameters describe a query a source can answer.
	pub fn validate(&self) -> Result<(), QueryError> {
		if self.datasource.trim().is_empty() {
			return Err(QueryError::parameter_invalid("datasource"));
		}
		if self.table.trim().is_empty() {
			return Err(QueryError::parameter_invalid("table"));
		}
		let (Some(start), Some(end)) = (self.start, self.end) else {
			let field = if self.start.is_none() {
				"start time"
			} else {
				"end time"
			};
			return Err(QueryError::parameter_invalid(field));
		};
		if end < start {
			return Err(QueryError::parameter_invalid("time range"));
		}
		if self.page_size == 0 {
			return Err(QueryError::parameter_invalid("page size"));
		}
		Ok(())
	}

	/// Parameters for the distribution channel: no pagination, same filters.
	pub fn distribution_query(&self) -> DistributionQuery {
		DistributionQuery {
			datasource: self.datasource.clone(),
			table: self.table.clone(),
			keyword: self.keyword.clone(),
			sql_filter: self.sql_filter.clone(),
			start: self.start,
			end: self.end,
			time_grouping: self.time_grouping,
			fields: self.fields.clone(),
		}
	}
}

/// Input of the distribution (histogram) fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionQuery {
	#[serde(rename = "datasourceId")]
	pub datasource: String,
	#[serde(rename = "module")]
	pub table: String,
	#[serde(default)]
	pub keyword: String,
	#[serde(rename = "whereSql", default)]
	pub sql_filter: String,
	#[serde(
		rename = "startTime",
		default,
		with = "optional_timestamp",
		skip_serializing_if = "Option::is_none"
	)]
	pub start: Option<NaiveDateTime>,
	#[serde(
		rename = "endTime",
		default,
		with = "optional_timestamp",
		skip_serializing_if = "Option::is_none"
	)]
	pub end: Option<NaiveDateTime>,
	#[serde(default)]
	pub time_grouping: TimeGrouping,
	#[serde(default)]
	pub fields: Vec<String>,
}
