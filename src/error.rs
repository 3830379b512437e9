use thiserror::Error;

/// Errors surfaced by the query coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
	/// A required parameter is missing or inconsistent; no fetch was attempted.
	#[error("query parameters are incomplete: {field}")]
	ParameterInvalid { field: &'static str },

	/// The page search failed. Already loaded rows are kept and the request
	/// can be retried.
	#[error("log query failed: {0}")]
	FetchFailed(String),

	/// The distribution query failed. The histogram degrades to no data.
	#[error("log distribution unavailable: {0}")]
	DistributionUnavailable(String),
}

impl QueryError {
	pub fn parameter_invalid(field: &'static str) -> Self {
		Self::ParameterInvalid { field }
	}

	/// Render an `anyhow` chain as a page failure.
	pub(crate) fn fetch_failed(err: &anyhow::Error) -> Self {
		Self::FetchFailed(format!("{err:#}"))
	}

	/// Whether retrying the same request may succeed.
	#[must_use]
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::FetchFailed(_))
	}
}
