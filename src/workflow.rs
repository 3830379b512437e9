use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use chrono::Local;
use tracing::{info, warn};

use logq::memory::MemorySource;
use logq::{Distribution, LogRow, QueryParameters, QueryRuntime};

use crate::settings::ResolvedConfig;

/// Upper bound on waiting for one page plus its histogram.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything printed at the end of a run.
#[derive(Debug, Clone)]
pub(crate) struct QueryReport {
	pub(crate) params: QueryParameters,
	pub(crate) time_field: String,
	pub(crate) rows: Vec<LogRow>,
	pub(crate) columns: Vec<String>,
	pub(crate) total_count: u64,
	pub(crate) has_more: bool,
	pub(crate) pages_loaded: usize,
	pub(crate) execution_time_ms: Option<u64>,
	pub(crate) distribution: Distribution,
	/// Failure of a follow-up page; the rows loaded before it are kept.
	pub(crate) error: Option<String>,
}

/// Loads the configured records and pages through them with a runtime.
pub(crate) struct QueryWorkflow {
	runtime: QueryRuntime,
	params: QueryParameters,
	time_field: String,
	pages: usize,
}

impl QueryWorkflow {
	pub(crate) fn from_config(config: ResolvedConfig) -> Result<Self> {
		let source = MemorySource::from_path(&config.file, &config.datasource, &config.table)?
			.with_time_field(config.time_field.clone());
		let source = Arc::new(source);
		let runtime = QueryRuntime::new(source.clone(), source, config.coordinator);

		let (start, end) = config.query.bounds.resolve(Local::now().naive_local());
		let params = QueryParameters::new(config.datasource, config.table)
			.with_keyword(config.query.keyword)
			.with_sql_filter(config.query.sql_filter)
			.with_time_range(start, end)
			.with_time_grouping(config.query.grouping)
			.with_page_size(config.page_size)
			.with_fields(config.query.fields);

		Ok(Self {
			runtime,
			params,
			time_field: config.time_field,
			pages: config.query.pages,
		})
	}

	pub(crate) fn run(mut self) -> Result<QueryReport> {
		info!(
			datasource = %self.params.datasource,
			table = %self.params.table,
			pages = self.pages,
			"running query"
		);
		self.runtime
			.update_parameters(self.params.clone())
			.context("query parameters are not usable")?;
		self.settle()?;
		if let Some(err) = self.runtime.state().error() {
			return Err(anyhow!(err.clone()).context("first page could not be loaded"));
		}

		let mut pages_loaded = 1;
		while pages_loaded < self.pages && self.runtime.state().has_more() {
			if !self.runtime.load_more() {
				break;
			}
			self.settle()?;
			if self.runtime.state().error().is_some() {
				warn!(offset = self.runtime.state().offset(), "page failed, retrying once");
				self.runtime.retry();
				self.settle()?;
				if self.runtime.state().error().is_some() {
					break;
				}
			}
			pages_loaded += 1;
		}

		Ok(self.report(pages_loaded))
	}

	fn settle(&mut self) -> Result<()> {
		ensure!(
			self.runtime.wait_until_idle(FETCH_TIMEOUT),
			"timed out after {}s waiting for the source",
			FETCH_TIMEOUT.as_secs()
		);
		Ok(())
	}

	fn report(&self, pages_loaded: usize) -> QueryReport {
		let state = self.runtime.state();
		QueryReport {
			params: self.runtime.parameters().cloned().unwrap_or_else(|| self.params.clone()),
			time_field: self.time_field.clone(),
			rows: state.rows().to_vec(),
			columns: state.columns().to_vec(),
			total_count: state.total_count(),
			has_more: state.has_more(),
			pages_loaded,
			execution_time_ms: state.execution_time_ms(),
			distribution: state.distribution().clone(),
			error: state.error().map(ToString::to_string),
		}
	}
}
