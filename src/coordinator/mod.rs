//! Deterministic core of the log-query coordinator.
//!
//! [`QueryCoordinator`] owns the result set and both fetch channels but
//! performs no I/O and reads no clock. Callers feed it parameter changes and
//! user intents together with the current instant, collect the
//! [`FetchRequest`]s it releases from [`QueryCoordinator::poll`], run them
//! wherever they like, and hand each [`FetchOutcome`] back to
//! [`QueryCoordinator::resolve`]. Outcomes that no longer match the latest
//! request of their channel are dropped without touching state.
//!
//! [`crate::runtime::QueryRuntime`] is the threaded driver used in practice.

mod channel;

use std::time::Instant;

use logq_stream::Envelope;
use serde_json::Value;
use tracing::{debug, warn};

use crate::accumulator::{LogRow, ResultAccumulator};
use crate::config::CoordinatorSettings;
use crate::error::QueryError;
use crate::limiter::{Debounce, Throttle};
use crate::normalize::has_substantive_change;
use crate::params::QueryParameters;
use crate::signature::{Channel, RequestSignature};
use crate::source::{Distribution, DistributionBucket, FetchContext, PageResponse};

use self::channel::{ChannelState, Offer, PendingFetch};

/// A fetch released by the coordinator, to be run against a source.
#[derive(Debug)]
pub struct FetchRequest {
	pub channel: Channel,
	pub ticket: u64,
	pub signature: RequestSignature,
	pub params: QueryParameters,
	pub context: FetchContext,
}

impl FetchRequest {
	/// Wrap the source's answer for [`QueryCoordinator::resolve`].
	pub fn complete(&self, result: FetchResult) -> FetchOutcome {
		Envelope {
			ticket: self.ticket,
			kind: self.channel,
			payload: Completion {
				signature: self.signature.clone(),
				result,
			},
		}
	}
}

/// Raw result of a source call.
#[derive(Debug)]
pub enum FetchResult {
	Page(anyhow::Result<PageResponse>),
	Distribution(anyhow::Result<Value>),
}

/// Payload of a [`FetchOutcome`].
#[derive(Debug)]
pub struct Completion {
	pub signature: RequestSignature,
	pub result: FetchResult,
}

/// Result of a fetch, tagged with the ticket and channel it was issued on.
pub type FetchOutcome = Envelope<Channel, Completion>;

/// How [`QueryCoordinator::update_parameters`] treated new parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChange {
	/// A new result set was started.
	Reset,
	/// Same result set; paging continues where it was.
	Continued,
}

/// What [`QueryCoordinator::resolve`] did with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
	/// Merged into the state.
	Applied,
	/// Recorded as a failure (page error or empty histogram).
	Failed,
	/// Superseded by a newer request and ignored.
	Discarded,
}

/// State surface read by the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
	results: ResultAccumulator,
	offset: usize,
	loading: bool,
	error: Option<QueryError>,
	epoch: u64,
}

impl CoordinatorState {
	pub fn rows(&self) -> &[LogRow] {
		self.results.rows()
	}

	/// Offset of the most recently requested page.
	pub fn offset(&self) -> usize {
		self.offset
	}

	pub fn has_more(&self) -> bool {
		self.results.has_more()
	}

	/// A page fetch is parked or in flight. Distribution fetches never count.
	pub fn loading(&self) -> bool {
		self.loading
	}

	/// Last page failure, kept until dismissed, retried or reset.
	pub fn error(&self) -> Option<&QueryError> {
		self.error.as_ref()
	}

	pub fn total_count(&self) -> u64 {
		self.results.total_count()
	}

	pub fn columns(&self) -> &[String] {
		self.results.columns()
	}

	pub fn execution_time_ms(&self) -> Option<u64> {
		self.results.execution_time_ms()
	}

	pub fn distribution(&self) -> &Distribution {
		self.results.distribution()
	}

	pub fn buckets(&self) -> &[DistributionBucket] {
		&self.results.distribution().buckets
	}

	/// Number of result sets started so far.
	pub fn epoch(&self) -> u64 {
		self.epoch
	}
}

/// Turns parameter changes into deduplicated, rate-limited fetches and
/// merges their outcomes.
pub struct QueryCoordinator {
	params: Option<QueryParameters>,
	state: CoordinatorState,
	page: ChannelState<Throttle<PendingFetch>>,
	distribution: ChannelState<Debounce<PendingFetch>>,
	outbox: Vec<FetchRequest>,
	/// The latest page fetch of this result set succeeded.
	page_settled: bool,
	/// The latest page fetch failed and can be retried, whether or not its
	/// error is still shown.
	page_failed: bool,
}

impl Default for QueryCoordinator {
	fn default() -> Self {
		Self::new(CoordinatorSettings::default())
	}
}

impl QueryCoordinator {
	pub fn new(settings: CoordinatorSettings) -> Self {
		Self {
			params: None,
			state: CoordinatorState::default(),
			page: ChannelState::new(Channel::Page, Throttle::new(settings.throttle_window)),
			distribution: ChannelState::new(
				Channel::Distribution,
				Debounce::new(settings.debounce_window),
			),
			outbox: Vec::new(),
			page_settled: false,
			page_failed: false,
		}
	}

	pub fn state(&self) -> &CoordinatorState {
		&self.state
	}

	/// Parameters currently in effect, with the coordinator's own offset.
	pub fn parameters(&self) -> Option<&QueryParameters> {
		self.params.as_ref()
	}

	/// Replace the query parameters.
	///
	/// A substantive change starts a new result set. The offset in `next` is
	/// ignored: the coordinator owns the paging cursor. Invalid parameters
	/// are kept (so a later fix is compared against them) but nothing is
	/// fetched and any parked request is dropped.
	pub fn update_parameters(
		&mut self,
		next: QueryParameters,
		now: Instant,
	) -> Result<ParameterChange, QueryError> {
		let change = if has_substantive_change(self.params.as_ref(), &next) {
			self.reset();
			ParameterChange::Reset
		} else {
			ParameterChange::Continued
		};

		let next = next.with_offset(self.state.offset);
		let validation = next.validate();
		self.params = Some(next.clone());

		if let Err(err) = validation {
			debug!(%err, "skipping fetch for incomplete parameters");
			self.page.cancel_pending();
			self.distribution.cancel_pending();
			self.sync_loading();
			return Err(err);
		}

		self.offer_page(next.clone(), false, now);
		self.offer_distribution(next, false, now);
		Ok(change)
	}

	/// Request the next page of the current result set.
	///
	/// Only allowed when nothing is loading, more rows exist and the last
	/// page fetch succeeded. Returns whether a fetch was scheduled.
	pub fn load_more(&mut self, now: Instant) -> bool {
		if self.state.loading || !self.state.has_more() || !self.page_settled {
			return false;
		}
		let Some(params) = self.params.as_ref().filter(|p| p.validate().is_ok()) else {
			return false;
		};

		let offset = self.state.offset + params.page_size;
		let next = params.clone().with_offset(offset);
		self.state.offset = offset;
		self.params = Some(next.clone());
		self.offer_page(next, false, now);
		true
	}

	/// Reissue the page request that last failed. Returns whether a fetch
	/// was scheduled.
	pub fn retry(&mut self, now: Instant) -> bool {
		if self.state.loading || !self.page_failed {
			return false;
		}
		let Some(params) = self.params.clone().filter(|p| p.validate().is_ok()) else {
			return false;
		};
		self.state.error = None;
		self.page_failed = false;
		self.offer_page(params, true, now);
		true
	}

	/// Start the current query over from the first page.
	///
	/// Does nothing before the first parameters arrive. Invalid parameters
	/// are reported and the loaded rows are left alone.
	pub fn refresh(&mut self, now: Instant) -> Result<(), QueryError> {
		let Some(params) = self.params.clone() else {
			return Ok(());
		};
		let params = params.with_offset(0);
		params.validate()?;
		self.reset();
		self.params = Some(params.clone());
		self.offer_page(params.clone(), true, now);
		self.offer_distribution(params, true, now);
		Ok(())
	}

	/// Hide the current page error without touching rows.
	pub fn dismiss_error(&mut self) {
		self.state.error = None;
	}

	/// Collect every request that is due at `now`.
	pub fn poll(&mut self, now: Instant) -> Vec<FetchRequest> {
		let mut due = std::mem::take(&mut self.outbox);
		due.extend(self.page.poll(now));
		due.extend(self.distribution.poll(now));
		self.sync_loading();
		due
	}

	/// Apply or discard the outcome of a released request.
	pub fn resolve(&mut self, outcome: FetchOutcome) -> Resolution {
		let Envelope {
			ticket,
			kind: channel,
			payload: Completion { signature, result },
		} = outcome;

		let settled = match channel {
			Channel::Page => self.page.settle(ticket, &signature),
			Channel::Distribution => self.distribution.settle(ticket, &signature),
		};
		let Some(in_flight) = settled else {
			debug!(%channel, ticket, "discarding superseded outcome");
			self.sync_loading();
			return Resolution::Discarded;
		};

		let resolution = match result {
			FetchResult::Page(result) => {
				let result = result.and_then(|page| {
					if page.success {
						Ok(page)
					} else {
						Err(anyhow::anyhow!(
							page.error_message
								.unwrap_or_else(|| "source reported failure".to_string())
						))
					}
				});
				match result {
					Ok(page) => {
						let first_page = in_flight.offset == 0;
						self.state
							.results
							.apply_page(page, in_flight.offset, first_page, in_flight.page_size);
						self.state.error = None;
						self.page_settled = true;
						self.page_failed = false;
						Resolution::Applied
					}
					Err(err) => {
						let err = QueryError::fetch_failed(&err);
						warn!(%err, offset = in_flight.offset, "page fetch failed, keeping loaded rows");
						self.state.error = Some(err);
						self.page_settled = false;
						self.page_failed = true;
						Resolution::Failed
					}
				}
			}
			FetchResult::Distribution(Ok(raw)) => {
				self.state.results.apply_distribution(&raw);
				Resolution::Applied
			}
			FetchResult::Distribution(Err(err)) => {
				let err = QueryError::DistributionUnavailable(format!("{err:#}"));
				warn!(%err, "showing an empty histogram");
				self.state.results.clear_distribution();
				Resolution::Failed
			}
		};
		self.sync_loading();
		resolution
	}

	/// Earliest instant at which [`QueryCoordinator::poll`] may release a
	/// parked request. Requests released immediately by an operation are
	/// always returned by the next `poll`, whatever this says.
	pub fn next_deadline(&self) -> Option<Instant> {
		match (self.page.deadline(), self.distribution.deadline()) {
			(Some(a), Some(b)) => Some(a.min(b)),
			(a, b) => a.or(b),
		}
	}

	/// Nothing queued, parked or in flight on either channel.
	pub fn is_idle(&self) -> bool {
		self.outbox.is_empty() && !self.page.is_busy() && !self.distribution.is_busy()
	}

	/// Whether a request has been released but not resolved on `channel`.
	pub fn is_in_flight(&self, channel: Channel) -> bool {
		match channel {
			Channel::Page => self.page.has_in_flight(),
			Channel::Distribution => self.distribution.has_in_flight(),
		}
	}

	/// Signature of the latest accepted request on `channel`.
	pub fn last_signature(&self, channel: Channel) -> Option<&RequestSignature> {
		match channel {
			Channel::Page => self.page.last_signature(),
			Channel::Distribution => self.distribution.last_signature(),
		}
	}

	/// Drop parked work and supersede everything in flight.
	pub fn shutdown(&mut self) {
		self.outbox.clear();
		self.page.reset();
		self.distribution.reset();
		self.sync_loading();
	}

	fn reset(&mut self) {
		self.state.epoch += 1;
		self.state.offset = 0;
		self.state.error = None;
		self.state.results.reset();
		self.page_settled = false;
		self.page_failed = false;
		self.outbox.clear();
		self.page.reset();
		self.distribution.reset();
		self.sync_loading();
	}

	fn offer_page(&mut self, params: QueryParameters, force: bool, now: Instant) {
		if let Offer::Ready(request) = self.page.offer(params, force, now) {
			self.outbox.push(request);
		}
		self.sync_loading();
	}

	fn offer_distribution(&mut self, params: QueryParameters, force: bool, now: Instant) {
		if let Offer::Ready(request) = self.distribution.offer(params, force, now) {
			self.outbox.push(request);
		}
	}

	fn sync_loading(&mut self) {
		self.state.loading = self.page.is_busy();
	}
}
