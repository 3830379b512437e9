//! Threaded driver around [`QueryCoordinator`].
//!
//! Every released request runs on its own short-lived worker thread and
//! reports back through a [`Mailbox`]. The runtime applies outcomes on the
//! caller's thread whenever it is pumped, so the coordinator itself is never
//! shared.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use logq_stream::{Courier, Envelope, Mailbox};
use tracing::{debug, error, trace};

use crate::config::CoordinatorSettings;
use crate::coordinator::{
	Completion, CoordinatorState, FetchOutcome, FetchRequest, FetchResult, ParameterChange,
	QueryCoordinator,
};
use crate::error::QueryError;
use crate::params::QueryParameters;
use crate::signature::Channel;
use crate::source::{DistributionSource, PageSource};

pub struct QueryRuntime {
	coordinator: QueryCoordinator,
	pages: Arc<dyn PageSource>,
	distributions: Arc<dyn DistributionSource>,
	mailbox: Mailbox<Channel, Completion>,
}

impl QueryRuntime {
	pub fn new(
		pages: Arc<dyn PageSource>,
		distributions: Arc<dyn DistributionSource>,
		settings: CoordinatorSettings,
	) -> Self {
		Self {
			coordinator: QueryCoordinator::new(settings),
			pages,
			distributions,
			mailbox: Mailbox::new(),
		}
	}

	pub fn state(&self) -> &CoordinatorState {
		self.coordinator.state()
	}

	pub fn parameters(&self) -> Option<&QueryParameters> {
		self.coordinator.parameters()
	}

	pub fn coordinator(&self) -> &QueryCoordinator {
		&self.coordinator
	}

	pub fn update_parameters(&mut self, params: QueryParameters) -> Result<ParameterChange, QueryError> {
		let change = self.coordinator.update_parameters(params, Instant::now());
		self.pump();
		change
	}

	pub fn load_more(&mut self) -> bool {
		let scheduled = self.coordinator.load_more(Instant::now());
		self.pump();
		scheduled
	}

	pub fn retry(&mut self) -> bool {
		let scheduled = self.coordinator.retry(Instant::now());
		self.pump();
		scheduled
	}

	pub fn refresh(&mut self) -> Result<(), QueryError> {
		let refreshed = self.coordinator.refresh(Instant::now());
		self.pump();
		refreshed
	}

	pub fn dismiss_error(&mut self) {
		self.coordinator.dismiss_error();
	}

	/// Apply finished outcomes and start every request that is due.
	///
	/// Returns the number of outcomes applied or discarded.
	pub fn pump(&mut self) -> usize {
		let outcomes = self.mailbox.drain();
		let handled = outcomes.len();
		for outcome in outcomes {
			self.coordinator.resolve(outcome);
		}
		self.dispatch_due();
		handled
	}

	/// Pump until nothing is parked or in flight, or `timeout` elapses.
	///
	/// Returns whether the coordinator went idle.
	pub fn wait_until_idle(&mut self, timeout: Duration) -> bool {
		let give_up = Instant::now() + timeout;
		self.pump();
		while !self.coordinator.is_idle() {
			let now = Instant::now();
			if now >= give_up {
				return false;
			}
			let wake = self
				.coordinator
				.next_deadline()
				.map_or(give_up, |deadline| deadline.min(give_up));
			let wait = wake.saturating_duration_since(now);
			if let Some(outcome) = self.mailbox.next_timeout(wait) {
				self.coordinator.resolve(outcome);
			}
			self.pump();
		}
		true
	}

	/// Supersede all in-flight work. Workers still running finish on their
	/// own and their outcomes are ignored.
	pub fn shutdown(&mut self) {
		self.coordinator.shutdown();
		let dropped = self.mailbox.drain().len();
		if dropped > 0 {
			debug!(dropped, "dropped outcomes at shutdown");
		}
	}

	fn dispatch_due(&mut self) {
		for request in self.coordinator.poll(Instant::now()) {
			if let Err(outcome) = self.dispatch(request) {
				self.coordinator.resolve(*outcome);
			}
		}
	}

	fn dispatch(&self, request: FetchRequest) -> Result<(), Box<FetchOutcome>> {
		let courier = Courier::new(self.mailbox.sender(), request.ticket, request.channel);
		let name = format!("logq-{}-{}", request.channel, request.ticket);
		trace!(thread = %name, offset = request.params.offset, "dispatching fetch");

		let pages = Arc::clone(&self.pages);
		let distributions = Arc::clone(&self.distributions);
		let (ticket, channel, signature) = (request.ticket, request.channel, request.signature.clone());
		let spawned = thread::Builder::new().name(name).spawn(move || {
			let result = run_fetch(&request, pages.as_ref(), distributions.as_ref());
			let signature = request.signature;
			if !courier.deliver(Completion { signature, result }) {
				trace!("runtime went away before the fetch finished");
			}
		});

		spawned.map(drop).map_err(|err| {
			error!(%err, %channel, "failed to spawn fetch worker");
			let err = anyhow::Error::new(err).context("failed to spawn fetch worker");
			let result = match channel {
				Channel::Page => FetchResult::Page(Err(err)),
				Channel::Distribution => FetchResult::Distribution(Err(err)),
			};
			Box::new(Envelope {
				ticket,
				kind: channel,
				payload: Completion { signature, result },
			})
		})
	}
}

impl Drop for QueryRuntime {
	fn drop(&mut self) {
		self.shutdown();
	}
}

fn run_fetch(
	request: &FetchRequest,
	pages: &dyn PageSource,
	distributions: &dyn DistributionSource,
) -> FetchResult {
	match request.channel {
		Channel::Page => FetchResult::Page(
			catch(|| pages.fetch_page(&request.params, &request.context)),
		),
		Channel::Distribution => {
			let query = request.params.distribution_query();
			FetchResult::Distribution(catch(|| {
				distributions.fetch_distribution(&query, &request.context)
			}))
		}
	}
}

/// A panicking source counts as a failed fetch.
fn catch<T>(fetch: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
	panic::catch_unwind(AssertUnwindSafe(fetch)).unwrap_or_else(|payload| {
		let message = payload
			.downcast_ref::<&str>()
			.map(|s| (*s).to_string())
			.or_else(|| payload.downcast_ref::<String>().cloned())
			.unwrap_or_else(|| "unknown panic".to_string());
		Err(anyhow::anyhow!("source panicked: {message}"))
	})
}
