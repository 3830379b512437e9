//! Bookkeeping for one fetch channel: last signature, in-flight request and
//! the rate limiter in front of it.

use std::time::Instant;

use logq_stream::TicketClock;
use tracing::debug;

use super::FetchRequest;
use crate::limiter::RateLimiter;
use crate::params::QueryParameters;
use crate::signature::{Channel, RequestSignature, build_signature};
use crate::source::FetchContext;

/// Request accepted by a channel but not yet released by its limiter.
#[derive(Debug)]
pub(crate) struct PendingFetch {
	params: QueryParameters,
	signature: RequestSignature,
}

/// Request released to a source and not yet resolved.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
	pub(crate) ticket: u64,
	pub(crate) signature: RequestSignature,
	pub(crate) offset: usize,
	pub(crate) page_size: usize,
}

/// What happened to a request offered to a channel.
#[derive(Debug)]
pub(crate) enum Offer {
	/// Same signature as the last request; nothing to do.
	Duplicate,
	/// Accepted and parked in the limiter.
	Parked,
	/// Accepted and released immediately.
	Ready(FetchRequest),
}

pub(crate) struct ChannelState<L> {
	channel: Channel,
	last_signature: Option<RequestSignature>,
	in_flight: Option<InFlight>,
	limiter: L,
	clock: TicketClock,
}

impl<L: RateLimiter<PendingFetch>> ChannelState<L> {
	pub(crate) fn new(channel: Channel, limiter: L) -> Self {
		Self {
			channel,
			last_signature: None,
			in_flight: None,
			limiter,
			clock: TicketClock::new(),
		}
	}

	/// Offer a request. Unless `force` is set, a request whose signature
	/// equals the last accepted one is suppressed.
	pub(crate) fn offer(&mut self, params: QueryParameters, force: bool, now: Instant) -> Offer {
		let signature = build_signature(self.channel, &params);
		if !force && self.last_signature.as_ref() == Some(&signature) {
			debug!(channel = %self.channel, "duplicate request suppressed");
			return Offer::Duplicate;
		}

		self.last_signature = Some(signature.clone());
		match self.limiter.schedule(PendingFetch { params, signature }, now) {
			Some(pending) => Offer::Ready(self.issue(pending)),
			None => Offer::Parked,
		}
	}

	/// Release the parked request if the limiter allows it.
	pub(crate) fn poll(&mut self, now: Instant) -> Option<FetchRequest> {
		let pending = self.limiter.poll(now)?;
		Some(self.issue(pending))
	}

	fn issue(&mut self, pending: PendingFetch) -> FetchRequest {
		let PendingFetch { params, signature } = pending;
		let ticket = self.clock.issue();
		if let Some(previous) = self.in_flight.as_ref() {
			debug!(
				channel = %self.channel,
				superseded = previous.ticket,
				ticket,
				"request supersedes one still in flight"
			);
		}
		self.in_flight = Some(InFlight {
			ticket,
			signature: signature.clone(),
			offset: params.offset,
			page_size: params.page_size,
		});
		FetchRequest {
			channel: self.channel,
			ticket,
			signature,
			context: FetchContext::new(ticket, self.clock.clone()),
			params,
		}
	}

	/// Claim the in-flight record for a resolved request.
	///
	/// Returns `None` when the outcome is stale: another request was issued
	/// since, or a newer one is already waiting in the limiter. A stale
	/// outcome for the current ticket still retires the in-flight record.
	pub(crate) fn settle(&mut self, ticket: u64, signature: &RequestSignature) -> Option<InFlight> {
		if self.in_flight.as_ref().is_none_or(|current| current.ticket != ticket) {
			return None;
		}
		let in_flight = self.in_flight.take()?;
		let current = in_flight.signature == *signature
			&& self.last_signature.as_ref() == Some(&in_flight.signature);
		current.then_some(in_flight)
	}

	/// Drop a parked request. The last signature falls back to whatever is
	/// still in flight so a later identical request is not mistaken for a
	/// duplicate of something that never ran.
	pub(crate) fn cancel_pending(&mut self) {
		if self.limiter.cancel().is_some() {
			self.last_signature = self.in_flight.as_ref().map(|f| f.signature.clone());
		}
	}

	/// Forget everything about the previous result set.
	pub(crate) fn reset(&mut self) {
		self.limiter.cancel();
		self.last_signature = None;
		self.in_flight = None;
		self.clock.retire();
	}

	/// Whether a request is parked or in flight.
	pub(crate) fn is_busy(&self) -> bool {
		self.in_flight.is_some() || self.limiter.is_pending()
	}

	pub(crate) fn has_in_flight(&self) -> bool {
		self.in_flight.is_some()
	}

	pub(crate) fn deadline(&self) -> Option<Instant> {
		self.limiter.deadline()
	}

	pub(crate) fn last_signature(&self) -> Option<&RequestSignature> {
		self.last_signature.as_ref()
	}
}
