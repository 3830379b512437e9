//! Delivery primitives for handing fetch outcomes from worker threads back to
//! the thread that owns query state.
//!
//! Every unit of background work is identified by a ticket. Workers report
//! through a [`Courier`] that stamps the ticket and a caller-defined `kind`
//! onto an [`Envelope`]; the owning thread drains a [`Mailbox`] and decides
//! for itself whether the envelope is still relevant. A shared
//! [`TicketClock`] lets long-running workers notice that a newer ticket was
//! issued and bail out early. That check is advisory: nothing stops a worker
//! from finishing, the owner simply ignores envelopes it no longer wants.
//!
//! Basic usage:
//! ```
//! use std::thread;
//!
//! use logq_stream::{Courier, Mailbox, TicketClock};
//!
//! let mut mailbox = Mailbox::<&'static str, u32>::new();
//! let clock = TicketClock::new();
//! let ticket = clock.issue();
//! let courier = Courier::new(mailbox.sender(), ticket, "page");
//!
//! thread::spawn(move || {
//!     courier.deliver(42);
//! })
//! .join()
//! .unwrap();
//!
//! let envelope = mailbox.try_next().unwrap();
//! assert_eq!(envelope.ticket, ticket);
//! assert_eq!(envelope.kind, "page");
//! assert_eq!(envelope.payload, 42);
//! assert!(!clock.is_superseded(ticket));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Message produced by a background worker and consumed by the owning thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<K, P> {
	/// Ticket of the work item that produced this message.
	pub ticket: u64,
	/// Caller-defined tag describing which lane the message belongs to.
	pub kind: K,
	/// Payload delivered to the consumer.
	pub payload: P,
}

impl<K, P> Envelope<K, P> {
	/// Transform the payload while preserving the envelope metadata.
	pub fn map_payload<N>(self, f: impl FnOnce(P) -> N) -> Envelope<K, N> {
		Envelope {
			ticket: self.ticket,
			kind: self.kind,
			payload: f(self.payload),
		}
	}
}

/// Monotonic ticket source shared between the owner and its workers.
///
/// Only the most recently issued ticket is considered current.
#[derive(Clone, Default)]
pub struct TicketClock {
	latest: Arc<AtomicU64>,
}

impl TicketClock {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Issue a fresh ticket, superseding every ticket issued before it.
	pub fn issue(&self) -> u64 {
		self.latest.fetch_add(1, Ordering::AcqRel) + 1
	}

	/// Supersede every outstanding ticket without issuing a new one.
	pub fn retire(&self) {
		self.latest.fetch_add(1, Ordering::AcqRel);
	}

	/// Most recently issued (or retired) ticket value.
	#[must_use]
	pub fn latest(&self) -> u64 {
		self.latest.load(Ordering::Acquire)
	}

	/// Whether a newer ticket exists than `ticket`.
	#[must_use]
	pub fn is_superseded(&self, ticket: u64) -> bool {
		self.latest() != ticket
	}
}

impl fmt::Debug for TicketClock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TicketClock")
			.field("latest", &self.latest())
			.finish()
	}
}

/// Owned handle a worker uses to report the outcome of one ticket.
pub struct Courier<K, P> {
	tx: Sender<Envelope<K, P>>,
	ticket: u64,
	kind: K,
}

impl<K, P> Courier<K, P> {
	#[must_use]
	pub fn new(tx: Sender<Envelope<K, P>>, ticket: u64, kind: K) -> Self {
		Self { tx, ticket, kind }
	}

	/// Ticket this courier reports for.
	#[must_use]
	pub fn ticket(&self) -> u64 {
		self.ticket
	}

	/// Lane this courier reports on.
	#[must_use]
	pub fn kind(&self) -> &K {
		&self.kind
	}

	/// Hand the payload to the owner.
	///
	/// Returns `false` when the owner has gone away; the payload is dropped.
	pub fn deliver(self, payload: P) -> bool {
		self.tx
			.send(Envelope {
				ticket: self.ticket,
				kind: self.kind,
				payload,
			})
			.is_ok()
	}
}

impl<K: fmt::Debug, P> fmt::Debug for Courier<K, P> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Courier")
			.field("ticket", &self.ticket)
			.field("kind", &self.kind)
			.finish_non_exhaustive()
	}
}

/// Receiving end owned by the thread that applies outcomes.
///
/// The mailbox keeps its own sender so it never reports a disconnect while
/// it is alive; `try_next` simply returns `None` when nothing is waiting.
pub struct Mailbox<K, P> {
	tx: Sender<Envelope<K, P>>,
	rx: Receiver<Envelope<K, P>>,
}

impl<K, P> Mailbox<K, P> {
	#[must_use]
	pub fn new() -> Self {
		let (tx, rx) = mpsc::channel();
		Self { tx, rx }
	}

	/// Sender handed to couriers.
	#[must_use]
	pub fn sender(&self) -> Sender<Envelope<K, P>> {
		self.tx.clone()
	}

	/// Take the next waiting envelope without blocking.
	pub fn try_next(&mut self) -> Option<Envelope<K, P>> {
		match self.rx.try_recv() {
			Ok(envelope) => Some(envelope),
			Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
		}
	}

	/// Block for at most `timeout` waiting for the next envelope.
	pub fn next_timeout(&mut self, timeout: Duration) -> Option<Envelope<K, P>> {
		match self.rx.recv_timeout(timeout) {
			Ok(envelope) => Some(envelope),
			Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
		}
	}

	/// Take every envelope that is currently waiting.
	pub fn drain(&mut self) -> Vec<Envelope<K, P>> {
		std::iter::from_fn(|| self.try_next()).collect()
	}
}

impl<K, P> Default for Mailbox<K, P> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K, P> fmt::Debug for Mailbox<K, P> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Mailbox(..)")
	}
}
