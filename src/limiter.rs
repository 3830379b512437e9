//! Rate limiters for the fetch channels.
//!
//! Both limiters are plain state machines driven by an explicit `now`. They
//! hold the latest arguments, never the operation itself, so a parameter
//! change cannot leave a stale closure behind.

use std::time::{Duration, Instant};

/// Shared surface of [`Throttle`] and [`Debounce`].
pub trait RateLimiter<T> {
	/// Offer new arguments. Returns them back when they may be used
	/// immediately; otherwise they are parked until [`RateLimiter::poll`].
	fn schedule(&mut self, args: T, now: Instant) -> Option<T>;

	/// Release parked arguments once the limiter allows it.
	fn poll(&mut self, now: Instant) -> Option<T>;

	/// Drop parked arguments, returning them if there were any.
	fn cancel(&mut self) -> Option<T>;

	/// Earliest instant at which `poll` may release something.
	fn deadline(&self) -> Option<Instant>;

	fn is_pending(&self) -> bool {
		self.deadline().is_some()
	}
}

/// At most one release per window, leading and trailing edge.
///
/// A call while the window is open is released immediately and reopens the
/// window later. Calls inside the window overwrite a single pending slot, so
/// intermediate arguments are dropped and only the latest is released once
/// the window has elapsed.
#[derive(Debug)]
pub struct Throttle<T> {
	window: Duration,
	last_release: Option<Instant>,
	pending: Option<T>,
}

impl<T> Throttle<T> {
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			last_release: None,
			pending: None,
		}
	}

	pub fn window(&self) -> Duration {
		self.window
	}

	fn is_open(&self, now: Instant) -> bool {
		self.last_release
			.is_none_or(|last| now.saturating_duration_since(last) >= self.window)
	}
}

impl<T> RateLimiter<T> for Throttle<T> {
	fn schedule(&mut self, args: T, now: Instant) -> Option<T> {
		if self.pending.is_none() && self.is_open(now) {
			self.last_release = Some(now);
			return Some(args);
		}
		self.pending = Some(args);
		None
	}

	fn poll(&mut self, now: Instant) -> Option<T> {
		if self.pending.is_none() || !self.is_open(now) {
			return None;
		}
		self.last_release = Some(now);
		self.pending.take()
	}

	fn cancel(&mut self) -> Option<T> {
		self.pending.take()
	}

	fn deadline(&self) -> Option<Instant> {
		self.pending.as_ref()?;
		self.last_release.map(|last| last + self.window)
	}
}

/// Collapse a burst of calls into one release after a quiet period.
///
/// Every call restarts the quiet period and replaces the arguments, so the
/// release always carries what was current when it fired.
#[derive(Debug)]
pub struct Debounce<T> {
	window: Duration,
	pending: Option<(Instant, T)>,
}

impl<T> Debounce<T> {
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			pending: None,
		}
	}

	pub fn window(&self) -> Duration {
		self.window
	}
}

impl<T> RateLimiter<T> for Debounce<T> {
	fn schedule(&mut self, args: T, now: Instant) -> Option<T> {
		self.pending = Some((now + self.window, args));
		None
	}

	fn poll(&mut self, now: Instant) -> Option<T> {
		match &self.pending {
			Some((due, _)) if *due <= now => self.pending.take().map(|(_, args)| args),
			_ => None,
		}
	}

	fn cancel(&mut self) -> Option<T> {
		self.pending.take().map(|(_, args)| args)
	}

	fn deadline(&self) -> Option<Instant> {
		self.pending.as_ref().map(|(due, _)| *due)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const WINDOW: Duration = Duration::from_millis(300);

	#[test]
	fn throttle_releases_leading_call_immediately() {
		let start = Instant::now();
		let mut throttle = Throttle::new(WINDOW);

		assert_eq!(throttle.schedule(1, start), Some(1));
		assert!(!throttle.is_pending());
	}

	#[test]
	fn throttle_keeps_only_latest_call_inside_window() {
		let start = Instant::now();
		let mut throttle = Throttle::new(WINDOW);
		throttle.schedule(1, start);

		assert_eq!(throttle.schedule(2, start + Duration::from_millis(50)), None);
		assert_eq!(throttle.schedule(3, start + Duration::from_millis(100)), None);
		assert_eq!(throttle.deadline(), Some(start + WINDOW));
		assert_eq!(throttle.poll(start + Duration::from_millis(299)), None);
		assert_eq!(throttle.poll(start + WINDOW), Some(3));
		assert_eq!(throttle.poll(start + WINDOW * 2), None);
	}

	#[test]
	fn throttle_trailing_release_starts_a_new_window() {
		let start = Instant::now();
		let mut throttle = Throttle::new(WINDOW);
		throttle.schedule(1, start);
		throttle.schedule(2, start + Duration::from_millis(10));
		assert_eq!(throttle.poll(start + WINDOW), Some(2));

		let inside = start + WINDOW + Duration::from_millis(10);
		assert_eq!(throttle.schedule(3, inside), None);
		assert_eq!(throttle.deadline(), Some(start + WINDOW * 2));
	}

	#[test]
	fn throttle_with_zero_window_never_parks() {
		let now = Instant::now();
		let mut throttle = Throttle::new(Duration::ZERO);
		assert_eq!(throttle.schedule(1, now), Some(1));
		assert_eq!(throttle.schedule(2, now), Some(2));
	}

	#[test]
	fn throttle_cancel_drops_pending_arguments() {
		let start = Instant::now();
		let mut throttle = Throttle::new(WINDOW);
		throttle.schedule(1, start);
		throttle.schedule(2, start);

		assert_eq!(throttle.cancel(), Some(2));
		assert_eq!(throttle.poll(start + WINDOW), None);
	}

	#[test]
	fn debounce_collapses_burst_into_trailing_call() {
		let start = Instant::now();
		let mut debounce = Debounce::new(WINDOW);

		assert_eq!(debounce.schedule("a", start), None);
		assert_eq!(debounce.schedule("b", start + Duration::from_millis(200)), None);
		assert_eq!(debounce.schedule("c", start + Duration::from_millis(400)), None);

		assert_eq!(debounce.poll(start + Duration::from_millis(600)), None);
		assert_eq!(
			debounce.deadline(),
			Some(start + Duration::from_millis(400) + WINDOW)
		);
		assert_eq!(debounce.poll(start + Duration::from_millis(700)), Some("c"));
		assert!(!debounce.is_pending());
	}

	#[test]
	fn debounce_cancel_prevents_release() {
		let start = Instant::now();
		let mut debounce = Debounce::new(WINDOW);
		debounce.schedule(1, start);

		assert_eq!(debounce.cancel(), Some(1));
		assert_eq!(debounce.poll(start + WINDOW), None);
	}
}
