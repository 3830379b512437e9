use std::time::Duration;

/// Default window of both rate limiters.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(300);

/// Tuning knobs of the coordinator. None of them affect correctness, only
/// how often sources are called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
	/// Minimum spacing between page fetches.
	pub throttle_window: Duration,
	/// Quiet period before a distribution fetch fires.
	pub debounce_window: Duration,
}

impl Default for CoordinatorSettings {
	fn default() -> Self {
		Self {
			throttle_window: DEFAULT_WINDOW,
			debounce_window: DEFAULT_WINDOW,
		}
	}
}

impl CoordinatorSettings {
	/// No rate limiting at all; every request is released on the next poll.
	pub fn immediate() -> Self {
		Self {
			throttle_window: Duration::ZERO,
			debounce_window: Duration::ZERO,
		}
	}

	#[must_use]
	pub fn with_throttle_window(mut self, window: Duration) -> Self {
		self.throttle_window = window;
		self
	}

	#[must_use]
	pub fn with_debounce_window(mut self, window: Duration) -> Self {
		self.debounce_window = window;
		self
	}
}
