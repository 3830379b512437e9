//! Process-wide `tracing` setup.
//!
//! The library only emits events; installing a subscriber is left to the
//! binary (or an embedder) through [`initialize`].

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when neither `RUST_LOG` nor the settings name one.
pub const DEFAULT_LEVEL: &str = "warn";

/// Install a stderr subscriber filtered by `RUST_LOG`, falling back to
/// `default_level` when the variable is unset or unparsable.
///
/// Fails if a global subscriber is already installed.
pub fn initialize(default_level: &str) -> Result<()> {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(default_level))
		.unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

	tracing_subscriber::registry()
		.with(fmt::layer().with_target(false).with_writer(std::io::stderr))
		.with(filter)
		.try_init()
		.map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}
