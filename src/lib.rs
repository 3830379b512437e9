//! Incremental log-query coordination.
//!
//! A consumer describes a query with [`QueryParameters`] and supplies two
//! fetch operations: a paginated row search ([`PageSource`]) and a time
//! histogram ([`DistributionSource`]). The [`QueryCoordinator`] turns every
//! parameter change into deduplicated, rate-limited fetches, merges pages
//! into a growing row buffer, and drops answers that arrive after a newer
//! request was issued. [`QueryRuntime`] drives the coordinator with worker
//! threads; [`memory::MemorySource`] is an in-process source for files of
//! JSON records.

pub mod accumulator;
pub mod app_dirs;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod memory;
pub mod normalize;
pub mod params;
pub mod runtime;
pub mod signature;
pub mod source;
pub mod time;

pub use accumulator::{LogRow, ResultAccumulator};
pub use config::{CoordinatorSettings, DEFAULT_WINDOW};
pub use coordinator::{
	Completion, CoordinatorState, FetchOutcome, FetchRequest, FetchResult, ParameterChange,
	QueryCoordinator, Resolution,
};
pub use error::QueryError;
pub use normalize::{CanonicalQuery, has_substantive_change};
pub use params::{DistributionQuery, QueryParameters};
pub use runtime::QueryRuntime;
pub use signature::{Channel, RequestSignature, build_signature};
pub use source::{
	Distribution, DistributionBucket, DistributionSource, FetchContext, PageResponse, PageSource,
	Record,
};
