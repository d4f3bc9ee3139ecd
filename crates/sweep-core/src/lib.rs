//! Sweep Core - paginated, rate-limited field mutation
//!
//! Walks every document of one collection exactly once and rewrites a single
//! field on each:
//! - Cursor pagination guarantees complete, non-overlapping coverage
//! - A shared token bucket caps sustained write throughput
//! - Updates run either as direct writes or as transactional
//!   check-then-write
//! - The written value comes from a closed set of strategies
//!
//! # Example
//!
//! ```rust,ignore
//! use sweep_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), SweepError> {
//! let store = Arc::new(MemoryStore::new());
//! let settings = Settings::new("users", "visits")?
//!     .with_batch_size(100)
//!     .with_rate_limit(50.0);
//!
//! let summary = PaginationDriver::new(store, settings)?.run().await?;
//! println!("applied {} updates", summary.applied);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod driver;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod limiter;
pub mod store;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use driver::{DriverState, PageSummary, PaginationDriver, RunSummary};
pub use error::{ConfigError, StoreError, SweepError};
pub use executor::{MutationExecutor, MutationOutcome};
pub use fetcher::{Page, PageFetcher};
pub use limiter::RateLimiter;
pub use store::{ConditionalOutcome, DocumentStore, MemoryStore, PageOrder};
pub use strategy::{UpdateType, ValueStrategy};
pub use types::{
    DocumentRef, DocumentSnapshot, FieldPath, FieldValue, RunId, Settings, UpdateMode,
    DEFAULT_BATCH_SIZE, DEFAULT_RATE_LIMIT,
};

/// Re-exported so callers can cancel runs without a direct dependency
pub use tokio_util::sync::CancellationToken;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running a sweep
    pub use crate::{
        CancellationToken, DocumentStore, MemoryStore, MutationOutcome, PaginationDriver,
        RunSummary, Settings, SweepError, UpdateMode, UpdateType,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
