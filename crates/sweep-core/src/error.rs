//! Error types for the sweep engine
//!
//! Three layers, matching how far a failure is allowed to travel:
//! - [`ConfigError`]: rejected settings, raised before any I/O
//! - [`StoreError`]: anything the document store reports
//! - [`SweepError`]: run-level errors that abort the whole pass

use std::time::Duration;

/// Run-aborting error
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// Settings failed validation
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A page could not be fetched
    #[error("failed to fetch page {page}: {source}")]
    Fetch {
        /// One-based index of the page being fetched
        page: u64,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// The run was cancelled while waiting for a rate limiter token
    #[error("run cancelled while waiting for rate limiter")]
    Cancelled,

    /// The run exceeded its global deadline
    #[error("run timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl SweepError {
    /// Whether the run stopped because of cancellation or deadline
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout(_))
    }
}

/// Settings validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A required value was empty or missing
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// Page size must be at least one
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,

    /// Rate must be finite and positive
    #[error("rate limit must be a positive number, got {0}")]
    InvalidRate(f64),

    /// Update type string not recognised
    #[error("unknown update type {0:?} (expected INCREMENT, CURRENT_TIMESTAMP or START_TIMESTAMP)")]
    UnknownUpdateType(String),

    /// Field path is syntactically invalid
    #[error("invalid field path {path:?}: {reason}")]
    InvalidFieldPath {
        /// Offending path
        path: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Collection name is syntactically invalid
    #[error("invalid collection name {0:?}")]
    InvalidCollection(String),
}

/// Errors reported by a [`DocumentStore`](crate::store::DocumentStore)
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Target document does not exist
    #[error("document not found: {0}")]
    NotFound(String),

    /// Transaction gave up after contention
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Store rejected the request
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// Status code or name reported by the store
        status: String,
        /// Human-readable message
        message: String,
    },

    /// Response could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl StoreError {
    /// Check if the document was missing
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if rerunning the whole transaction may succeed
    ///
    /// Only contention qualifies; a transport failure during commit may
    /// already have been applied.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}
