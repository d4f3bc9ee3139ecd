//! Core types for the sweep engine
//!
//! Defines the data model shared by every component:
//! - Document references and snapshots
//! - Field paths and the values written into them
//! - Validated run settings

use crate::error::ConfigError;
use crate::strategy::UpdateType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique run identifier (ULID for sortability across log files)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable reference to one document
///
/// The path is whatever the store uses to address the document; the id is
/// its last segment. Used both as pagination cursor and as update target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    path: String,
}

impl DocumentRef {
    /// Create reference from a full document path
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Create reference from collection and document id
    #[must_use]
    pub fn in_collection(collection: &str, id: &str) -> Self {
        Self::new(format!("{collection}/{id}"))
    }

    /// Full document path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Document id (last path segment)
    #[must_use]
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// One document as returned by a page fetch
///
/// `data` is the store's own encoding of the document body; the engine
/// never looks inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Document reference
    pub reference: DocumentRef,
    /// Store-encoded document body
    pub data: serde_json::Value,
}

impl DocumentSnapshot {
    /// Create snapshot
    #[inline]
    #[must_use]
    pub fn new(reference: DocumentRef, data: serde_json::Value) -> Self {
        Self { reference, data }
    }
}

/// Dotted path to a (possibly nested) field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Path segments, outermost first
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment (the field actually written)
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }
}

impl FromStr for FieldPath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidFieldPath {
            path: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Missing("field path"));
        }
        if trimmed.contains('/') {
            return Err(invalid("'/' is not allowed in a field path"));
        }

        let segments: Vec<String> = trimmed.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(invalid("empty path segment"));
        }
        if segments.iter().any(|seg| seg.starts_with("__") && seg.ends_with("__")) {
            return Err(invalid("reserved field name"));
        }

        Ok(Self { segments })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Value written into the target field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    /// Store-native atomic increment; never a plain number
    Increment(i64),
    /// Absolute UTC timestamp
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increment(by) => write!(f, "increment({by})"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// Update discipline for a single document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Unconditional field write
    #[default]
    Direct,
    /// Transactional existence check, then write
    Atomic,
}

impl UpdateMode {
    /// Map the boolean `ATOMIC_UPDATES` flag
    #[inline]
    #[must_use]
    pub fn from_atomic_flag(atomic: bool) -> Self {
        if atomic {
            Self::Atomic
        } else {
            Self::Direct
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Atomic => f.write_str("atomic"),
        }
    }
}

/// Default page size
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default sustained updates per second
pub const DEFAULT_RATE_LIMIT: f64 = 50.0;

/// Validated, read-only settings consumed by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Collection to scan
    pub collection: String,
    /// Field to mutate
    pub field: FieldPath,
    /// Page size
    pub batch_size: usize,
    /// Sustained updates per second
    pub rate_limit: f64,
    /// Update discipline
    pub update_mode: UpdateMode,
    /// Value strategy
    pub update_type: UpdateType,
}

impl Settings {
    /// Create settings with defaults for everything but the target
    ///
    /// # Errors
    /// Returns `ConfigError` if the collection or field path is invalid
    pub fn new(collection: impl Into<String>, field: &str) -> Result<Self, ConfigError> {
        let settings = Self {
            collection: collection.into(),
            field: field.parse()?,
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit: DEFAULT_RATE_LIMIT,
            update_mode: UpdateMode::default(),
            update_type: UpdateType::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// With page size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With rate limit
    #[inline]
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: f64) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// With update discipline
    #[inline]
    #[must_use]
    pub fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    /// With value strategy
    #[inline]
    #[must_use]
    pub fn with_update_type(mut self, update_type: UpdateType) -> Self {
        self.update_type = update_type;
        self
    }

    /// Check every invariant the engine relies on
    ///
    /// # Errors
    /// Returns the first violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        let collection = self.collection.trim();
        if collection.is_empty() {
            return Err(ConfigError::Missing("collection"));
        }
        if collection.contains('/') || collection != self.collection {
            return Err(ConfigError::InvalidCollection(self.collection.clone()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if !self.rate_limit.is_finite() || self.rate_limit <= 0.0 {
            return Err(ConfigError::InvalidRate(self.rate_limit));
        }
        Ok(())
    }
}
