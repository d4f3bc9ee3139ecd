//! Value strategies
//!
//! An [`UpdateType`] is parsed once from configuration; a [`ValueStrategy`]
//! binds it to the run-start timestamp and hands out one value per update
//! attempt.

use crate::error::ConfigError;
use crate::types::FieldValue;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Configured value mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateType {
    /// Store-native increment by one
    #[default]
    Increment,
    /// Wall clock at the moment each document is updated
    CurrentTimestamp,
    /// One timestamp taken before the run, shared by every document
    StartTimestamp,
}

impl UpdateType {
    /// Canonical configuration spelling
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increment => "INCREMENT",
            Self::CurrentTimestamp => "CURRENT_TIMESTAMP",
            Self::StartTimestamp => "START_TIMESTAMP",
        }
    }
}

impl FromStr for UpdateType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "" | "INCREMENT" => Ok(Self::Increment),
            "CURRENT_TIMESTAMP" => Ok(Self::CurrentTimestamp),
            "START_TIMESTAMP" => Ok(Self::StartTimestamp),
            _ => Err(ConfigError::UnknownUpdateType(s.to_string())),
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value mode bound to a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueStrategy {
    /// Atomic increment by one
    Increment,
    /// Fresh timestamp per attempt
    CurrentTimestamp,
    /// Fixed timestamp captured at run start
    StartTimestamp(DateTime<Utc>),
}

impl ValueStrategy {
    /// Bind an update type to the run, capturing `now` for the start-timestamp mode
    #[must_use]
    pub fn resolve(update_type: UpdateType, now: DateTime<Utc>) -> Self {
        match update_type {
            UpdateType::Increment => Self::Increment,
            UpdateType::CurrentTimestamp => Self::CurrentTimestamp,
            UpdateType::StartTimestamp => Self::StartTimestamp(now),
        }
    }

    /// Value for one update attempt; call it when the update is issued
    #[must_use]
    pub fn value(&self) -> FieldValue {
        match self {
            Self::Increment => FieldValue::Increment(1),
            Self::CurrentTimestamp => FieldValue::Timestamp(Utc::now()),
            Self::StartTimestamp(ts) => FieldValue::Timestamp(*ts),
        }
    }
}
