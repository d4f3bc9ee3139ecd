//! Mutation executor
//!
//! Applies one document's update under the configured discipline and turns
//! every store response into a [`MutationOutcome`]. Nothing here is fatal to
//! the run: the executor never returns an error, it reports one.

use crate::store::{ConditionalOutcome, DocumentStore};
use crate::types::{DocumentRef, FieldPath, FieldValue, UpdateMode};
use std::fmt;
use std::sync::Arc;

/// Result of one update attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Field written
    Applied,
    /// Document vanished before the transactional read
    SkippedNotFound,
    /// Update failed; the run continues
    Failed(String),
}

impl MutationOutcome {
    /// Short label for logs and metrics
    #[inline]
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::SkippedNotFound => "skipped_not_found",
            Self::Failed(_) => "failed",
        }
    }

    /// Check if the field was written
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl fmt::Display for MutationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Per-document update executor
///
/// Cheap to clone; every in-flight attempt holds its own copy.
#[derive(Clone)]
pub struct MutationExecutor {
    store: Arc<dyn DocumentStore>,
    field: Arc<FieldPath>,
    mode: UpdateMode,
}

impl MutationExecutor {
    /// Create executor writing `field` under `mode`
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, field: FieldPath, mode: UpdateMode) -> Self {
        Self {
            store,
            field: Arc::new(field),
            mode,
        }
    }

    /// Update discipline
    #[inline]
    #[must_use]
    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    /// Target field
    #[inline]
    #[must_use]
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    /// Apply one update and log its outcome
    pub async fn apply(&self, doc: &DocumentRef, value: FieldValue) -> MutationOutcome {
        let outcome = match self.mode {
            UpdateMode::Direct => self.apply_direct(doc, value).await,
            UpdateMode::Atomic => self.apply_atomic(doc, value).await,
        };

        match &outcome {
            MutationOutcome::Applied => {
                tracing::info!(document = %doc, mode = %self.mode, %value, "document updated");
            }
            MutationOutcome::SkippedNotFound => {
                tracing::info!(document = %doc, "document does not exist, skipping update");
            }
            MutationOutcome::Failed(reason) => {
                tracing::warn!(document = %doc, mode = %self.mode, error = %reason, "update failed");
            }
        }
        metrics::counter!("sweep_documents_total", "outcome" => outcome.label()).increment(1);

        outcome
    }

    async fn apply_direct(&self, doc: &DocumentRef, value: FieldValue) -> MutationOutcome {
        // No existence check happened, so not-found is a failure here
        match self.store.update_field(doc, &self.field, value).await {
            Ok(()) => MutationOutcome::Applied,
            Err(e) => MutationOutcome::Failed(format!("direct update failed for {doc}: {e}")),
        }
    }

    async fn apply_atomic(&self, doc: &DocumentRef, value: FieldValue) -> MutationOutcome {
        match self.store.update_field_if_exists(doc, &self.field, value).await {
            Ok(ConditionalOutcome::Applied) => MutationOutcome::Applied,
            Ok(ConditionalOutcome::NotFound) => MutationOutcome::SkippedNotFound,
            Err(e) => MutationOutcome::Failed(format!("transaction failed for {doc}: {e}")),
        }
    }
}

impl fmt::Debug for MutationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationExecutor")
            .field("field", &self.field)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
