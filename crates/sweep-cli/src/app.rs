//! Wires a resolved configuration to a store and runs the sweep

use crate::config::{Backend, RunConfig};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use sweep_core::{DocumentStore, MemoryStore, PaginationDriver, RunSummary, SweepError};
use sweep_firestore::FirestoreStore;

/// Construct the configured store
///
/// # Errors
/// Fails if the seed file cannot be loaded or the HTTP client cannot be built
pub fn build_store(backend: &Backend) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match backend {
        Backend::Firestore(config) => {
            tracing::info!(
                project = %config.project_id,
                database = %config.database_id,
                emulator = config.emulator_host.as_deref().unwrap_or("-"),
                "using firestore backend"
            );
            let store = FirestoreStore::new(config.clone()).context("failed to create firestore client")?;
            Ok(Arc::new(store))
        }
        Backend::Memory { seed_file } => {
            let store = match seed_file {
                Some(path) => load_seed(path)?,
                None => MemoryStore::new(),
            };
            tracing::info!(seed = ?seed_file, "using in-memory backend");
            Ok(Arc::new(store))
        }
    }
}

fn load_seed(path: &Path) -> anyhow::Result<MemoryStore> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("seed file {} is not valid JSON", path.display()))?;
    MemoryStore::from_json(&value).with_context(|| format!("invalid seed file {}", path.display()))
}

/// Run one sweep; Ctrl-C cancels it
///
/// # Errors
/// Returns the run-level error that aborted the sweep
pub async fn run(config: RunConfig, store: Arc<dyn DocumentStore>) -> Result<RunSummary, SweepError> {
    let mut driver = PaginationDriver::new(store, config.settings)?;
    if let Some(timeout) = config.timeout {
        driver = driver.with_deadline(timeout);
    }

    let cancel = driver.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let result = driver.run().await;
    ctrl_c.abort();
    result
}
