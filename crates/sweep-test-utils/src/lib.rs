//! Testing utilities for the sweep workspace
//!
//! Shared fixtures and store wrappers that inject the failure modes the
//! engine has to survive.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sweep_core::{
    ConditionalOutcome, DocumentRef, DocumentSnapshot, DocumentStore, FieldPath, FieldValue,
    MemoryStore, StoreError,
};
use tokio::time::Instant;

pub const COLLECTION: &str = "items";

/// Zero-padded id so id order matches numeric order
pub fn doc_id(i: usize) -> String {
    format!("doc{i:05}")
}

/// Store with `count` documents `{ "n": 0, "label": <id> }`
pub fn seeded_store(count: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for i in 0..count {
        let id = doc_id(i);
        store
            .insert(COLLECTION, &id, json!({ "n": 0, "label": id }))
            .expect("object body");
    }
    store
}

/// Everything a [`RecordingStore`] observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Fetch { after: Option<String>, returned: Vec<String> },
    UpdateStart(String),
    UpdateEnd(String),
}

/// Pass-through store that records calls, timing and concurrency
#[derive(Debug)]
pub struct RecordingStore<S> {
    inner: S,
    write_delay: Duration,
    events: Mutex<Vec<StoreEvent>>,
    update_starts: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl<S: DocumentStore> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            write_delay: Duration::ZERO,
            events: Mutex::new(Vec::new()),
            update_starts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every write open for `delay`
    #[must_use]
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    /// Page sizes in fetch order
    pub fn fetch_sizes(&self) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StoreEvent::Fetch { returned, .. } => Some(returned.len()),
                _ => None,
            })
            .collect()
    }

    /// Ids of every document whose update started, in start order
    pub fn updated_ids(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StoreEvent::UpdateStart(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn update_starts(&self) -> Vec<Instant> {
        self.update_starts.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn track<T>(&self, doc: &DocumentRef, write: impl std::future::Future<Output = T>) -> T {
        let id = doc.id().to_string();
        self.update_starts.lock().push(Instant::now());
        self.events.lock().push(StoreEvent::UpdateStart(id.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        let result = write.await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().push(StoreEvent::UpdateEnd(id));
        result
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for RecordingStore<S> {
    async fn fetch_page(
        &self,
        collection: &str,
        after: Option<&DocumentRef>,
        limit: usize,
    ) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let page = self.inner.fetch_page(collection, after, limit).await?;
        self.events.lock().push(StoreEvent::Fetch {
            after: after.map(|c| c.id().to_string()),
            returned: page.iter().map(|s| s.reference.id().to_string()).collect(),
        });
        Ok(page)
    }

    async fn update_field(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<(), StoreError> {
        self.track(doc, self.inner.update_field(doc, field, value)).await
    }

    async fn update_field_if_exists(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<ConditionalOutcome, StoreError> {
        self.track(doc, self.inner.update_field_if_exists(doc, field, value))
            .await
    }
}

/// Deletes chosen documents right after they were handed out in a page,
/// before their update runs
#[derive(Debug)]
pub struct DeletingStore {
    inner: Arc<MemoryStore>,
    doomed: Mutex<HashSet<String>>,
}

impl DeletingStore {
    pub fn new(inner: Arc<MemoryStore>, doomed: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner,
            doomed: Mutex::new(doomed.into_iter().collect()),
        }
    }
}

#[async_trait]
impl DocumentStore for DeletingStore {
    async fn fetch_page(
        &self,
        collection: &str,
        after: Option<&DocumentRef>,
        limit: usize,
    ) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let page = self.inner.fetch_page(collection, after, limit).await?;
        let mut doomed = self.doomed.lock();
        for snapshot in &page {
            if doomed.remove(snapshot.reference.id()) {
                self.inner.delete(&snapshot.reference);
            }
        }
        Ok(page)
    }

    async fn update_field(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<(), StoreError> {
        self.inner.update_field(doc, field, value).await
    }

    async fn update_field_if_exists(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<ConditionalOutcome, StoreError> {
        self.inner.update_field_if_exists(doc, field, value).await
    }
}

/// Fails the n-th fetch (one-based) and writes to chosen documents
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_fetch: Option<usize>,
    failing_docs: HashSet<String>,
    fetches: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_fetch: None,
            failing_docs: HashSet::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn fail_fetch(mut self, n: usize) -> Self {
        self.fail_fetch = Some(n);
        self
    }

    #[must_use]
    pub fn fail_writes_to(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.failing_docs.extend(ids);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_write(&self, doc: &DocumentRef) -> Result<(), StoreError> {
        if self.failing_docs.contains(doc.id()) {
            return Err(StoreError::Rejected {
                status: "PERMISSION_DENIED".into(),
                message: format!("writes to {doc} are not allowed"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn fetch_page(
        &self,
        collection: &str,
        after: Option<&DocumentRef>,
        limit: usize,
    ) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_fetch == Some(n) {
            return Err(StoreError::Transport("connection reset by peer".into()));
        }
        self.inner.fetch_page(collection, after, limit).await
    }

    async fn update_field(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<(), StoreError> {
        self.check_write(doc)?;
        self.inner.update_field(doc, field, value).await
    }

    async fn update_field_if_exists(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<ConditionalOutcome, StoreError> {
        self.check_write(doc)?;
        self.inner.update_field_if_exists(doc, field, value).await
    }
}
