//! Pagination driver
//!
//! The top-level loop of a sweep:
//! 1. Fetch the page after the cursor; an empty page ends the run
//! 2. For each document, take a limiter token and launch its update
//! 3. Wait for every update of the page to finish
//! 4. Advance the cursor to the page's last document and repeat
//!
//! Pages never overlap: the next fetch starts only after the current page's
//! join set has drained. A fetch error or a cancelled limiter wait aborts the
//! run; updates already launched for the current page are allowed to finish
//! first.

use crate::error::SweepError;
use crate::executor::{MutationExecutor, MutationOutcome};
use crate::fetcher::{Page, PageFetcher};
use crate::limiter::RateLimiter;
use crate::store::DocumentStore;
use crate::strategy::ValueStrategy;
use crate::types::{DocumentRef, RunId, Settings};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Driver states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Requesting the next page
    Fetching,
    /// Launching updates for the current page
    Dispatching,
    /// Waiting for the current page to drain
    AwaitingPage,
    /// Collection exhausted
    Done,
    /// Stopped on a fatal error
    Aborted,
}

/// Outcome counts for one page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    /// One-based page index
    pub page: u64,
    /// Documents in the page
    pub documents: u64,
    /// Updates applied
    pub applied: u64,
    /// Documents skipped because they no longer existed
    pub skipped: u64,
    /// Updates that failed
    pub failed: u64,
}

impl PageSummary {
    fn new(page: &Page) -> Self {
        Self {
            page: page.index,
            documents: page.len() as u64,
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: &MutationOutcome) {
        match outcome {
            MutationOutcome::Applied => self.applied += 1,
            MutationOutcome::SkippedNotFound => self.skipped += 1,
            MutationOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Outcome counts for a whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Run identifier
    pub run_id: RunId,
    /// Fetch calls issued, the terminating empty one included
    pub fetches: u64,
    /// Non-empty pages processed
    pub pages: u64,
    /// Documents visited
    pub documents: u64,
    /// Updates applied
    pub applied: u64,
    /// Documents skipped because they no longer existed
    pub skipped: u64,
    /// Updates that failed
    pub failed: u64,
    /// Wall time of the run
    pub elapsed_ms: u64,
}

impl RunSummary {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            fetches: 0,
            pages: 0,
            documents: 0,
            applied: 0,
            skipped: 0,
            failed: 0,
            elapsed_ms: 0,
        }
    }

    fn absorb(&mut self, page: &PageSummary) {
        self.pages += 1;
        self.documents += page.documents;
        self.applied += page.applied;
        self.skipped += page.skipped;
        self.failed += page.failed;
    }

    /// Check if no update failed
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Cancels the run token when the deadline passes
struct DeadlineGuard {
    handle: tokio::task::JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl DeadlineGuard {
    fn arm(deadline: Duration, token: CancellationToken) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(deadline) => {
                    flag.store(true, Ordering::SeqCst);
                    token.cancel();
                }
                () = token.cancelled() => {}
            }
        });
        Self { handle, fired }
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Owns the cursor, the limiter and the page loop of one sweep
pub struct PaginationDriver {
    settings: Settings,
    fetcher: PageFetcher,
    executor: MutationExecutor,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
    deadline: Option<Duration>,
    run_id: RunId,
}

impl PaginationDriver {
    /// Create driver over `store`
    ///
    /// # Errors
    /// Returns `SweepError::Config` if `settings` fails validation
    pub fn new(store: Arc<dyn DocumentStore>, settings: Settings) -> Result<Self, SweepError> {
        settings.validate()?;

        Ok(Self {
            fetcher: PageFetcher::new(Arc::clone(&store), settings.collection.clone(), settings.batch_size),
            executor: MutationExecutor::new(store, settings.field.clone(), settings.update_mode),
            limiter: Arc::new(RateLimiter::new(settings.rate_limit)),
            cancel: CancellationToken::new(),
            deadline: None,
            run_id: RunId::new(),
            settings,
        })
    }

    /// With external cancellation token
    #[inline]
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// With global deadline
    #[inline]
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// With a pre-built limiter
    #[inline]
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Token that cancels this run
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run identifier
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Settings in effect
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sweep the whole collection
    ///
    /// # Errors
    /// - `SweepError::Fetch` if a page cannot be fetched
    /// - `SweepError::Cancelled` if the run is cancelled while fetching or waiting for the limiter
    /// - `SweepError::Timeout` if the deadline cancelled the run
    pub async fn run(self) -> Result<RunSummary, SweepError> {
        let span = tracing::info_span!(
            "sweep",
            run_id = %self.run_id,
            collection = %self.settings.collection,
            field = %self.settings.field,
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> Result<RunSummary, SweepError> {
        let started = Instant::now();
        let token = self.cancel.child_token();
        let deadline = self
            .deadline
            .map(|d| (d, DeadlineGuard::arm(d, token.clone())));

        tracing::info!(
            batch_size = self.settings.batch_size,
            rate_limit = self.settings.rate_limit,
            mode = %self.settings.update_mode,
            update_type = %self.settings.update_type,
            "starting sweep"
        );

        // Captured once, before the first fetch
        let strategy = ValueStrategy::resolve(self.settings.update_type, Utc::now());

        let mut summary = RunSummary::new(self.run_id);
        let mut cursor: Option<DocumentRef> = None;
        let mut state = DriverState::Fetching;

        let result = loop {
            debug_assert_eq!(state, DriverState::Fetching);

            if token.is_cancelled() {
                break Err(SweepError::Cancelled);
            }

            let fetched = tokio::select! {
                biased;
                () = token.cancelled() => Err(SweepError::Cancelled),
                page = self.fetcher.next_page(summary.fetches + 1, cursor.as_ref()) => page,
            };
            let page = match fetched {
                Ok(page) => page,
                Err(e) => break Err(e),
            };
            summary.fetches += 1;

            if page.is_empty() {
                tracing::info!("no more documents, exiting");
                state = transition(state, DriverState::Done);
                break Ok(());
            }

            state = transition(state, DriverState::Dispatching);
            let page_summary = match self.process_page(&page, strategy, &token, &mut state).await {
                Ok(page_summary) => page_summary,
                Err(e) => break Err(e),
            };
            summary.absorb(&page_summary);

            // Only after the page drained
            cursor = page.last_ref().cloned();
            state = transition(state, DriverState::Fetching);
        };

        summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(()) => {
                tracing::info!(
                    pages = summary.pages,
                    documents = summary.documents,
                    applied = summary.applied,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    elapsed_ms = summary.elapsed_ms,
                    "sweep complete"
                );
                Ok(summary)
            }
            Err(e) => {
                transition(state, DriverState::Aborted);
                let e = match deadline.as_ref() {
                    Some((d, guard)) if guard.fired() && matches!(e, SweepError::Cancelled) => {
                        SweepError::Timeout(*d)
                    }
                    _ => e,
                };
                tracing::error!(
                    error = %e,
                    cursor = cursor.as_ref().map(DocumentRef::path),
                    pages = summary.pages,
                    documents = summary.documents,
                    "sweep aborted"
                );
                Err(e)
            }
        }
    }

    /// Dispatch every document of `page` and wait for all of them
    async fn process_page(
        &self,
        page: &Page,
        strategy: ValueStrategy,
        token: &CancellationToken,
        state: &mut DriverState,
    ) -> Result<PageSummary, SweepError> {
        let mut tasks = JoinSet::new();
        let mut aborted = None;

        for snapshot in &page.documents {
            if let Err(e) = self.limiter.acquire(token).await {
                aborted = Some(e);
                break;
            }

            let executor = self.executor.clone();
            let doc = snapshot.reference.clone();
            tasks.spawn(
                async move {
                    // Issued now, so CURRENT_TIMESTAMP is per document
                    let value = strategy.value();
                    executor.apply(&doc, value).await
                }
                .in_current_span(),
            );
        }

        *state = transition(*state, DriverState::AwaitingPage);

        let mut page_summary = PageSummary::new(page);
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "update task did not complete");
                MutationOutcome::Failed(e.to_string())
            });
            page_summary.record(&outcome);
        }

        if let Some(e) = aborted {
            return Err(e);
        }

        tracing::info!(
            page = page_summary.page,
            documents = page_summary.documents,
            applied = page_summary.applied,
            skipped = page_summary.skipped,
            failed = page_summary.failed,
            "processed page"
        );
        metrics::counter!("sweep_pages_total").increment(1);

        Ok(page_summary)
    }
}

impl std::fmt::Debug for PaginationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginationDriver")
            .field("run_id", &self.run_id)
            .field("settings", &self.settings)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

fn transition(from: DriverState, to: DriverState) -> DriverState {
    tracing::trace!(?from, ?to, "driver state");
    to
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{ConditionalOutcome, MemoryStore};
    use crate::strategy::UpdateType;
    use crate::types::{FieldPath, FieldValue, UpdateMode};
    use serde_json::json;

    fn store_with(count: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..count {
            store.insert("items", &format!("doc{i:04}"), json!({ "n": 0 })).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn rejects_invalid_settings() {
        let settings = Settings::new("items", "n").unwrap().with_batch_size(0);
        let err = PaginationDriver::new(store_with(0), settings).unwrap_err();
        assert!(matches!(err, SweepError::Config(_)));
    }

    #[tokio::test]
    async fn empty_collection_finishes_after_one_fetch() {
        let settings = Settings::new("items", "n").unwrap();
        let summary = PaginationDriver::new(store_with(0), settings)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(summary.fetches, 1);
        assert_eq!(summary.pages, 0);
        assert_eq!(summary.documents, 0);
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn increments_every_document_once() {
        let store = store_with(25);
        let settings = Settings::new("items", "n")
            .unwrap()
            .with_batch_size(10)
            .with_rate_limit(1000.0);

        let summary = PaginationDriver::new(store.clone(), settings)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(summary.fetches, 4);
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.applied, 25);
        for (_, doc) in store.documents("items") {
            assert_eq!(doc["n"], json!(1));
        }
    }

    #[tokio::test]
    async fn start_timestamp_is_shared_by_all_documents() {
        let store = store_with(7);
        let settings = Settings::new("items", "touched")
            .unwrap()
            .with_batch_size(3)
            .with_rate_limit(1000.0)
            .with_update_mode(UpdateMode::Atomic)
            .with_update_type(UpdateType::StartTimestamp);

        PaginationDriver::new(store.clone(), settings)
            .unwrap()
            .run()
            .await
            .unwrap();

        let values: Vec<_> = store
            .documents("items")
            .into_iter()
            .map(|(_, doc)| doc["touched"].clone())
            .collect();
        assert_eq!(values.len(), 7);
        assert!(values[0].is_string());
        assert!(values.iter().all(|v| *v == values[0]));
    }

    #[tokio::test]
    async fn pre_cancelled_run_aborts_before_fetching() {
        let settings = Settings::new("items", "n").unwrap();
        let driver = PaginationDriver::new(store_with(3), settings).unwrap();
        driver.cancellation_token().cancel();

        assert!(matches!(driver.run().await, Err(SweepError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_cancellation_into_timeout() {
        let store = store_with(20);
        let settings = Settings::new("items", "n")
            .unwrap()
            .with_batch_size(20)
            .with_rate_limit(1.0);

        let err = PaginationDriver::new(store.clone(), settings)
            .unwrap()
            .with_deadline(Duration::from_millis(2500))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SweepError::Timeout(d) if d == Duration::from_millis(2500)));

        // 1 burst token + 1/s: documents launched before the deadline still landed
        let applied = store
            .documents("items")
            .iter()
            .filter(|(_, doc)| doc["n"] == json!(1))
            .count();
        assert_eq!(applied, 3);
    }
    /// Fetches never complete
    struct StalledStore;

    #[async_trait::async_trait]
    impl DocumentStore for StalledStore {
        async fn fetch_page(
            &self,
            _collection: &str,
            _after: Option<&DocumentRef>,
            _limit: usize,
        ) -> Result<Vec<crate::types::DocumentSnapshot>, StoreError> {
            std::future::pending().await
        }

        async fn update_field(
            &self,
            _doc: &DocumentRef,
            _field: &FieldPath,
            _value: FieldValue,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn update_field_if_exists(
            &self,
            _doc: &DocumentRef,
            _field: &FieldPath,
            _value: FieldValue,
        ) -> Result<ConditionalOutcome, StoreError> {
            Ok(ConditionalOutcome::Applied)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_stalled_fetch() {
        let settings = Settings::new("items", "n").unwrap();
        let driver = PaginationDriver::new(Arc::new(StalledStore), settings).unwrap();
        let cancel = driver.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });

        let started = tokio::time::Instant::now();
        assert!(matches!(driver.run().await, Err(SweepError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_a_stalled_fetch() {
        let settings = Settings::new("items", "n").unwrap();
        let err = PaginationDriver::new(Arc::new(StalledStore), settings)
            .unwrap()
            .with_deadline(Duration::from_secs(2))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SweepError::Timeout(d) if d == Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn vanishing_rate_ends_in_timeout() {
        let store = store_with(2);
        let settings = Settings::new("items", "n")
            .unwrap()
            .with_rate_limit(1e-20);
        settings.validate().unwrap();

        let err = PaginationDriver::new(store.clone(), settings)
            .unwrap()
            .with_deadline(Duration::from_secs(1))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SweepError::Timeout(_)));
        assert_eq!(store.get("items", "doc0000").unwrap()["n"], json!(1));
        assert_eq!(store.get("items", "doc0001").unwrap()["n"], json!(0));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_limiter_spans_runs() {
        let limiter = Arc::new(RateLimiter::new(5.0));
        let settings = Settings::new("items", "n")
            .unwrap()
            .with_rate_limit(5.0);
        let started = tokio::time::Instant::now();

        for _ in 0..2 {
            let summary = PaginationDriver::new(store_with(5), settings.clone())
                .unwrap()
                .with_limiter(Arc::clone(&limiter))
                .run()
                .await
                .unwrap();
            assert_eq!(summary.applied, 5);
        }

        // First run drains the burst; the second waits for 5 refills at 5/s
        assert!(started.elapsed() >= Duration::from_millis(999));
        assert!(started.elapsed() < Duration::from_millis(1100));
    }
}
