//! Read-check-then-write transaction loop
//!
//! The RPCs live behind [`TransactionOps`]; this module owns the decisions:
//! a missing document rolls back and reports `NotFound`, other read errors roll
//! back and fail, and contention reruns the whole transaction with backoff.

use async_trait::async_trait;
use std::time::Duration;
use sweep_core::{ConditionalOutcome, DocumentRef, FieldPath, FieldValue, StoreError};

const BASE_BACKOFF: Duration = Duration::from_millis(100);
/// Backoff ceiling between transaction attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Transaction RPCs of a document store
#[async_trait]
pub trait TransactionOps: Send + Sync {
    /// Start a read-write transaction, optionally retrying `previous`
    async fn begin(&self, previous: Option<&str>) -> Result<String, StoreError>;

    /// Read `doc` inside `transaction`; `NotFound` if it does not exist
    async fn read(&self, doc: &DocumentRef, transaction: &str) -> Result<(), StoreError>;

    /// Commit the field write inside `transaction`
    async fn commit(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
        transaction: &str,
    ) -> Result<(), StoreError>;

    /// Release `transaction` without writing; failures are only logged
    async fn rollback(&self, transaction: &str);
}

/// Delay before attempt `attempt + 1`
#[must_use]
pub fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF
        .saturating_mul(1 << attempt.min(16))
        .min(MAX_BACKOFF)
}

/// Run one conditional update, rerunning the transaction on contention
///
/// # Errors
/// Returns the last attempt's error once it is not retryable or
/// `max_attempts` is spent
pub async fn update_if_exists<T: TransactionOps + ?Sized>(
    ops: &T,
    doc: &DocumentRef,
    field: &FieldPath,
    value: FieldValue,
    max_attempts: u32,
) -> Result<ConditionalOutcome, StoreError> {
    let max_attempts = max_attempts.max(1);
    let mut previous: Option<String> = None;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let transaction = ops.begin(previous.as_deref()).await?;

        match attempt_once(ops, doc, field, value, &transaction).await {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff(attempt - 1);
                tracing::debug!(
                    document = %doc,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "transaction aborted, retrying"
                );
                tokio::time::sleep(delay).await;
                previous = Some(transaction);
            }
            result => return result,
        }
    }
}

async fn attempt_once<T: TransactionOps + ?Sized>(
    ops: &T,
    doc: &DocumentRef,
    field: &FieldPath,
    value: FieldValue,
    transaction: &str,
) -> Result<ConditionalOutcome, StoreError> {
    match ops.read(doc, transaction).await {
        Ok(()) => {}
        Err(StoreError::NotFound(_)) => {
            ops.rollback(transaction).await;
            return Ok(ConditionalOutcome::NotFound);
        }
        Err(e) => {
            ops.rollback(transaction).await;
            return Err(e);
        }
    }

    ops.commit(doc, field, value, transaction)
        .await
        .map(|()| ConditionalOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Begin(Option<String>),
        Read(String),
        Commit(String),
        Rollback(String),
    }

    /// Replays canned read and commit results, numbering transactions tx1, tx2, ...
    #[derive(Default)]
    struct Scripted {
        reads: Mutex<VecDeque<Result<(), StoreError>>>,
        commits: Mutex<VecDeque<Result<(), StoreError>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl Scripted {
        fn reads(self, results: impl IntoIterator<Item = Result<(), StoreError>>) -> Self {
            self.reads.lock().extend(results);
            self
        }

        fn commits(self, results: impl IntoIterator<Item = Result<(), StoreError>>) -> Self {
            self.commits.lock().extend(results);
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn begins(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Begin(_)))
                .count()
        }
    }

    #[async_trait]
    impl TransactionOps for Scripted {
        async fn begin(&self, previous: Option<&str>) -> Result<String, StoreError> {
            let mut calls = self.calls.lock();
            calls.push(Call::Begin(previous.map(str::to_string)));
            let n = calls.iter().filter(|c| matches!(c, Call::Begin(_))).count();
            Ok(format!("tx{n}"))
        }

        async fn read(&self, _doc: &DocumentRef, transaction: &str) -> Result<(), StoreError> {
            self.calls.lock().push(Call::Read(transaction.to_string()));
            self.reads.lock().pop_front().unwrap_or(Ok(()))
        }

        async fn commit(
            &self,
            _doc: &DocumentRef,
            _field: &FieldPath,
            _value: FieldValue,
            transaction: &str,
        ) -> Result<(), StoreError> {
            self.calls.lock().push(Call::Commit(transaction.to_string()));
            self.commits.lock().pop_front().unwrap_or(Ok(()))
        }

        async fn rollback(&self, transaction: &str) {
            self.calls.lock().push(Call::Rollback(transaction.to_string()));
        }
    }

    fn aborted() -> StoreError {
        StoreError::Aborted("too much contention".into())
    }

    async fn run(ops: &Scripted, max_attempts: u32) -> Result<ConditionalOutcome, StoreError> {
        let doc = DocumentRef::new("projects/p/databases/(default)/documents/users/alice");
        let field: FieldPath = "visits".parse().unwrap();
        update_if_exists(ops, &doc, &field, FieldValue::Increment(1), max_attempts).await
    }

    #[tokio::test]
    async fn existing_document_is_committed() {
        let ops = Scripted::default();
        assert_eq!(run(&ops, 5).await.unwrap(), ConditionalOutcome::Applied);
        assert_eq!(
            ops.calls(),
            vec![
                Call::Begin(None),
                Call::Read("tx1".into()),
                Call::Commit("tx1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_document_rolls_back_and_skips() {
        let ops = Scripted::default().reads([Err(StoreError::NotFound("users/alice".into()))]);

        assert_eq!(run(&ops, 5).await.unwrap(), ConditionalOutcome::NotFound);
        assert_eq!(
            ops.calls(),
            vec![
                Call::Begin(None),
                Call::Read("tx1".into()),
                Call::Rollback("tx1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_read_rolls_back_and_fails() {
        let ops = Scripted::default().reads([Err(StoreError::Rejected {
            status: "PERMISSION_DENIED".into(),
            message: "no".into(),
        })]);

        assert!(matches!(run(&ops, 5).await, Err(StoreError::Rejected { .. })));
        assert_eq!(ops.calls().last(), Some(&Call::Rollback("tx1".into())));
        assert_eq!(ops.begins(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn contention_then_success_is_applied() {
        let ops = Scripted::default().commits([Err(aborted()), Err(aborted()), Ok(())]);

        assert_eq!(run(&ops, 5).await.unwrap(), ConditionalOutcome::Applied);
        let begins: Vec<_> = ops
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Begin(_)))
            .collect();
        assert_eq!(
            begins,
            vec![
                Call::Begin(None),
                Call::Begin(Some("tx1".into())),
                Call::Begin(Some("tx2".into())),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_contention_gives_up_after_max_attempts() {
        let ops = Scripted::default().commits(std::iter::repeat_with(|| Err(aborted())).take(10));

        let started = tokio::time::Instant::now();
        assert!(matches!(run(&ops, 5).await, Err(StoreError::Aborted(_))));
        assert_eq!(ops.begins(), 5);

        // 100 + 200 + 400 + 800 ms between the five attempts
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn transport_error_is_not_retried() {
        let ops = Scripted::default().commits([Err(StoreError::Transport("reset".into()))]);

        assert!(matches!(run(&ops, 5).await, Err(StoreError::Transport(_))));
        assert_eq!(ops.begins(), 1);
    }

    #[tokio::test]
    async fn single_attempt_budget_does_not_retry() {
        let ops = Scripted::default().commits([Err(aborted())]);

        assert!(matches!(run(&ops, 0).await, Err(StoreError::Aborted(_))));
        assert_eq!(ops.begins(), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff(0), Duration::from_millis(100));
        assert_eq!(backoff(1), Duration::from_millis(200));
        assert_eq!(backoff(3), Duration::from_millis(800));
        assert_eq!(backoff(10), MAX_BACKOFF);
    }
}
