//! Coverage and sequencing of the page loop
//!
//! Run with: cargo test --package sweep-core --test pagination_tests

use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use sweep_core::prelude::*;
use sweep_core::PageOrder;
use sweep_test_utils::{doc_id, seeded_store, RecordingStore, StoreEvent, COLLECTION};

fn settings(batch: usize, rate: f64) -> Settings {
    Settings::new(COLLECTION, "n")
        .unwrap()
        .with_batch_size(batch)
        .with_rate_limit(rate)
}

#[tokio::test]
async fn sweeps_250_documents_in_three_pages() {
    let store = seeded_store(250);
    let recording = Arc::new(RecordingStore::new(store.clone()));

    let summary = PaginationDriver::new(recording.clone(), settings(100, 1000.0))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(recording.fetch_sizes(), vec![100, 100, 50, 0]);
    assert_eq!(summary.fetches, 4);
    assert_eq!(summary.pages, 3);
    assert_eq!(summary.documents, 250);
    assert_eq!(summary.applied, 250);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.failed, 0);

    let updated = recording.updated_ids();
    let unique: HashSet<_> = updated.iter().collect();
    assert_eq!(updated.len(), 250);
    assert_eq!(unique.len(), 250);

    for (_, doc) in store.documents(COLLECTION) {
        assert_eq!(doc["n"], json!(1));
    }
}

#[tokio::test]
async fn exact_multiple_needs_a_terminal_empty_fetch() {
    let store = seeded_store(20);
    let recording = Arc::new(RecordingStore::new(store));

    let summary = PaginationDriver::new(recording.clone(), settings(10, 1000.0))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(recording.fetch_sizes(), vec![10, 10, 0]);
    assert_eq!(summary.pages, 2);
}

#[tokio::test]
async fn cursor_is_last_document_of_previous_page() {
    let recording = Arc::new(RecordingStore::new(seeded_store(7)));

    PaginationDriver::new(recording.clone(), settings(3, 1000.0))
        .unwrap()
        .run()
        .await
        .unwrap();

    let fetches: Vec<_> = recording
        .events()
        .into_iter()
        .filter_map(|e| match e {
            StoreEvent::Fetch { after, returned } => Some((after, returned)),
            _ => None,
        })
        .collect();

    assert_eq!(fetches[0].0, None);
    for pair in fetches.windows(2) {
        let (_, previous_page) = &pair[0];
        let (cursor, page) = &pair[1];
        assert_eq!(cursor.as_ref(), previous_page.last());
        // Strictly after the cursor, no overlap
        assert!(page.iter().all(|id| Some(id) > cursor.as_ref()));
    }
}

#[tokio::test(start_paused = true)]
async fn next_fetch_waits_for_page_to_drain() {
    let recording = Arc::new(
        RecordingStore::new(seeded_store(12)).with_write_delay(Duration::from_millis(50)),
    );

    PaginationDriver::new(recording.clone(), settings(4, 1000.0))
        .unwrap()
        .run()
        .await
        .unwrap();

    // Every update that started before a fetch also ended before it
    let mut open: HashSet<String> = HashSet::new();
    for event in recording.events() {
        match event {
            StoreEvent::UpdateStart(id) => {
                open.insert(id);
            }
            StoreEvent::UpdateEnd(id) => {
                open.remove(&id);
            }
            StoreEvent::Fetch { .. } => assert!(open.is_empty(), "fetch overlapped {open:?}"),
        }
    }
    assert!(open.is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_bounded_by_page_size() {
    let recording = Arc::new(
        RecordingStore::new(seeded_store(30)).with_write_delay(Duration::from_millis(100)),
    );

    PaginationDriver::new(recording.clone(), settings(5, 1000.0))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(recording.max_in_flight(), 5);
}

#[tokio::test]
async fn insertion_order_store_is_fully_covered() {
    let store = Arc::new(MemoryStore::new().with_order(PageOrder::Insertion));
    for i in (0..15).rev() {
        store.insert(COLLECTION, &doc_id(i), json!({ "n": 10 })).unwrap();
    }
    let recording = Arc::new(RecordingStore::new(store.clone()));

    let summary = PaginationDriver::new(recording.clone(), settings(4, 1000.0))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.applied, 15);
    assert_eq!(recording.fetch_sizes(), vec![4, 4, 4, 3, 0]);
    for (_, doc) in store.documents(COLLECTION) {
        assert_eq!(doc["n"], json!(11));
    }
}

#[tokio::test]
async fn increment_runs_are_additive() {
    let store = seeded_store(40);

    for _ in 0..2 {
        PaginationDriver::new(store.clone(), settings(16, 1000.0))
            .unwrap()
            .run()
            .await
            .unwrap();
    }

    for (_, doc) in store.documents(COLLECTION) {
        assert_eq!(doc["n"], json!(2));
    }
}

#[tokio::test]
async fn only_the_target_field_changes() {
    let store = seeded_store(5);
    let settings = Settings::new(COLLECTION, "meta.touched_at")
        .unwrap()
        .with_update_type(UpdateType::CurrentTimestamp)
        .with_rate_limit(1000.0);

    PaginationDriver::new(store.clone(), settings)
        .unwrap()
        .run()
        .await
        .unwrap();

    for (id, doc) in store.documents(COLLECTION) {
        assert_eq!(doc["n"], json!(0));
        assert_eq!(doc["label"], json!(id));
        assert!(doc["meta"]["touched_at"].is_string());
    }
}
