//! In-process document store
//!
//! Mirrors the remote store's update semantics closely enough to run the
//! engine end to end: partial-path updates, store-side increments, and
//! transactional existence checks. Timestamps are stored as RFC 3339 strings
//! with nanosecond precision.

use super::{ConditionalOutcome, DocumentStore};
use crate::error::StoreError;
use crate::types::{DocumentRef, DocumentSnapshot, FieldPath, FieldValue};
use chrono::SecondsFormat;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Stable page order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageOrder {
    /// Document id ascending
    #[default]
    DocumentId,
    /// Order of first insertion
    Insertion,
}

#[derive(Debug, Default)]
struct Collection {
    /// Live documents by id
    docs: BTreeMap<String, Map<String, Value>>,
    /// Live document ids by insertion sequence
    by_seq: BTreeMap<u64, String>,
    /// Sequence of every id ever inserted, deleted ones included, so an
    /// insertion-order cursor survives deletion of its document
    seqs: HashMap<String, u64>,
    next_seq: u64,
}

impl Collection {
    fn insert(&mut self, id: &str, fields: Map<String, Value>) {
        if !self.docs.contains_key(id) {
            let seq = self.next_seq;
            self.next_seq += 1;
            if let Some(old) = self.seqs.insert(id.to_string(), seq) {
                self.by_seq.remove(&old);
            }
            self.by_seq.insert(seq, id.to_string());
        }
        self.docs.insert(id.to_string(), fields);
    }

    fn remove(&mut self, id: &str) -> bool {
        if self.docs.remove(id).is_none() {
            return false;
        }
        if let Some(seq) = self.seqs.get(id) {
            self.by_seq.remove(seq);
        }
        true
    }
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    order: PageOrder,
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    /// Create empty store ordered by document id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With page order
    #[inline]
    #[must_use]
    pub fn with_order(mut self, order: PageOrder) -> Self {
        self.order = order;
        self
    }

    /// Load from `{"collection": {"id": {fields...}}}`
    ///
    /// # Errors
    /// Returns `StoreError::Decode` if the shape does not match
    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let store = Self::new();
        let collections = value
            .as_object()
            .ok_or_else(|| StoreError::Decode("seed must be an object of collections".into()))?;

        for (collection, docs) in collections {
            let docs = docs.as_object().ok_or_else(|| {
                StoreError::Decode(format!("collection {collection:?} must be an object"))
            })?;
            for (id, fields) in docs {
                store.insert(collection, id, fields.clone())?;
            }
        }
        Ok(store)
    }

    /// Insert or replace a document
    ///
    /// # Errors
    /// Returns `StoreError::Decode` if `fields` is not a JSON object
    pub fn insert(&self, collection: &str, id: &str, fields: Value) -> Result<DocumentRef, StoreError> {
        let Value::Object(fields) = fields else {
            return Err(StoreError::Decode(format!(
                "document {collection}/{id} must be an object"
            )));
        };
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id, fields);
        Ok(DocumentRef::in_collection(collection, id))
    }

    /// Delete a document, returning whether it existed
    pub fn delete(&self, doc: &DocumentRef) -> bool {
        let Some((collection, id)) = split_path(doc) else {
            return false;
        };
        self.collections
            .lock()
            .get_mut(collection)
            .is_some_and(|c| c.remove(id))
    }

    /// Current body of a document
    #[must_use]
    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .lock()
            .get(collection)
            .and_then(|c| c.docs.get(id))
            .map(|fields| Value::Object(fields.clone()))
    }

    /// Number of live documents in a collection
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map_or(0, |c| c.docs.len())
    }

    /// Check if a collection has no live documents
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Live document bodies of a collection, in id order
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<(String, Value)> {
        self.collections
            .lock()
            .get(collection)
            .map(|c| {
                c.docs
                    .iter()
                    .map(|(id, fields)| (id.clone(), Value::Object(fields.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn write(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<ConditionalOutcome, StoreError> {
        let (collection, id) = split_path(doc)
            .ok_or_else(|| StoreError::Rejected {
                status: "INVALID_ARGUMENT".into(),
                message: format!("malformed document path {doc}"),
            })?;

        let mut collections = self.collections.lock();
        let Some(fields) = collections
            .get_mut(collection)
            .and_then(|c| c.docs.get_mut(id))
        else {
            return Ok(ConditionalOutcome::NotFound);
        };

        apply_value(fields, field, value);
        Ok(ConditionalOutcome::Applied)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch_page(
        &self,
        collection: &str,
        after: Option<&DocumentRef>,
        limit: usize,
    ) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let collections = self.collections.lock();
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let snapshot = |id: &String, fields: &Map<String, Value>| {
            DocumentSnapshot::new(
                DocumentRef::in_collection(collection, id),
                Value::Object(fields.clone()),
            )
        };

        let page = match self.order {
            PageOrder::DocumentId => {
                let lower = after.map_or(Bound::Unbounded, |c| Bound::Excluded(c.id().to_string()));
                coll.docs
                    .range((lower, Bound::Unbounded))
                    .take(limit)
                    .map(|(id, fields)| snapshot(id, fields))
                    .collect()
            }
            PageOrder::Insertion => {
                let lower = match after {
                    None => Bound::Unbounded,
                    Some(cursor) => {
                        let seq = coll.seqs.get(cursor.id()).ok_or_else(|| StoreError::Rejected {
                            status: "INVALID_ARGUMENT".into(),
                            message: format!("unknown cursor {cursor}"),
                        })?;
                        Bound::Excluded(*seq)
                    }
                };
                coll.by_seq
                    .range((lower, Bound::Unbounded))
                    .filter_map(|(_, id)| coll.docs.get(id).map(|fields| snapshot(id, fields)))
                    .take(limit)
                    .collect()
            }
        };

        Ok(page)
    }

    async fn update_field(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<(), StoreError> {
        match self.write(doc, field, value)? {
            ConditionalOutcome::Applied => Ok(()),
            ConditionalOutcome::NotFound => Err(StoreError::NotFound(doc.path().to_string())),
        }
    }

    async fn update_field_if_exists(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<ConditionalOutcome, StoreError> {
        // The collection lock spans the existence check and the write
        self.write(doc, field, value)
    }
}

fn split_path(doc: &DocumentRef) -> Option<(&str, &str)> {
    doc.path().rsplit_once('/')
}

/// Write `value` at `field`, creating intermediate maps as needed
fn apply_value(fields: &mut Map<String, Value>, field: &FieldPath, value: FieldValue) {
    let (leaf, parents) = match field.segments().split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = fields;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }

    let new_value = match value {
        FieldValue::Increment(by) => increment(current.get(leaf), by),
        FieldValue::Timestamp(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::Nanos, true)),
    };
    current.insert(leaf.clone(), new_value);
}

/// Store-side increment: numbers grow, anything else is replaced by `by`
fn increment(existing: Option<&Value>, by: i64) -> Value {
    match existing {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Value::from(i.saturating_add(by))
            } else if let Some(f) = n.as_f64() {
                #[allow(clippy::cast_precision_loss)]
                let by = by as f64;
                Value::from(f + by)
            } else {
                Value::from(by)
            }
        }
        _ => Value::from(by),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn ids(page: &[DocumentSnapshot]) -> Vec<&str> {
        page.iter().map(|s| s.reference.id()).collect()
    }

    fn seeded(order: PageOrder) -> MemoryStore {
        let store = MemoryStore::new().with_order(order);
        for id in ["d", "b", "a", "c"] {
            store.insert("items", id, json!({ "name": id })).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn pages_by_document_id() {
        let store = seeded(PageOrder::DocumentId);

        let first = store.fetch_page("items", None, 3).await.unwrap();
        assert_eq!(ids(&first), ["a", "b", "c"]);

        let cursor = first.last().unwrap().reference.clone();
        let second = store.fetch_page("items", Some(&cursor), 3).await.unwrap();
        assert_eq!(ids(&second), ["d"]);

        let cursor = second.last().unwrap().reference.clone();
        assert!(store.fetch_page("items", Some(&cursor), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pages_by_insertion_order() {
        let store = seeded(PageOrder::Insertion);

        let first = store.fetch_page("items", None, 2).await.unwrap();
        assert_eq!(ids(&first), ["d", "b"]);

        let cursor = first.last().unwrap().reference.clone();
        let second = store.fetch_page("items", Some(&cursor), 2).await.unwrap();
        assert_eq!(ids(&second), ["a", "c"]);
    }

    #[tokio::test]
    async fn insertion_cursor_survives_deletion() {
        let store = seeded(PageOrder::Insertion);
        let first = store.fetch_page("items", None, 2).await.unwrap();
        let cursor = first.last().unwrap().reference.clone();

        assert!(store.delete(&cursor));
        let second = store.fetch_page("items", Some(&cursor), 10).await.unwrap();
        assert_eq!(ids(&second), ["a", "c"]);
    }

    #[tokio::test]
    async fn missing_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store.fetch_page("nothing", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn increment_touches_only_target_field() {
        let store = MemoryStore::new();
        let doc = store
            .insert("users", "u1", json!({ "name": "ann", "stats": { "visits": 4, "likes": 1 } }))
            .unwrap();
        let field: FieldPath = "stats.visits".parse().unwrap();

        store.update_field(&doc, &field, FieldValue::Increment(1)).await.unwrap();

        assert_eq!(
            store.get("users", "u1").unwrap(),
            json!({ "name": "ann", "stats": { "visits": 5, "likes": 1 } })
        );
    }

    #[tokio::test]
    async fn increment_initialises_missing_or_non_numeric() {
        let store = MemoryStore::new();
        let doc = store.insert("users", "u1", json!({ "label": "x" })).unwrap();

        store
            .update_field(&doc, &"count".parse().unwrap(), FieldValue::Increment(1))
            .await
            .unwrap();
        store
            .update_field(&doc, &"label".parse().unwrap(), FieldValue::Increment(1))
            .await
            .unwrap();
        store
            .update_field(&doc, &"deep.er.count".parse().unwrap(), FieldValue::Increment(1))
            .await
            .unwrap();

        assert_eq!(
            store.get("users", "u1").unwrap(),
            json!({ "label": 1, "count": 1, "deep": { "er": { "count": 1 } } })
        );
    }

    #[tokio::test]
    async fn timestamp_is_written_as_rfc3339() {
        let store = MemoryStore::new();
        let doc = store.insert("users", "u1", json!({})).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        store
            .update_field(&doc, &"seen".parse().unwrap(), FieldValue::Timestamp(ts))
            .await
            .unwrap();

        assert_eq!(
            store.get("users", "u1").unwrap(),
            json!({ "seen": "2024-01-02T03:04:05.000000000Z" })
        );
    }

    #[tokio::test]
    async fn direct_update_of_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let doc = DocumentRef::in_collection("users", "ghost");

        let err = store
            .update_field(&doc, &"count".parse().unwrap(), FieldValue::Increment(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn conditional_update_reports_missing_document() {
        let store = MemoryStore::new();
        let doc = store.insert("users", "u1", json!({})).unwrap();
        let field: FieldPath = "count".parse().unwrap();

        assert_eq!(
            store
                .update_field_if_exists(&doc, &field, FieldValue::Increment(1))
                .await
                .unwrap(),
            ConditionalOutcome::Applied
        );

        store.delete(&doc);
        assert_eq!(
            store
                .update_field_if_exists(&doc, &field, FieldValue::Increment(1))
                .await
                .unwrap(),
            ConditionalOutcome::NotFound
        );
        assert!(store.get("users", "u1").is_none());
    }

    #[test]
    fn from_json_seeds_collections() {
        let store = MemoryStore::from_json(&json!({
            "users": { "a": { "n": 1 }, "b": {} },
            "posts": { "p": {} }
        }))
        .unwrap();

        assert_eq!(store.len("users"), 2);
        assert_eq!(store.len("posts"), 1);
        assert!(store.is_empty("other"));

        assert!(MemoryStore::from_json(&json!([1, 2])).is_err());
        assert!(MemoryStore::from_json(&json!({ "users": { "a": 5 } })).is_err());
    }
}
