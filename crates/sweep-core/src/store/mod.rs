//! Document store collaborator
//!
//! The engine only needs three capabilities from a store: ordered cursor
//! pagination, an unconditional single-field update, and a transactional
//! "update only if the document still exists".

use crate::error::StoreError;
use crate::types::{DocumentRef, DocumentSnapshot, FieldPath, FieldValue};
use std::sync::Arc;

pub mod memory;

pub use memory::{MemoryStore, PageOrder};

/// Result of a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalOutcome {
    /// Document existed and the field was written
    Applied,
    /// Document was gone; nothing was written
    NotFound,
}

/// Store operations consumed by the sweep engine
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch up to `limit` documents strictly after `after` in the
    /// collection's stable order
    async fn fetch_page(
        &self,
        collection: &str,
        after: Option<&DocumentRef>,
        limit: usize,
    ) -> Result<Vec<DocumentSnapshot>, StoreError>;

    /// Write one field without reading first
    ///
    /// Only `field` is touched. A missing document is `StoreError::NotFound`.
    async fn update_field(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<(), StoreError>;

    /// Read the document and write one field in the same transaction
    ///
    /// A missing document is not an error. Contention retries happen inside
    /// the store; only the final failure is returned.
    async fn update_field_if_exists(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<ConditionalOutcome, StoreError>;
}

#[async_trait::async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    async fn fetch_page(
        &self,
        collection: &str,
        after: Option<&DocumentRef>,
        limit: usize,
    ) -> Result<Vec<DocumentSnapshot>, StoreError> {
        (**self).fetch_page(collection, after, limit).await
    }

    async fn update_field(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<(), StoreError> {
        (**self).update_field(doc, field, value).await
    }

    async fn update_field_if_exists(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<ConditionalOutcome, StoreError> {
        (**self).update_field_if_exists(doc, field, value).await
    }
}
