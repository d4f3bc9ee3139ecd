//! Page fetcher

use crate::error::SweepError;
use crate::store::DocumentStore;
use crate::types::{DocumentRef, DocumentSnapshot};
use std::sync::Arc;

/// One ordered page of documents
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// One-based page index within the run
    pub index: u64,
    /// Documents in stable order
    pub documents: Vec<DocumentSnapshot>,
}

impl Page {
    /// Number of documents
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// An empty page ends the run
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Reference of the last document, the next cursor
    #[must_use]
    pub fn last_ref(&self) -> Option<&DocumentRef> {
        self.documents.last().map(|d| &d.reference)
    }
}

/// Fetches successive pages of one collection
#[derive(Clone)]
pub struct PageFetcher {
    store: Arc<dyn DocumentStore>,
    collection: String,
    page_size: usize,
}

impl PageFetcher {
    /// Create fetcher
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>, page_size: usize) -> Self {
        Self {
            store,
            collection: collection.into(),
            page_size,
        }
    }

    /// Page size
    #[inline]
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch the page after `cursor`
    ///
    /// # Errors
    /// Any store error is fatal and returned as `SweepError::Fetch`
    pub async fn next_page(
        &self,
        index: u64,
        cursor: Option<&DocumentRef>,
    ) -> Result<Page, SweepError> {
        tracing::debug!(
            page = index,
            cursor = cursor.map(DocumentRef::path),
            limit = self.page_size,
            "fetching page"
        );

        let mut documents = self
            .store
            .fetch_page(&self.collection, cursor, self.page_size)
            .await
            .map_err(|source| SweepError::Fetch { page: index, source })?;

        // A store returning more than asked must not widen the page
        if documents.len() > self.page_size {
            tracing::warn!(
                page = index,
                returned = documents.len(),
                limit = self.page_size,
                "store returned oversized page, truncating"
            );
            documents.truncate(self.page_size);
        }

        Ok(Page { index, documents })
    }
}

impl std::fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFetcher")
            .field("collection", &self.collection)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
