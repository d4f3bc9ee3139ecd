//! Firestore REST client implementing [`DocumentStore`]

use crate::codec::{decode_error, decode_query_response, field_write, run_query_body};
use crate::config::{FirestoreConfig, FirestoreConfigError};
use crate::transaction::{self, TransactionOps};
use serde::Deserialize;
use serde_json::{json, Value};
use sweep_core::{
    ConditionalOutcome, DocumentRef, DocumentSnapshot, DocumentStore, FieldPath, FieldValue,
    StoreError,
};

#[derive(Debug, Deserialize)]
struct BeginTransactionResponse {
    transaction: String,
}

/// Document store backed by the Firestore REST API
#[derive(Debug, Clone)]
pub struct FirestoreStore {
    http: reqwest::Client,
    config: FirestoreConfig,
    api_root: String,
    documents_root: String,
}

impl FirestoreStore {
    /// Create store
    ///
    /// # Errors
    /// Returns `FirestoreConfigError` if the project is missing or the HTTP
    /// client cannot be built
    pub fn new(config: FirestoreConfig) -> Result<Self, FirestoreConfigError> {
        if config.project_id.trim().is_empty() {
            return Err(FirestoreConfigError::MissingProject);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("field-sweep/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_root: config.api_root(),
            documents_root: config.documents_root(),
            config,
        })
    }

    /// Connection settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    /// Reference for a document of a top-level collection
    #[must_use]
    pub fn document_ref(&self, collection: &str, id: &str) -> DocumentRef {
        DocumentRef::new(format!("{}/{collection}/{id}", self.documents_root))
    }

    fn rpc_url(&self, method: &str) -> String {
        format!("{}/{}:{method}", self.api_root, self.documents_root)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and return the body of a successful response
    async fn send(&self, request: reqwest::RequestBuilder, target: &str) -> Result<String, StoreError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(decode_error(status.as_u16(), &body, target))
        }
    }

    async fn post(&self, method: &str, body: &Value, target: &str) -> Result<String, StoreError> {
        let request = self.http.post(self.rpc_url(method)).json(body);
        self.send(request, target).await
    }

    async fn commit_write(&self, write: Value, transaction: Option<&str>, target: &str) -> Result<(), StoreError> {
        let mut body = json!({ "writes": [write] });
        if let Some(tx) = transaction {
            body["transaction"] = json!(tx);
        }
        self.post("commit", &body, target).await.map(drop)
    }
}

#[async_trait::async_trait]
impl TransactionOps for FirestoreStore {
    async fn begin(&self, previous: Option<&str>) -> Result<String, StoreError> {
        let read_write = match previous {
            Some(previous) => json!({ "retryTransaction": previous }),
            None => json!({}),
        };
        let body = self
            .post(
                "beginTransaction",
                &json!({ "options": { "readWrite": read_write } }),
                &self.documents_root,
            )
            .await?;

        serde_json::from_str::<BeginTransactionResponse>(&body)
            .map(|r| r.transaction)
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn read(&self, doc: &DocumentRef, transaction: &str) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.api_root, doc.path());
        let request = self
            .http
            .get(url)
            .query(&[("transaction", transaction), ("mask.fieldPaths", "__name__")]);
        self.send(request, doc.path()).await.map(drop)
    }

    async fn commit(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
        transaction: &str,
    ) -> Result<(), StoreError> {
        self.commit_write(field_write(doc, field, value), Some(transaction), doc.path())
            .await
    }

    async fn rollback(&self, transaction: &str) {
        let result = self
            .post("rollback", &json!({ "transaction": transaction }), &self.documents_root)
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "transaction rollback failed");
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for FirestoreStore {
    async fn fetch_page(
        &self,
        collection: &str,
        after: Option<&DocumentRef>,
        limit: usize,
    ) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let body = self
            .post("runQuery", &run_query_body(collection, after, limit), collection)
            .await?;
        decode_query_response(&body)
    }

    async fn update_field(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<(), StoreError> {
        self.commit_write(field_write(doc, field, value), None, doc.path())
            .await
    }

    async fn update_field_if_exists(
        &self,
        doc: &DocumentRef,
        field: &FieldPath,
        value: FieldValue,
    ) -> Result<ConditionalOutcome, StoreError> {
        transaction::update_if_exists(
            self,
            doc,
            field,
            value,
            self.config.max_transaction_attempts,
        )
        .await
    }
}
