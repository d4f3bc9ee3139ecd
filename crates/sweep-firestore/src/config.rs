//! Connection settings for the Firestore backend

use std::time::Duration;

/// Production endpoint
pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com";

/// Database used when none is configured
pub const DEFAULT_DATABASE: &str = "(default)";

/// Errors building a [`FirestoreStore`](crate::FirestoreStore)
#[derive(Debug, thiserror::Error)]
pub enum FirestoreConfigError {
    /// Project id is empty
    #[error("project id is required")]
    MissingProject,

    /// HTTP client could not be constructed
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Firestore connection settings
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// Google Cloud project id
    pub project_id: String,
    /// Database id
    pub database_id: String,
    /// `host:port` of a local emulator; switches to plain HTTP
    pub emulator_host: Option<String>,
    /// Pre-minted OAuth 2.0 bearer token
    pub access_token: Option<String>,
    /// Attempts per transaction before giving up on contention
    pub max_transaction_attempts: u32,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl FirestoreConfig {
    /// Create config for a project's default database
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: DEFAULT_DATABASE.to_string(),
            emulator_host: None,
            access_token: None,
            max_transaction_attempts: 5,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// With database id
    #[inline]
    #[must_use]
    pub fn with_database(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = database_id.into();
        self
    }

    /// With emulator host
    #[inline]
    #[must_use]
    pub fn with_emulator(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    /// With bearer token
    #[inline]
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// API root, e.g. `https://firestore.googleapis.com/v1`
    #[must_use]
    pub fn api_root(&self) -> String {
        match &self.emulator_host {
            Some(host) => format!("http://{}/v1", host.trim_end_matches('/')),
            None => format!("{DEFAULT_ENDPOINT}/v1"),
        }
    }

    /// Resource name of the database's document root
    #[must_use]
    pub fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }

    /// Token to send, if any; the emulator accepts a fixed owner token
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        match (&self.access_token, &self.emulator_host) {
            (Some(token), _) => Some(token),
            (None, Some(_)) => Some("owner"),
            (None, None) => None,
        }
    }
}
