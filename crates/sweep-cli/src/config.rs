//! Layered run configuration
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! environment variables, command-line flags. Env and flags arrive together
//! from clap, which already prefers a flag over its env var.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use sweep_core::{ConfigError, Settings, UpdateMode, UpdateType};
use sweep_firestore::FirestoreConfig;

/// Errors loading or resolving configuration
#[derive(Debug, thiserror::Error)]
pub enum CliConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// IO error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// TOML error
        #[source]
        source: toml::de::Error,
    },

    /// Unknown backend name
    #[error("unknown backend {0:?} (expected firestore or memory)")]
    UnknownBackend(String),

    /// Resolved values failed validation
    #[error(transparent)]
    Settings(#[from] ConfigError),
}

/// Which store the run talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Firestore REST API
    #[default]
    Firestore,
    /// In-process store, optionally seeded from JSON
    Memory,
}

impl FromStr for BackendKind {
    type Err = CliConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "memory" => Ok(Self::Memory),
            _ => Err(CliConfigError::UnknownBackend(s.to_string())),
        }
    }
}

/// One configuration layer; unset fields defer to lower layers
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    /// Store project
    pub project_id: Option<String>,
    /// Store database
    pub database_id: Option<String>,
    /// Collection to scan
    pub collection: Option<String>,
    /// Field path to mutate
    pub field_key: Option<String>,
    /// Page size
    pub batch_size: Option<usize>,
    /// Updates per second
    pub rate_limit: Option<f64>,
    /// Transactional mode
    pub atomic_updates: Option<bool>,
    /// Value strategy name
    pub update_type: Option<String>,
    /// Global deadline in seconds
    pub timeout_secs: Option<u64>,
    /// Emulator `host:port`
    pub emulator_host: Option<String>,
    /// Bearer token
    pub access_token: Option<String>,
    /// Store backend
    pub backend: Option<BackendKind>,
    /// JSON seed for the memory backend
    pub seed_file: Option<PathBuf>,
}

impl ConfigLayer {
    /// Load a TOML file
    ///
    /// # Errors
    /// Returns `CliConfigError::Read` or `CliConfigError::Parse`
    pub fn load(path: &Path) -> Result<Self, CliConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| CliConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| CliConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `upper` on top of `self`
    #[must_use]
    pub fn merge(self, upper: Self) -> Self {
        Self {
            project_id: upper.project_id.or(self.project_id),
            database_id: upper.database_id.or(self.database_id),
            collection: upper.collection.or(self.collection),
            field_key: upper.field_key.or(self.field_key),
            batch_size: upper.batch_size.or(self.batch_size),
            rate_limit: upper.rate_limit.or(self.rate_limit),
            atomic_updates: upper.atomic_updates.or(self.atomic_updates),
            update_type: upper.update_type.or(self.update_type),
            timeout_secs: upper.timeout_secs.or(self.timeout_secs),
            emulator_host: upper.emulator_host.or(self.emulator_host),
            access_token: upper.access_token.or(self.access_token),
            backend: upper.backend.or(self.backend),
            seed_file: upper.seed_file.or(self.seed_file),
        }
    }

    /// Apply defaults and validate
    ///
    /// # Errors
    /// Returns `CliConfigError::Settings` for missing or invalid values
    pub fn resolve(self) -> Result<RunConfig, CliConfigError> {
        let collection = non_empty(self.collection).ok_or(ConfigError::Missing("COLLECTION"))?;
        let field_key = non_empty(self.field_key).ok_or(ConfigError::Missing("FIELD_KEY"))?;

        let mut settings = Settings::new(collection, &field_key)?
            .with_update_mode(UpdateMode::from_atomic_flag(
                self.atomic_updates.unwrap_or(false),
            ))
            .with_update_type(
                self.update_type
                    .as_deref()
                    .map(str::parse::<UpdateType>)
                    .transpose()?
                    .unwrap_or_default(),
            );
        if let Some(batch_size) = self.batch_size {
            settings = settings.with_batch_size(batch_size);
        }
        if let Some(rate_limit) = self.rate_limit {
            settings = settings.with_rate_limit(rate_limit);
        }
        settings.validate()?;

        let backend = match self.backend.unwrap_or_default() {
            BackendKind::Memory => Backend::Memory {
                seed_file: self.seed_file,
            },
            BackendKind::Firestore => {
                let project = non_empty(self.project_id).ok_or(ConfigError::Missing("PROJECT_ID"))?;
                let mut config = FirestoreConfig::new(project);
                if let Some(database) = non_empty(self.database_id) {
                    config = config.with_database(database);
                }
                if let Some(host) = non_empty(self.emulator_host) {
                    config = config.with_emulator(host);
                }
                if let Some(token) = non_empty(self.access_token) {
                    config = config.with_access_token(token);
                }
                Backend::Firestore(config)
            }
        };

        Ok(RunConfig {
            settings,
            backend,
            timeout: self
                .timeout_secs
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolved store selection
#[derive(Debug, Clone)]
pub enum Backend {
    /// Remote store
    Firestore(FirestoreConfig),
    /// In-process store
    Memory {
        /// JSON seed, `{"collection": {"id": {...}}}`
        seed_file: Option<PathBuf>,
    },
}

/// Fully resolved run configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Validated engine settings
    pub settings: Settings,
    /// Store to run against
    pub backend: Backend,
    /// Global deadline
    pub timeout: Option<Duration>,
}
