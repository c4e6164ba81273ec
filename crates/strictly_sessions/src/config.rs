//! Store and client configuration.

use crate::controller::DEFAULT_OPEN_SESSIONS;
use crate::error::StoreError;
use crate::store::{DocumentStore, MemoryStore, SqliteStore};
use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Environment variable that overrides `database_url`.
pub const DATABASE_URL_ENV: &str = "STRICTLY_DATABASE_URL";

/// Which document store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process only; nothing survives the process.
    Memory,
    /// SQLite file shared by every process that opens it.
    #[default]
    Sqlite,
}

/// Configuration for the session client.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Store backend.
    #[serde(default)]
    backend: StoreBackend,

    /// SQLite database path.
    #[serde(default = "default_database_url")]
    database_url: String,

    /// How often SQLite subscriptions check for changes, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,

    /// Number of joinable sessions listed by default.
    #[serde(default = "default_open_sessions_limit")]
    open_sessions_limit: usize,

    /// Where the local player identity is stored.
    #[serde(default = "default_identity_path")]
    identity_path: PathBuf,
}

fn default_database_url() -> String {
    "strictly_sessions.db".to_string()
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_open_sessions_limit() -> usize {
    DEFAULT_OPEN_SESSIONS
}

fn default_identity_path() -> PathBuf {
    PathBuf::from("identity.toml")
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_url: default_database_url(),
            poll_interval_ms: default_poll_interval_ms(),
            open_sessions_limit: default_open_sessions_limit(),
            identity_path: default_identity_path(),
        }
    }
}

impl SessionsConfig {
    /// Loads configuration from a TOML file. Missing keys take defaults.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;
        let config = Self::from_toml(&content)?;
        info!(backend = ?config.backend, "Config loaded successfully");
        Ok(config)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))
    }

    /// Applies `STRICTLY_DATABASE_URL` from the environment, if set.
    #[instrument(skip(self))]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            debug!(database_url = %url, "Database URL overridden from environment");
            self.database_url = url;
        }
        self
    }

    /// Subscription poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Builds the configured store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the SQLite database cannot be opened.
    #[instrument(skip(self), fields(backend = ?self.backend))]
    pub fn open_store(&self) -> Result<Arc<dyn DocumentStore>, StoreError> {
        Ok(match self.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Sqlite => Arc::new(SqliteStore::open(
                self.database_url.clone(),
                self.poll_interval(),
            )?),
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}
