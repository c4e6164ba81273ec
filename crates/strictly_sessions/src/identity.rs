//! Local player identity.
//!
//! A client picks a random player id once and reuses it on every later run,
//! so rejoining a game from the same install lands in the same seat.

use crate::ids::{generate_display_name, generate_player_id};
use crate::session::PlayerId;
use derive_more::{Display, Error};
use derive_new::new;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Supplies the local player's identity to the presentation layer.
pub trait IdentityProvider: Send + Sync {
    /// Stable player id for this client.
    fn player_id(&self) -> &PlayerId;

    /// Human-friendly name shown next to the id.
    fn display_name(&self) -> &str;
}

/// Identity persisted as TOML on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct FileIdentity {
    /// Stable player id.
    player_id: PlayerId,
    /// Display name.
    display_name: String,
}

impl FileIdentity {
    /// Loads the identity stored at `path`, creating and saving a fresh one
    /// if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the file exists but cannot be read or
    /// parsed, or a new identity cannot be written.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        if path.exists() {
            debug!("Loading stored identity");
            let content = std::fs::read_to_string(path)
                .map_err(|e| IdentityError::new(format!("Failed to read identity: {}", e)))?;
            let identity: Self = toml::from_str(&content)
                .map_err(|e| IdentityError::new(format!("Failed to parse identity: {}", e)))?;
            info!(player_id = %identity.player_id, "Identity loaded");
            return Ok(identity);
        }

        let identity = Self::new(generate_player_id(), generate_display_name());
        identity.save(path)?;
        info!(player_id = %identity.player_id, name = %identity.display_name, "Identity created");
        Ok(identity)
    }

    /// Writes the identity to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if serialization or the write fails.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                IdentityError::new(format!("Failed to create '{}': {}", parent.display(), e))
            })?;
        }
        let content = toml::to_string(self)
            .map_err(|e| IdentityError::new(format!("Failed to encode identity: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| IdentityError::new(format!("Failed to write identity: {}", e)))
    }
}

impl IdentityProvider for FileIdentity {
    fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// An identity fixed by the caller, for scripting and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedIdentity {
    player_id: PlayerId,
    display_name: String,
}

impl FixedIdentity {
    /// Uses `player_id` as both the id and the display name.
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            display_name: player_id.as_str().to_string(),
            player_id,
        }
    }
}

impl IdentityProvider for FixedIdentity {
    fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Identity storage error.
#[derive(Debug, Clone, Display, Error)]
#[display("Identity error: {} at {}:{}", message, file, line)]
pub struct IdentityError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl IdentityError {
    /// Creates a new identity error with caller location tracking.
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
