//! Engine settings
//!
//! Loaded from `settings.json` in the shared config directory when present.
//! Every field has a default, so a partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::client::Folder;
use crate::error::{Result, VaultError};

/// Largest id set the server accepts in one command
pub const MAX_BATCH_SIZE: usize = 1400;

/// Name of the settings file in the config directory
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Ids per bulk metadata fetch during sync
    pub fetch_batch_size: usize,
    /// Messages per restore window
    pub restore_batch_size: usize,
    /// Ids per stable-id resolution query during cleaning
    pub deletion_group_size: usize,
    /// Save the sync checkpoint every N items
    pub checkpoint_every: usize,
    /// Log an ETA every N items
    pub progress_every: usize,
    /// Fixed wait before reconnecting after an abort
    pub reconnect_backoff_secs: u64,
    /// Folder selected while appending during restore
    pub restore_folder: Folder,
    /// Apply labels from a background worker instead of inline
    pub background_labelling: bool,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            fetch_batch_size: 100,
            restore_batch_size: 100,
            deletion_group_size: MAX_BATCH_SIZE,
            checkpoint_every: 10,
            progress_every: 50,
            reconnect_backoff_secs: 10,
            restore_folder: Folder::Drafts,
            background_labelling: false,
        }
    }
}

impl VaultSettings {
    /// Load settings from the config directory, defaults if absent
    pub fn load() -> Result<Self> {
        let settings: Self = config::load_or_default(SETTINGS_FILE)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a given file, defaults if absent
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings: Self = config::load_json_file_or_default(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write these settings to the config directory
    pub fn save(&self) -> Result<()> {
        self.validate()?;
        config::save_json(SETTINGS_FILE, self)?;
        Ok(())
    }

    /// Check the batch sizes against the protocol bound
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("fetch_batch_size", self.fetch_batch_size),
            ("restore_batch_size", self.restore_batch_size),
            ("deletion_group_size", self.deletion_group_size),
        ];
        for (name, size) in sizes {
            if size == 0 || size > MAX_BATCH_SIZE {
                return Err(VaultError::InvalidSettings(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_BATCH_SIZE, size
                )));
            }
        }
        if self.checkpoint_every == 0 || self.progress_every == 0 {
            return Err(VaultError::InvalidSettings(
                "checkpoint_every and progress_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}
