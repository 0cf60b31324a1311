//! Checkpoint persistence for resumable passes
//!
//! One file per (login, operation), named `<login>_<suffix>` and holding
//! `{"last_id": <stable id>}`. A checkpoint only says which id was completed
//! last; callers resolve it against the current enumeration with
//! [`suffix_after`].

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{Checkpoint, OperationType, StableId};

/// Reads and writes checkpoints for one login
#[derive(Debug, Clone)]
pub struct ProgressStore {
    dir: PathBuf,
    login: String,
}

impl ProgressStore {
    /// Create a store writing under `dir`, creating it if needed
    pub fn new(dir: impl AsRef<Path>, login: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create progress directory: {}", dir.display()))?;
        Ok(Self {
            dir,
            login: login.into(),
        })
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    /// Path of the checkpoint file for an operation
    pub fn path(&self, op: OperationType) -> PathBuf {
        self.dir
            .join(format!("{}_{}", self.login, op.file_suffix()))
    }

    /// Persist the most recently completed id
    pub fn save(&self, op: OperationType, last_id: StableId) -> Result<()> {
        let path = self.path(op);
        let content = serde_json::to_string(&Checkpoint::new(last_id))?;

        // Write atomically (write to temp, then rename)
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);
        fs::write(&temp_path, content)
            .with_context(|| format!("Failed to write checkpoint: {}", temp_path.display()))?;
        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to write checkpoint: {}", path.display()))?;

        log::debug!("Saved {} checkpoint at {}", op, last_id);
        Ok(())
    }

    /// Last completed id, if a checkpoint exists
    pub fn load(&self, op: OperationType) -> Result<Option<StableId>> {
        let path = self.path(op);
        if !path.exists() {
            return Ok(None);
        }
        let checkpoint: Checkpoint = config::load_json_file(&path)?;
        Ok(Some(checkpoint.last_id))
    }

    /// Load a checkpoint by operation name
    pub fn load_named(&self, name: &str) -> crate::Result<Option<StableId>> {
        let op: OperationType = name.parse()?;
        Ok(self.load(op)?)
    }

    /// Remove a checkpoint; missing files are ignored
    pub fn clear(&self, op: OperationType) -> Result<()> {
        let path = self.path(op);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove checkpoint: {}", path.display()))?;
        }
        Ok(())
    }
}

/// Items strictly after `last`
///
/// Returns None when `last` is not in `items`; callers then process everything.
pub fn suffix_after<'a, T: PartialEq>(items: &'a [T], last: &T) -> Option<&'a [T]> {
    items
        .iter()
        .position(|item| item == last)
        .map(|index| &items[index + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::new(dir.path(), "a@x.com").unwrap();

        assert!(store.load(OperationType::EmailSync).unwrap().is_none());

        store.save(OperationType::EmailSync, StableId::new(1500)).unwrap();
        store.save(OperationType::EmailSync, StableId::new(1600)).unwrap();

        assert_eq!(
            store.load(OperationType::EmailSync).unwrap(),
            Some(StableId::new(1600))
        );
        assert!(store.load(OperationType::ChatSync).unwrap().is_none());
    }

    #[test]
    fn test_file_layout() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::new(dir.path(), "a@x.com").unwrap();
        store.save(OperationType::ChatRestore, StableId::new(42)).unwrap();

        let path = dir.path().join("a@x.com_chat_last_id.restore");
        assert_eq!(fs::read_to_string(path).unwrap(), r#"{"last_id":42}"#);
    }

    #[test]
    fn test_logins_do_not_share_checkpoints() {
        let dir = tempdir().unwrap();
        let a = ProgressStore::new(dir.path(), "a@x.com").unwrap();
        let b = ProgressStore::new(dir.path(), "b@x.com").unwrap();

        a.save(OperationType::EmailRestore, StableId::new(9)).unwrap();
        assert!(b.load(OperationType::EmailRestore).unwrap().is_none());
    }

    #[test]
    fn test_load_named_rejects_unknown_operation() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::new(dir.path(), "a@x.com").unwrap();

        let err = store.load_named("contacts-sync").unwrap_err();
        assert!(matches!(err, VaultError::UnknownOperation(_)));
        assert!(store.load_named("email-sync").unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::new(dir.path(), "a@x.com").unwrap();
        store.save(OperationType::EmailSync, StableId::new(1)).unwrap();

        store.clear(OperationType::EmailSync).unwrap();
        store.clear(OperationType::EmailSync).unwrap();
        assert!(store.load(OperationType::EmailSync).unwrap().is_none());
    }

    #[test]
    fn test_suffix_after() {
        let order = [5, 3, 9, 1];
        assert_eq!(suffix_after(&order, &3), Some(&order[2..]));
        assert_eq!(suffix_after(&order, &1), Some(&order[4..]));
        assert_eq!(suffix_after(&order, &7), None);
    }
}
