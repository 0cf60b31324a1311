//! In-memory archive implementation
//!
//! Used for testing. Counts metadata writes so callers can check that
//! unchanged records are never rewritten.

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::traits::{ArchiveRecord, ArchiveStore};
use crate::models::{MessageKind, MessageMetadata, StableId};

struct StoredRecord {
    record: ArchiveRecord,
    body: Vec<u8>,
}

/// In-memory implementation of ArchiveStore
pub struct InMemoryArchiveStore {
    records: RwLock<HashMap<StableId, StoredRecord>>,
    owners: RwLock<Vec<String>>,
    writes: AtomicUsize,
}

impl InMemoryArchiveStore {
    /// Create a new empty in-memory archive
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            owners: RwLock::new(Vec::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of bury and update_metadata calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of archived records
    pub fn len(&self) -> usize {
        self.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<StableId, StoredRecord>>> {
        self.records
            .read()
            .map_err(|_| anyhow!("Archive lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<StableId, StoredRecord>>> {
        self.records
            .write()
            .map_err(|_| anyhow!("Archive lock poisoned"))
    }
}

impl Default for InMemoryArchiveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveStore for InMemoryArchiveStore {
    fn location(&self) -> String {
        ":memory:".to_string()
    }

    fn get_record(&self, id: StableId) -> Result<Option<ArchiveRecord>> {
        Ok(self.read()?.get(&id).map(|stored| stored.record.clone()))
    }

    fn get_body(&self, id: StableId) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.get(&id).map(|stored| stored.body.clone()))
    }

    fn bury(
        &self,
        metadata: &MessageMetadata,
        kind: MessageKind,
        body: &[u8],
        compress: bool,
    ) -> Result<()> {
        self.write()?.insert(
            metadata.stable_id,
            StoredRecord {
                record: ArchiveRecord {
                    metadata: metadata.clone(),
                    kind,
                    compressed: compress,
                    quarantined: false,
                },
                body: body.to_vec(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update_metadata(&self, metadata: &MessageMetadata) -> Result<()> {
        let mut records = self.write()?;
        let stored = records
            .get_mut(&metadata.stable_id)
            .ok_or_else(|| anyhow!("Cannot update metadata of unknown record {}", metadata.stable_id))?;
        stored.record.metadata = metadata.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_ids(&self, kind: MessageKind, since: Option<NaiveDate>) -> Result<Vec<StableId>> {
        let records = self.read()?;
        let mut listed: Vec<_> = records
            .values()
            .map(|stored| &stored.record)
            .filter(|record| record.kind == kind)
            .filter(|record| {
                since.is_none_or(|day| record.metadata.internal_date.date_naive() >= day)
            })
            .map(|record| (record.metadata.internal_date, record.stable_id()))
            .collect();
        listed.sort();
        Ok(listed.into_iter().map(|(_, id)| id).collect())
    }

    fn quarantine(&self, id: StableId) -> Result<bool> {
        Ok(match self.write()?.get_mut(&id) {
            Some(stored) => {
                stored.record.quarantined = true;
                true
            }
            None => false,
        })
    }

    fn delete(&self, ids: &[StableId]) -> Result<usize> {
        let mut records = self.write()?;
        Ok(ids.iter().filter(|id| records.remove(id).is_some()).count())
    }

    fn owners(&self) -> Result<Vec<String>> {
        Ok(self
            .owners
            .read()
            .map_err(|_| anyhow!("Owner lock poisoned"))?
            .clone())
    }

    fn store_owner(&self, login: &str) -> Result<()> {
        let mut owners = self
            .owners
            .write()
            .map_err(|_| anyhow!("Owner lock poisoned"))?;
        if !owners.iter().any(|owner| owner == login) {
            owners.push(login.to_string());
        }
        Ok(())
    }
}
