//! Archive trait definitions

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{MessageKind, MessageMetadata, StableId};

/// One archived message, without its body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub metadata: MessageMetadata,
    pub kind: MessageKind,
    /// Whether the body is stored compressed
    pub compressed: bool,
    /// Known to be unrestorable; the record is kept anyway
    pub quarantined: bool,
}

impl ArchiveRecord {
    pub fn stable_id(&self) -> StableId {
        self.metadata.stable_id
    }
}

/// Trait for archive storage operations
///
/// The archive is assumed to have a single writer. Implementations must be
/// safe to share between the engines and the label worker.
pub trait ArchiveStore: Send + Sync {
    /// Human-readable location, used in messages
    fn location(&self) -> String;

    /// Get a record by stable id
    fn get_record(&self, id: StableId) -> Result<Option<ArchiveRecord>>;

    /// Get the raw body of a record
    fn get_body(&self, id: StableId) -> Result<Option<Vec<u8>>>;

    /// Create a record and store its body
    ///
    /// An existing record with the same stable id is replaced.
    fn bury(
        &self,
        metadata: &MessageMetadata,
        kind: MessageKind,
        body: &[u8],
        compress: bool,
    ) -> Result<()>;

    /// Replace the metadata snapshot of an existing record
    ///
    /// Kind, body and quarantine state are kept.
    fn update_metadata(&self, metadata: &MessageMetadata) -> Result<()>;

    /// Stable ids of one kind, ordered by internal date then stable id
    ///
    /// With `since`, only records dated on or after that day are listed.
    fn list_ids(&self, kind: MessageKind, since: Option<NaiveDate>) -> Result<Vec<StableId>>;

    /// Mark a record as quarantined
    ///
    /// Returns false when no such record exists.
    fn quarantine(&self, id: StableId) -> Result<bool>;

    /// Delete records and their bodies, returning how many existed
    fn delete(&self, ids: &[StableId]) -> Result<usize>;

    /// Logins that own this archive, in registration order
    fn owners(&self) -> Result<Vec<String>>;

    /// Register an owner; registering twice is a no-op
    fn store_owner(&self, login: &str) -> Result<()>;

    /// Check if a record exists
    fn has_record(&self, id: StableId) -> Result<bool> {
        Ok(self.get_record(id)?.is_some())
    }

    /// Record and body together
    fn unbury(&self, id: StableId) -> Result<Option<(ArchiveRecord, Vec<u8>)>> {
        let Some(record) = self.get_record(id)? else {
            return Ok(None);
        };
        Ok(self.get_body(id)?.map(|body| (record, body)))
    }
}
