//! Vault crate - Mailbox backup and restore engine
//!
//! This crate keeps a resumable, deletion-aware local archive of a mailbox
//! reached over an unreliable protocol connection:
//! - Domain models (StableId, MessageMetadata, ErrorReport)
//! - Mail client seam with an in-memory simulation
//! - Archive storage trait with SQLite and in-memory implementations
//! - Checkpoints and an error taxonomy with quarantine
//! - Sync, deletion reconciliation and restore passes
//! - Background label application during restore
//!
//! [`Vault`] is the entry point.

pub mod archive;
pub mod classify;
pub mod client;
pub mod error;
pub mod models;
pub mod progress;
pub mod restore;
pub mod settings;
pub mod sync;
pub mod vault;

pub use archive::{
    ArchiveRecord, ArchiveStore, BlobStore, FileBlobStore, InMemoryArchiveStore,
    SqliteArchiveStore,
};
pub use classify::{ErrorCategory, ErrorClassifier};
pub use client::{
    FetchRequest, FetchResponse, FetchedFields, Folder, InMemoryMailClient, MailClient,
    ProtocolError, ProtocolErrorKind, SearchQuery,
};
pub use error::{Result, VaultError};
pub use models::{
    CHAT_LABEL, Checkpoint, ErrorReport, LabelFailure, MessageKind, MessageMetadata,
    OperationType, StableId, TransientId, Unfetchable, needs_update,
};
pub use progress::ProgressStore;
pub use restore::{
    JobAck, LabelBatch, LabelJob, LabelPipeline, RestoreEngine, RestoreOptions, RestoreStats,
};
pub use settings::{MAX_BATCH_SIZE, VaultSettings};
pub use sync::{
    BatchFetcher, DeletionReconciler, FetchBatch, SyncEngine, SyncOptions, SyncStats, folder_for,
};
pub use vault::{RestoreRequest, Scope, SyncRequest, Vault};
