//! Local archive of backed-up messages
//!
//! The archive is keyed by [`StableId`](crate::models::StableId) alone.
//! Metadata lives in a queryable store, bodies in a [`BlobStore`].

mod blob;
mod blob_file;
mod memory;
mod sqlite;
mod traits;

pub use blob::BlobStore;
pub use blob_file::FileBlobStore;
pub use memory::InMemoryArchiveStore;
pub use sqlite::SqliteArchiveStore;
pub use traits::{ArchiveRecord, ArchiveStore};
