//! Blob storage trait for message bodies

use anyhow::Result;

use crate::models::StableId;

/// Trait for body storage operations
///
/// Implementations handle compression/decompression internally.
pub trait BlobStore: Send + Sync {
    /// Store a body, compressed when `compress` is set
    ///
    /// Replaces any body already stored for the id, compressed or not.
    fn put(&self, id: StableId, data: &[u8], compress: bool) -> Result<()>;

    /// Retrieve a body, decompressed
    ///
    /// Returns None if the body doesn't exist.
    fn get(&self, id: StableId) -> Result<Option<Vec<u8>>>;

    /// Check if a body exists
    fn exists(&self, id: StableId) -> Result<bool>;

    /// Delete a body
    fn delete(&self, id: StableId) -> Result<()>;
}
