//! File-based body storage with optional zstd compression

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::blob::BlobStore;
use crate::models::StableId;

/// File-based body storage
///
/// Directory structure:
/// ```text
/// bodies/
///   14/
///     1467203750243.eml.zst    # compressed body
///     1412345678901.eml        # raw body
///   15/
///     1503951234567.eml.zst
/// ```
pub struct FileBlobStore {
    root: PathBuf,
    compression_level: i32,
}

impl FileBlobStore {
    /// Create a new file blob store at the given path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create body storage directory")?;
        Ok(Self {
            root,
            compression_level: 3,
        })
    }

    /// Shard directory: first two digits of the id
    fn shard_dir(&self, id: StableId) -> PathBuf {
        let name = id.to_string();
        let shard = if name.len() >= 2 { &name[..2] } else { "00" };
        self.root.join(shard)
    }

    fn raw_path(&self, id: StableId) -> PathBuf {
        self.shard_dir(id).join(format!("{}.eml", id))
    }

    fn compressed_path(&self, id: StableId) -> PathBuf {
        self.shard_dir(id).join(format!("{}.eml.zst", id))
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, id: StableId, data: &[u8], compress: bool) -> Result<()> {
        let (path, stale) = if compress {
            (self.compressed_path(id), self.raw_path(id))
        } else {
            (self.raw_path(id), self.compressed_path(id))
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = if compress {
            zstd::encode_all(data, self.compression_level).context("Failed to compress body")?
        } else {
            data.to_vec()
        };

        // Write atomically (write to temp, then rename)
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &path)?;

        if stale.exists() {
            fs::remove_file(&stale)?;
        }

        Ok(())
    }

    fn get(&self, id: StableId) -> Result<Option<Vec<u8>>> {
        let compressed = self.compressed_path(id);
        if compressed.exists() {
            let content = fs::read(&compressed)?;
            let mut decoder = zstd::Decoder::new(content.as_slice())?;
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .with_context(|| format!("Failed to decompress body of {}", id))?;
            return Ok(Some(decompressed));
        }

        let raw = self.raw_path(id);
        if raw.exists() {
            return Ok(Some(fs::read(&raw)?));
        }

        Ok(None)
    }

    fn exists(&self, id: StableId) -> Result<bool> {
        Ok(self.compressed_path(id).exists() || self.raw_path(id).exists())
    }

    fn delete(&self, id: StableId) -> Result<()> {
        for path in [self.compressed_path(id), self.raw_path(id)] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
