//! Content pools
//!
//! A pool is an append-or-dedupe blob store keyed by [`ContentHash`]. Pools
//! are shared between concurrent operations, so no method ever edits an
//! existing blob in place.

use crate::error::PoolError;
use crate::hash::ContentHash;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Byte-addressable blob store
pub trait ContentPool: Send + Sync + Debug {
    /// Fetch a blob, `None` if absent
    ///
    /// # Errors
    /// Returns error on storage failure
    fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, PoolError>;

    /// Whether a blob is present
    fn exists(&self, hash: &ContentHash) -> bool;

    /// Store bytes under a hash the caller already trusts
    ///
    /// Returns `true` when bytes were physically written, `false` when the
    /// blob was already present.
    ///
    /// # Errors
    /// Returns error on storage failure
    fn store(&self, hash: ContentHash, bytes: &[u8]) -> Result<bool, PoolError>;

    /// Number of distinct blobs held
    fn blob_count(&self) -> usize;

    /// Hash and store new bytes
    ///
    /// # Errors
    /// Returns error on storage failure
    fn put(&self, bytes: &[u8]) -> Result<ContentHash, PoolError> {
        let hash = ContentHash::compute(bytes);
        self.store(hash, bytes)?;
        Ok(hash)
    }
}

/// In-memory pool
#[derive(Debug, Default)]
pub struct MemoryPool {
    blobs: DashMap<ContentHash, Arc<[u8]>>,
}

impl MemoryPool {
    /// Create an empty pool
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentPool for MemoryPool {
    fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, PoolError> {
        Ok(self.blobs.get(hash).map(|b| b.to_vec()))
    }

    fn exists(&self, hash: &ContentHash) -> bool {
        self.blobs.contains_key(hash)
    }

    fn store(&self, hash: ContentHash, bytes: &[u8]) -> Result<bool, PoolError> {
        match self.blobs.entry(hash) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Arc::from(bytes));
                Ok(true)
            }
        }
    }

    fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}

/// Pool stored as files under a directory, one file per blob
///
/// Blobs are written to a temporary file in the target directory and then
/// linked into place without clobbering, so a racing writer of the same hash
/// simply loses.
#[derive(Debug, Clone)]
pub struct DirPool {
    root: PathBuf,
}

impl DirPool {
    /// Open (creating if needed) a pool rooted at `root`
    ///
    /// # Errors
    /// Returns error if the directory cannot be created
    pub fn open(root: impl AsRef<Path>) -> Result<Self, PoolError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Pool root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.fanout_path())
    }
}

impl ContentPool for DirPool {
    fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, PoolError> {
        match fs::read(self.blob_path(hash)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, hash: &ContentHash) -> bool {
        self.blob_path(hash).is_file()
    }

    fn store(&self, hash: ContentHash, bytes: &[u8]) -> Result<bool, PoolError> {
        let path = self.blob_path(&hash);
        if path.is_file() {
            return Ok(false);
        }
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error.into()),
        }
    }

    fn blob_count(&self) -> usize {
        let mut count = 0;
        let Ok(level1) = fs::read_dir(&self.root) else {
            return 0;
        };
        for a in level1.flatten() {
            let Ok(level2) = fs::read_dir(a.path()) else {
                continue;
            };
            for b in level2.flatten() {
                if let Ok(blobs) = fs::read_dir(b.path()) {
                    count += blobs
                        .flatten()
                        .filter(|f| f.path().is_file() && !is_temp_name(&f.file_name()))
                        .count();
                }
            }
        }
        count
    }
}

fn is_temp_name(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with(".tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_pool_dedupes() {
        let pool = MemoryPool::new();
        let h1 = pool.put(b"same").unwrap();
        let h2 = pool.put(b"same").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(pool.blob_count(), 1);
        assert_eq!(pool.get(&h1).unwrap().unwrap(), b"same");
    }

    #[test]
    fn memory_pool_store_reports_new_write() {
        let pool = MemoryPool::new();
        let hash = ContentHash::compute(b"x");
        assert!(pool.store(hash, b"x").unwrap());
        assert!(!pool.store(hash, b"x").unwrap());
    }

    #[test]
    fn missing_blob_is_none() {
        let pool = MemoryPool::new();
        assert!(pool.get(&ContentHash::compute(b"nope")).unwrap().is_none());
        assert!(!pool.exists(&ContentHash::compute(b"nope")));
    }

    #[test]
    fn dir_pool_roundtrip_and_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DirPool::open(dir.path().join("files")).unwrap();
        let hash = pool.put(b"essay").unwrap();
        assert!(pool.exists(&hash));
        assert!(!pool.store(hash, b"essay").unwrap());
        assert_eq!(pool.get(&hash).unwrap().unwrap(), b"essay");
        pool.put(b"other").unwrap();
        assert_eq!(pool.blob_count(), 2);
    }
}
