//! Moving attachments between pools
//!
//! Files travel source pool → archive pool during backup and archive pool →
//! destination pool during restore. Bytes are copied, never moved, and the
//! hash recorded in the descriptor is trusted as-is.

use crate::descriptor::FileDescriptor;
use crate::error::{MissingFileError, RelocationError};
use crate::pool::ContentPool;
use crate::table::FileTable;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives incremental progress from long-running copies
pub trait ProgressReporter: Send + Sync {
    /// Called after every file, `total` is `0` when unknown
    fn progress(&self, done: u64, total: u64);
}

/// New owner of a restored file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOwner {
    /// Context in the destination site
    pub contextid: i64,
    /// Owning row id in the destination site
    pub itemid: i64,
}

/// Outcome of a destination copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Descriptor row as written to the destination table
    pub descriptor: FileDescriptor,
    /// `false` when the blob already existed and only the row was written
    pub blob_written: bool,
}

/// Counters for one relocator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocationStats {
    /// Files copied into an archive
    pub archived: u64,
    /// Files whose source blob was missing
    pub missing: u64,
    /// Descriptor rows written at a destination
    pub stored: u64,
    /// Destination copies that reused an existing blob
    pub deduplicated: u64,
}

/// Copies attachments between content pools
#[derive(Default)]
pub struct FileRelocator {
    progress: Option<Arc<dyn ProgressReporter>>,
    expected: AtomicU64,
    done: AtomicU64,
    archived: AtomicU64,
    missing: AtomicU64,
    stored: AtomicU64,
    deduplicated: AtomicU64,
}

impl Debug for FileRelocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRelocator")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl FileRelocator {
    /// Relocator without progress reporting
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report progress to `reporter`
    #[must_use]
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Announce how many more files are about to be copied
    pub fn expect(&self, files: u64) {
        self.expected.fetch_add(files, Ordering::Relaxed);
    }

    /// Copy a blob into the archive pool
    ///
    /// Returns the blob's path inside the archive.
    ///
    /// # Errors
    /// [`RelocationError::Missing`] when the source pool has no blob for the
    /// descriptor's hash; nothing is written in that case.
    pub fn copy_to_archive(
        &self,
        source: &dyn ContentPool,
        archive: &dyn ContentPool,
        descriptor: &FileDescriptor,
    ) -> Result<String, RelocationError> {
        let hash = descriptor.contenthash;
        let result = if archive.exists(&hash) {
            Ok(())
        } else {
            match source.get(&hash)? {
                Some(bytes) => archive.store(hash, &bytes).map(|_| ()).map_err(Into::into),
                None => Err(self.missing_file(descriptor)),
            }
        };
        self.tick();
        result?;

        self.archived.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(file = %descriptor.location(), hash = %hash.short(), "archived file");
        Ok(format!("files/{}", hash.fanout_path()))
    }

    /// Copy a blob from the archive into a destination pool and write its
    /// descriptor row under the new owner
    ///
    /// The blob is only copied when the destination does not already hold
    /// the hash.
    ///
    /// # Errors
    /// [`RelocationError::Missing`] when neither pool holds the blob, or a
    /// pool/table error.
    pub fn copy_to_destination(
        &self,
        archive: &dyn ContentPool,
        destination: &dyn ContentPool,
        table: &dyn FileTable,
        descriptor: &FileDescriptor,
        owner: FileOwner,
    ) -> Result<StoredFile, RelocationError> {
        let hash = descriptor.contenthash;
        let rehomed = descriptor.rehomed(owner.contextid, owner.itemid);

        let copied = if destination.exists(&hash) {
            Ok(false)
        } else {
            match archive.get(&hash)? {
                Some(bytes) => destination.store(hash, &bytes).map_err(Into::into),
                None => Err(self.missing_file(descriptor)),
            }
        };
        self.tick();
        let blob_written = copied?;
        if !blob_written {
            self.deduplicated.fetch_add(1, Ordering::Relaxed);
        }

        table.insert(rehomed.clone())?;
        self.stored.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            file = %rehomed.location(),
            hash = %hash.short(),
            blob_written,
            "stored file"
        );
        Ok(StoredFile {
            descriptor: rehomed,
            blob_written,
        })
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> RelocationStats {
        RelocationStats {
            archived: self.archived.load(Ordering::Relaxed),
            missing: self.missing.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
        }
    }

    fn missing_file(&self, descriptor: &FileDescriptor) -> RelocationError {
        self.missing.fetch_add(1, Ordering::Relaxed);
        MissingFileError {
            hash: descriptor.contenthash,
            location: descriptor.location(),
        }
        .into()
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(reporter) = &self.progress {
            reporter.progress(done, self.expected.load(Ordering::Relaxed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use crate::hash::ContentHash;
    use crate::pool::MemoryPool;
    use crate::table::MemoryFileTable;
    use parking_lot::Mutex;

    fn descriptor(pool: &MemoryPool, bytes: &[u8]) -> FileDescriptor {
        let hash = pool.put(bytes).unwrap();
        FileDescriptor::new(5, "mod_resource", "content", 0, "a.bin", hash)
    }

    #[test]
    fn archive_copy_keeps_hash() {
        let source = MemoryPool::new();
        let archive = MemoryPool::new();
        let d = descriptor(&source, b"payload");
        let path = FileRelocator::new().copy_to_archive(&source, &archive, &d).unwrap();
        assert!(path.starts_with("files/"));
        assert_eq!(archive.get(&d.contenthash).unwrap().unwrap(), b"payload");
    }

    #[test]
    fn archive_copy_missing_blob() {
        let source = MemoryPool::new();
        let archive = MemoryPool::new();
        let d = FileDescriptor::new(5, "mod_resource", "content", 0, "a.bin", ContentHash::compute(b"abc123"));
        let relocator = FileRelocator::new();
        let err = relocator.copy_to_archive(&source, &archive, &d).unwrap_err();
        assert!(err.is_missing());
        assert_eq!(archive.blob_count(), 0);
        assert_eq!(relocator.stats().missing, 1);
    }

    #[test]
    fn destination_copy_rewrites_owner() {
        let archive = MemoryPool::new();
        let dest = MemoryPool::new();
        let table = MemoryFileTable::new();
        let d = descriptor(&archive, b"x");
        let stored = FileRelocator::new()
            .copy_to_destination(&archive, &dest, &table, &d, FileOwner { contextid: 90, itemid: 44 })
            .unwrap();
        assert!(stored.blob_written);
        assert_eq!(stored.descriptor.itemid, 44);
        assert_eq!(table.rows()[0].contextid, 90);
    }

    #[test]
    fn destination_copy_dedupes_by_hash() {
        let archive = MemoryPool::new();
        let dest = MemoryPool::new();
        let table = MemoryFileTable::new();
        let first = descriptor(&archive, b"shared");
        let mut second = first.clone();
        second.filename = "copy.bin".to_string();

        let relocator = FileRelocator::new();
        let a = relocator
            .copy_to_destination(&archive, &dest, &table, &first, FileOwner { contextid: 1, itemid: 1 })
            .unwrap();
        let b = relocator
            .copy_to_destination(&archive, &dest, &table, &second, FileOwner { contextid: 1, itemid: 2 })
            .unwrap();

        assert!(a.blob_written);
        assert!(!b.blob_written);
        assert_eq!(dest.blob_count(), 1);
        assert_eq!(table.len(), 2);
        assert_eq!(relocator.stats().deduplicated, 1);
    }

    /// Loses the race to another writer: the hash looks absent, but the
    /// blob is already there by the time it is stored
    #[derive(Debug, Default)]
    struct RacedPool(MemoryPool);

    impl ContentPool for RacedPool {
        fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, PoolError> {
            self.0.get(hash)
        }

        fn exists(&self, _hash: &ContentHash) -> bool {
            false
        }

        fn store(&self, hash: ContentHash, bytes: &[u8]) -> Result<bool, PoolError> {
            self.0.store(hash, bytes)
        }

        fn blob_count(&self) -> usize {
            self.0.blob_count()
        }
    }

    #[test]
    fn destination_copy_counts_store_side_dedupe() {
        let archive = MemoryPool::new();
        let dest = RacedPool::default();
        let table = MemoryFileTable::new();
        let d = descriptor(&archive, b"shared");
        dest.0.put(b"shared").unwrap();

        let relocator = FileRelocator::new();
        let stored = relocator
            .copy_to_destination(&archive, &dest, &table, &d, FileOwner { contextid: 3, itemid: 7 })
            .unwrap();

        assert!(!stored.blob_written);
        assert_eq!(table.len(), 1);
        assert_eq!(dest.blob_count(), 1);
        assert_eq!(relocator.stats().deduplicated, 1);
        assert_eq!(relocator.stats().stored, 1);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u64, u64)>>);

    impl ProgressReporter for Recorder {
        fn progress(&self, done: u64, total: u64) {
            self.0.lock().push((done, total));
        }
    }

    #[test]
    fn progress_reported_per_file() {
        let source = MemoryPool::new();
        let archive = MemoryPool::new();
        let recorder = Arc::new(Recorder::default());
        let relocator = FileRelocator::new().with_progress(recorder.clone());
        relocator.expect(2);
        let a = descriptor(&source, b"1");
        let b = descriptor(&source, b"2");
        relocator.copy_to_archive(&source, &archive, &a).unwrap();
        relocator.copy_to_archive(&source, &archive, &b).unwrap();
        assert_eq!(*recorder.0.lock(), vec![(1, 2), (2, 2)]);
    }
}
