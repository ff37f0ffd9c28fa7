//! File descriptor tables
//!
//! The table is the site's index of descriptor rows. Several rows may share
//! one blob.

use crate::descriptor::FileDescriptor;
use crate::error::PoolError;
use parking_lot::RwLock;
use std::fmt::Debug;

/// Site-side index of file descriptor rows
pub trait FileTable: Send + Sync + Debug {
    /// Descriptors owned by a context, in insertion order
    ///
    /// # Errors
    /// Returns error on storage failure
    fn list(&self, contextid: i64) -> Result<Vec<FileDescriptor>, PoolError>;

    /// Append a descriptor row
    ///
    /// # Errors
    /// Returns error if the row is rejected
    fn insert(&self, descriptor: FileDescriptor) -> Result<(), PoolError>;
}

/// In-memory file table
#[derive(Debug, Default)]
pub struct MemoryFileTable {
    rows: RwLock<Vec<FileDescriptor>>,
}

impl MemoryFileTable {
    /// Create an empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows
    #[must_use]
    pub fn rows(&self) -> Vec<FileDescriptor> {
        self.rows.read().clone()
    }

    /// Row count
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl FileTable for MemoryFileTable {
    fn list(&self, contextid: i64) -> Result<Vec<FileDescriptor>, PoolError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|d| d.contextid == contextid)
            .cloned()
            .collect())
    }

    fn insert(&self, descriptor: FileDescriptor) -> Result<(), PoolError> {
        let mut rows = self.rows.write();
        if rows.iter().any(|r| r.location() == descriptor.location()) {
            return Err(PoolError::Rejected {
                location: descriptor.location(),
                reason: "duplicate location".to_string(),
            });
        }
        rows.push(descriptor);
        Ok(())
    }
}
