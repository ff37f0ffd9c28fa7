//! Error types for pools and file relocation

use crate::hash::ContentHash;
use std::io;

/// Storage-level failure of a content pool or file table
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Underlying filesystem error
    #[error("pool I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored bytes do not match the hash they were written under
    #[error("blob {hash} is corrupt")]
    Corrupt { hash: ContentHash },

    /// Descriptor row could not be written
    #[error("file table rejected {location}: {reason}")]
    Rejected { location: String, reason: String },
}

/// A referenced blob is absent from its pool
///
/// Recoverable: callers log it as a warning and continue without the file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing file {location} (content {hash})")]
pub struct MissingFileError {
    /// Hash that was looked up
    pub hash: ContentHash,
    /// Logical location of the descriptor that referenced it
    pub location: String,
}

/// Failure while copying a file between pools
#[derive(Debug, thiserror::Error)]
pub enum RelocationError {
    /// Source blob absent
    #[error(transparent)]
    Missing(#[from] MissingFileError),

    /// Pool or file table failure
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl RelocationError {
    /// Whether the failure only affects this one file
    #[inline]
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }
}
