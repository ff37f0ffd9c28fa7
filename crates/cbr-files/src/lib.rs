//! Course archive file handling
//!
//! Content-addressed blob pools and the relocation service that copies
//! attachments between them.
//!
//! # Core Concepts
//!
//! - [`ContentHash`]: 32-byte Blake3 key of a blob
//! - [`FileDescriptor`]: logical location of one attachment plus its hash
//! - [`ContentPool`]: append-or-dedupe blob store ([`MemoryPool`], [`DirPool`])
//! - [`FileTable`]: descriptor rows of a site
//! - [`FileRelocator`]: source → archive → destination copies
//!
//! # Example
//!
//! ```rust,ignore
//! use cbr_files::{ContentPool, FileDescriptor, FileRelocator, MemoryPool};
//!
//! let source = MemoryPool::new();
//! let archive = MemoryPool::new();
//! let hash = source.put(b"week 1 notes")?;
//! let file = FileDescriptor::new(12, "mod_page", "content", 0, "notes.txt", hash);
//! let path = FileRelocator::new().copy_to_archive(&source, &archive, &file)?;
//! ```

#![warn(unreachable_pub)]

mod descriptor;
mod error;
mod hash;
mod pool;
mod relocation;
mod table;

pub use descriptor::FileDescriptor;
pub use error::{MissingFileError, PoolError, RelocationError};
pub use hash::{ContentHash, HashParseError};
pub use pool::{ContentPool, DirPool, MemoryPool};
pub use relocation::{FileOwner, FileRelocator, ProgressReporter, RelocationStats, StoredFile};
pub use table::{FileTable, MemoryFileTable};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
