//! Element documents
//!
//! The on-disk shape of one element tree: a small header naming the format
//! and its `major.minor` version, and an ordered tree of groups and leaves.
//!
//! # Core Concepts
//!
//! - [`Document`]: header plus root [`Node`], JSON encoded
//! - [`write`]: element tree → document
//! - [`read`]: document + schema tree → filled tree and skip warnings
//! - [`FormatVersion`]: newer majors are refused, newer minors read
//!
//! # Example
//!
//! ```rust,ignore
//! use cbr_document::{read, write, Document};
//!
//! let doc = write(&course_tree, &ctx)?;
//! let json = doc.to_json()?;
//! let back = read(&Document::from_json(&json)?, course_schema(), &ctx)?;
//! ```

#![warn(unreachable_pub)]

mod document;
mod error;
mod reader;
mod version;
mod writer;

pub use document::{Document, Node, FORMAT_NAME};
pub use error::{DocumentError, UnsupportedVersionError};
pub use reader::{read, ReadOutcome, ReadWarning, SkipReason};
pub use version::{FormatVersion, VersionParseError};
pub use writer::write;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
