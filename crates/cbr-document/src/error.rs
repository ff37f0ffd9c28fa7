//! Document errors

use crate::version::{FormatVersion, VersionParseError};
use cbr_element::{ElementError, StructureError};

/// Document declares a major version newer than the reader's
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("document format {found} is newer than supported {supported}")]
pub struct UnsupportedVersionError {
    /// Version found in the document
    pub found: FormatVersion,
    /// Highest version this reader understands
    pub supported: FormatVersion,
}

/// Document errors
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// Not valid JSON, or not a document
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Version field missing
    #[error("document has no `version` field")]
    MissingVersion,

    /// Version field malformed
    #[error(transparent)]
    InvalidVersion(#[from] VersionParseError),

    /// Version too new
    #[error(transparent)]
    Unsupported(#[from] UnsupportedVersionError),

    /// Document root does not match the schema root
    #[error("document root `{found}` does not match expected `{expected}`")]
    RootMismatch {
        /// Schema root name
        expected: String,
        /// Document root name
        found: String,
    },

    /// Tree produced no single root group
    #[error("tree `{0}` does not serialize to a single group")]
    NotAGroup(String),

    /// Element definition problem
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// Value assignment problem
    #[error(transparent)]
    Element(#[from] ElementError),
}

impl DocumentError {
    /// Whether this is a version refusal
    #[must_use]
    pub fn unsupported_version(&self) -> Option<&UnsupportedVersionError> {
        match self {
            Self::Unsupported(e) => Some(e),
            _ => None,
        }
    }
}
