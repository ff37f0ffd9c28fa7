//! Engine error taxonomy

use crate::config::ConfigError;
use crate::idmap::ConflictError;
use crate::site::SiteError;
use cbr_document::{DocumentError, UnsupportedVersionError};
use cbr_element::{ElementError, StructureError};
use cbr_files::{MissingFileError, PoolError, RelocationError};
use cbr_plan::{OperationState, PlanError, RunError, StepError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error category reported to callers and written into operation logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Element tree definition bug
    Structure,
    /// Id map invariant violated
    Conflict,
    /// Attachment blob absent
    MissingFile,
    /// Unit could not be planned
    Plan,
    /// Archive too new
    UnsupportedVersion,
    /// Any other step failure
    Step,
    /// Capability check failed
    PermissionDenied,
    /// Site collaborator failure
    Site,
    /// Malformed document or archive
    Document,
    /// Operation used out of order
    InvalidState,
    /// Bad configuration
    Config,
    /// Reference that could not be remapped
    UnresolvedReference,
    /// Cancelled between tasks
    Cancelled,
    /// Document entry with no matching element, skipped on read
    SkippedEntry,
}

impl ErrorKind {
    /// Tag used in [`LogEntry::kind`](cbr_plan::LogEntry)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structure => "StructureError",
            Self::Conflict => "ConflictError",
            Self::MissingFile => "MissingFileError",
            Self::Plan => "PlanError",
            Self::UnsupportedVersion => "UnsupportedVersionError",
            Self::Step => "StepError",
            Self::PermissionDenied => "PermissionDenied",
            Self::Site => "SiteError",
            Self::Document => "DocumentError",
            Self::InvalidState => "InvalidState",
            Self::Config => "ConfigError",
            Self::UnresolvedReference => "UnresolvedReference",
            Self::Cancelled => "Cancelled",
            Self::SkippedEntry => "SkippedEntry",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine error
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Element definition problem
    #[error("structure error: {0}")]
    Structure(#[from] StructureError),

    /// Link rule does not compile
    #[error("link pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Element value problem
    #[error("element error: {0}")]
    Element(#[from] ElementError),

    /// Id map conflict
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Missing blob
    #[error(transparent)]
    MissingFile(#[from] MissingFileError),

    /// Blob storage failure
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// Plan construction problem
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    /// Plan run stopped
    #[error(transparent)]
    Run(#[from] RunError),

    /// Archive or document too new
    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedVersionError),

    /// Malformed document
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// Capability check failed
    #[error("user {userid} lacks `{permission}`")]
    PermissionDenied {
        /// Operator
        userid: i64,
        /// Missing capability
        permission: String,
    },

    /// Site collaborator failure
    #[error("site error: {0}")]
    Site(#[from] SiteError),

    /// Operation used in the wrong state
    #[error("cannot {action} in state {state}")]
    InvalidState {
        /// Attempted action
        action: &'static str,
        /// Current state
        state: OperationState,
    },

    /// Target course is busy
    #[error("course {0} is locked by another restore")]
    Locked(i64),

    /// Archive or unit content is inconsistent
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// Bad configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON failure outside documents
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RelocationError> for BackupError {
    fn from(e: RelocationError) -> Self {
        match e {
            RelocationError::Missing(m) => Self::MissingFile(m),
            RelocationError::Pool(p) => Self::Pool(p),
        }
    }
}

impl BackupError {
    /// Taxonomy category
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Structure(_) | Self::Pattern(_) | Self::Element(ElementError::Structure(_)) => ErrorKind::Structure,
            Self::Element(_) | Self::Pool(_) | Self::Io(_) => ErrorKind::Step,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::MissingFile(_) => ErrorKind::MissingFile,
            Self::Plan(_) => ErrorKind::Plan,
            Self::Run(RunError::Cancelled { .. }) => ErrorKind::Cancelled,
            Self::Run(RunError::Plan(_)) => ErrorKind::InvalidState,
            Self::Run(RunError::Step { .. }) => ErrorKind::Step,
            Self::UnsupportedVersion(_) | Self::Document(DocumentError::Unsupported(_)) => {
                ErrorKind::UnsupportedVersion
            }
            Self::Document(_) | Self::InvalidArchive(_) | Self::Json(_) => ErrorKind::Document,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Site(_) => ErrorKind::Site,
            Self::InvalidState { .. } | Self::Locked(_) => ErrorKind::InvalidState,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Log tag; for failed steps, the tag of the underlying error
    #[must_use]
    pub fn tag(&self) -> String {
        match self {
            Self::Run(run) => run.kind().to_string(),
            other => other.kind().as_str().to_string(),
        }
    }

    /// Whether the operation can continue past this error
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::MissingFile | ErrorKind::Plan | ErrorKind::UnresolvedReference)
    }

    /// Whether the operation must abort
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}

impl From<BackupError> for StepError {
    fn from(e: BackupError) -> Self {
        StepError::with_kind(e.kind().as_str(), e.to_string()).caused_by(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbr_document::FormatVersion;
    use cbr_files::ContentHash;

    #[test]
    fn taxonomy() {
        let missing: BackupError = RelocationError::from(MissingFileError {
            hash: ContentHash::compute(b"abc123"),
            location: "1/course/summary/0/a.txt".to_string(),
        })
        .into();
        assert_eq!(missing.kind(), ErrorKind::MissingFile);
        assert!(missing.is_recoverable());

        let version: BackupError = UnsupportedVersionError {
            found: FormatVersion::new(3, 0),
            supported: FormatVersion::CURRENT,
        }
        .into();
        assert_eq!(version.kind(), ErrorKind::UnsupportedVersion);
        assert!(version.is_fatal());

        let structure: BackupError = ElementError::from(StructureError::CyclicOptigroup("plugin".into())).into();
        assert_eq!(structure.kind(), ErrorKind::Structure);
    }

    #[test]
    fn step_error_keeps_tag() {
        let step: StepError = BackupError::Locked(3).into();
        assert_eq!(step.kind(), "InvalidState");
        let run = BackupError::Run(RunError::Step {
            task: "course".into(),
            step: "structure".into(),
            source: StepError::with_kind("ConflictError", "dup"),
        });
        assert_eq!(run.tag(), "ConflictError");
    }
}
