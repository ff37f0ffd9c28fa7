//! Operation identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Namespace of one backup or restore operation
///
/// Sortable by creation time; every id-map row and lock is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(Ulid);

impl BackupId {
    /// Fresh id
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Wrap an existing ULID
    #[inline]
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BackupId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Backup or restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Site → archive
    Backup,
    /// Archive → site
    Restore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
        })
    }
}

/// Id-map item types used by the core tasks
pub mod itemtype {
    /// Course rows
    pub const COURSE: &str = "course";
    /// Section rows
    pub const SECTION: &str = "course_section";
    /// Course-module rows (one per activity)
    pub const ACTIVITY: &str = "activity";
    /// Block instance rows
    pub const BLOCK: &str = "block_instance";
    /// Context rows
    pub const CONTEXT: &str = "context";
    /// User rows
    pub const USER: &str = "user";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_parse_back() {
        let a = BackupId::generate();
        let b = BackupId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<BackupId>().unwrap(), a);
    }
}
