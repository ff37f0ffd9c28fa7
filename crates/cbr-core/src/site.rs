//! Collaborators the engine runs against
//!
//! Entity storage, permission checks and file storage belong to the host
//! application. The engine sees them only through these traits.

use cbr_element::Record;
use cbr_files::{ContentPool, FileTable};
use std::fmt;
use std::sync::Arc;

/// Errors raised by site collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SiteError {
    /// Entity row does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity table
        entity: String,
        /// Row id
        id: i64,
    },

    /// Storage refused the operation
    #[error("{entity}: {message}")]
    Rejected {
        /// Entity table
        entity: String,
        /// Reason
        message: String,
    },
}

/// Reads entity rows during backup
pub trait EntityAccessor: Send + Sync {
    /// Row `id` of `entity`
    ///
    /// # Errors
    /// Storage failure; a missing row is `Ok(None)`
    fn fetch(&self, entity: &str, id: i64) -> Result<Option<Record>, SiteError>;

    /// Rows of `entity` whose `field` equals `value`, ordered by id
    ///
    /// # Errors
    /// Storage failure
    fn list(&self, entity: &str, field: &str, value: &str) -> Result<Vec<Record>, SiteError>;
}

/// Writes entity rows during restore
pub trait EntityWriter: Send + Sync {
    /// Insert a row (any `id` field is ignored) and return its new id
    ///
    /// # Errors
    /// Storage failure
    fn insert(&self, entity: &str, record: &Record) -> Result<i64, SiteError>;

    /// Overwrite the given fields of row `id`
    ///
    /// # Errors
    /// Storage failure or unknown row
    fn update(&self, entity: &str, id: i64, fields: &Record) -> Result<(), SiteError>;
}

/// Who runs an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Actor {
    /// User id of the operator
    pub userid: i64,
}

impl Actor {
    /// Operator `userid`
    #[inline]
    #[must_use]
    pub const fn new(userid: i64) -> Self {
        Self { userid }
    }
}

/// Where a permission applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Whole site
    System,
    /// One course
    Course(i64),
}

/// Capability names the engine checks
pub mod capability {
    /// Back up a course
    pub const BACKUP: &str = "backup:course";
    /// Restore into a course, or create one from an archive
    pub const RESTORE: &str = "restore:course";
}

/// Opaque permission predicate, consulted only when an operation is created
pub trait CapabilityCheck: Send + Sync {
    /// Whether `actor` holds `permission` in `scope`
    fn allowed(&self, actor: Actor, permission: &str, scope: Scope) -> bool;
}

/// Everything the engine needs from one site
#[derive(Clone)]
pub struct Site {
    /// Row reads
    pub accessor: Arc<dyn EntityAccessor>,
    /// Row writes
    pub writer: Arc<dyn EntityWriter>,
    /// Permission checks
    pub capabilities: Arc<dyn CapabilityCheck>,
    /// Blob storage
    pub pool: Arc<dyn ContentPool>,
    /// File descriptor rows
    pub files: Arc<dyn FileTable>,
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("blobs", &self.pool.blob_count())
            .finish_non_exhaustive()
    }
}

/// Core entity tables
pub mod entity {
    /// Courses
    pub const COURSE: &str = "course";
    /// Course sections
    pub const SECTIONS: &str = "course_sections";
    /// Course modules (activity placements)
    pub const MODULES: &str = "course_modules";
    /// Block instances
    pub const BLOCKS: &str = "block_instances";
    /// Users
    pub const USER: &str = "user";
    /// Per-section course format options
    pub const FORMAT_OPTIONS: &str = "course_format_options";
}

/// Context levels stored in the `context` entity
pub mod context_level {
    /// Course context
    pub const COURSE: &str = "course";
    /// Activity (course module) context
    pub const MODULE: &str = "module";
    /// Block context
    pub const BLOCK: &str = "block";
}

/// Entity holding context rows: `id, contextlevel, instanceid`
pub const CONTEXT_ENTITY: &str = "context";

/// Context id of `(level, instanceid)`
///
/// # Errors
/// Storage failure
pub fn find_context(accessor: &dyn EntityAccessor, level: &str, instanceid: i64) -> Result<Option<i64>, SiteError> {
    Ok(accessor
        .list(CONTEXT_ENTITY, "instanceid", &instanceid.to_string())?
        .into_iter()
        .find(|row| row.get("contextlevel") == Some(level))
        .and_then(|row| row.id()))
}

/// Insert a context row for `(level, instanceid)`
///
/// # Errors
/// Storage failure
pub fn create_context(writer: &dyn EntityWriter, level: &str, instanceid: i64) -> Result<i64, SiteError> {
    writer.insert(
        CONTEXT_ENTITY,
        &Record::new().with("contextlevel", level).with("instanceid", instanceid),
    )
}
