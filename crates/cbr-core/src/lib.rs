//! Course backup and restore engine
//!
//! Turns a course (sections, activities, blocks, users and attachments) into
//! a self-contained archive and rebuilds it, in a new or an existing course,
//! with every cross-reference remapped to the ids the target site assigned.
//!
//! # Core Concepts
//!
//! - [`Engine`]: configuration, site collaborators, plugins and shared stores
//! - [`BackupController`] / [`RestoreController`]: one operation walked
//!   through `CREATED → CONFIGURED → PLAN_BUILT → … → FINISHED | ABORTED`
//! - [`IdMapStore`]: `(backupid, itemtype, old id) → new id`, the only
//!   state shared between restore tasks
//! - [`Archive`]: header, one document per unit and a content-addressed pool
//! - [`PluginRegistry`]: activity, block and course-format extensions that
//!   fill the core trees' optigroup slots
//! - [`OperationGuard`]: purges id-map rows and releases locks exactly once
//!
//! # Example
//!
//! ```rust,ignore
//! use cbr_core::{Actor, Engine, EngineConfig, RestoreTarget};
//!
//! let engine = Engine::new(EngineConfig::default(), site, plugins)?;
//! let backup = engine.backup(Actor::new(2), 10, None);
//! let archive = backup.archive.expect("backup finished");
//!
//! let restored = engine.restore(Actor::new(2), &archive, RestoreTarget::NewCourse, None);
//! assert!(restored.is_finished());
//! for warning in restored.log.warnings() {
//!     println!("{}: {}", warning.kind, warning.message);
//! }
//! ```

#![warn(unreachable_pub)]

pub mod archive;
mod backup;
mod config;
mod controller;
mod engine;
mod error;
mod guard;
mod idmap;
mod ids;
pub mod links;
mod manifest;
pub mod plugin;
mod restore;
pub mod schema;
pub mod site;

pub use archive::{Archive, ArchiveHeader, ContentsEntry, UnitKind};
pub use backup::BackupContext;
pub use config::{BackupSettings, ConfigError, EngineConfig, RestoreSettings};
pub use controller::{BackupController, OperationResult, RestoreController};
pub use engine::{BackupOutcome, Engine, OperationRequest};
pub use error::{BackupError, ErrorKind};
pub use guard::{OperationGuard, OperationLocks};
pub use idmap::{ConflictError, IdMapStore, IdMapping};
pub use ids::{itemtype, BackupId, OperationKind};
pub use manifest::{backup_manifest, descriptor_from_record, descriptor_record, FileCopyTransform};
pub use plugin::{ContentPlugin, EntitySource, FileArea, FormatPlugin, PluginKind, PluginRegistry, Reference, SourceLink};
pub use restore::{RestoreContext, RestoreTarget};
pub use site::{Actor, CapabilityCheck, EntityAccessor, EntityWriter, Scope, Site, SiteError};

pub use cbr_plan::{CancelToken, Environment, LogEntry, LogLevel, OperationLog, OperationState};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
