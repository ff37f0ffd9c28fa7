//! Engine facade
//!
//! [`Engine`] bundles the configuration, the site collaborators, the plugin
//! registry and the process-wide stores (id map and course locks). It is
//! cheap to clone; every clone shares the same stores, so operations started
//! from any clone stay isolated by their `backupid` only.

use crate::archive::Archive;
use crate::config::{BackupSettings, EngineConfig, RestoreSettings};
use crate::controller::{BackupController, OperationResult, RestoreController};
use crate::error::BackupError;
use crate::guard::{OperationGuard, OperationLocks};
use crate::idmap::IdMapStore;
use crate::ids::{BackupId, OperationKind};
use crate::plugin::PluginRegistry;
use crate::restore::RestoreTarget;
use crate::site::{Actor, Site};
use cbr_files::{FileRelocator, ProgressReporter};
use cbr_plan::{Environment, NoopEnvironment, OperationState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Entry point for backups and restores
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    site: Site,
    plugins: Arc<PluginRegistry>,
    idmap: Arc<IdMapStore>,
    locks: Arc<OperationLocks>,
    environment: Arc<dyn Environment>,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("wwwroot", &self.config.wwwroot)
            .field("activities", &self.plugins.activities().map(|p| p.name()).collect::<Vec<_>>())
            .field("idmap_rows", &self.idmap.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine for `site` with the installed `plugins`
    ///
    /// # Errors
    /// [`BackupError::Config`] for an invalid configuration
    pub fn new(config: EngineConfig, site: Site, plugins: PluginRegistry) -> Result<Self, BackupError> {
        config.validate()?;
        Ok(Self {
            config,
            site,
            plugins: Arc::new(plugins),
            idmap: Arc::new(IdMapStore::new()),
            locks: Arc::new(OperationLocks::new()),
            environment: Arc::new(NoopEnvironment),
            progress: None,
        })
    }

    /// Use `environment` for per-step hooks
    #[must_use]
    pub fn with_environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = environment;
        self
    }

    /// Report file-copy progress to `reporter`
    #[must_use]
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Share an existing id-map store
    #[must_use]
    pub fn with_idmap(mut self, idmap: Arc<IdMapStore>) -> Self {
        self.idmap = idmap;
        self
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Site collaborators
    #[inline]
    #[must_use]
    pub fn site(&self) -> &Site {
        &self.site
    }

    /// Installed plugins
    #[inline]
    #[must_use]
    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// Id-map store shared by all operations
    #[inline]
    #[must_use]
    pub fn idmap(&self) -> &Arc<IdMapStore> {
        &self.idmap
    }

    /// Course locks shared by all operations
    #[inline]
    #[must_use]
    pub fn locks(&self) -> &Arc<OperationLocks> {
        &self.locks
    }

    pub(crate) fn environment(&self) -> &Arc<dyn Environment> {
        &self.environment
    }

    pub(crate) fn guard(&self, backupid: BackupId) -> OperationGuard {
        OperationGuard::new(backupid, Arc::clone(&self.idmap), Arc::clone(&self.locks))
    }

    /// Fresh relocator for one operation
    pub(crate) fn relocator(&self) -> Arc<FileRelocator> {
        let relocator = FileRelocator::new();
        Arc::new(match &self.progress {
            Some(reporter) => relocator.with_progress(Arc::clone(reporter)),
            None => relocator,
        })
    }

    /// Start a backup controller
    ///
    /// # Errors
    /// See [`BackupController::new`]
    pub fn backup_controller(&self, actor: Actor, course_id: i64) -> Result<BackupController, BackupError> {
        BackupController::new(self, actor, course_id)
    }

    /// Start a restore controller
    ///
    /// # Errors
    /// See [`RestoreController::new`]
    pub fn restore_controller(
        &self,
        actor: Actor,
        archive: Arc<Archive>,
        target: RestoreTarget,
    ) -> Result<RestoreController, BackupError> {
        RestoreController::new(self, actor, archive, target)
    }

    /// Back up `course_id` start to finish
    ///
    /// `settings` replaces the configured defaults. The archive is returned
    /// only when the operation finished.
    pub fn backup(&self, actor: Actor, course_id: i64, settings: Option<BackupSettings>) -> BackupOutcome {
        let mut controller = match BackupController::new(self, actor, course_id) {
            Ok(c) => c,
            Err(e) => {
                return BackupOutcome {
                    result: OperationResult::rejected(OperationKind::Backup, &e),
                    archive: None,
                }
            }
        };
        let outcome = drive_backup(&mut controller, settings);
        let archive = controller.archive().cloned();
        BackupOutcome {
            result: controller.finish(outcome.err().as_ref()),
            archive,
        }
    }

    /// Restore `archive` into `target` start to finish
    pub fn restore(
        &self,
        actor: Actor,
        archive: &Archive,
        target: RestoreTarget,
        settings: Option<RestoreSettings>,
    ) -> OperationResult {
        let mut controller = match RestoreController::new(self, actor, Arc::new(archive.clone()), target) {
            Ok(c) => c,
            Err(e) => return OperationResult::rejected(OperationKind::Restore, &e),
        };
        let outcome = drive_restore(&mut controller, settings);
        controller.finish(outcome.err().as_ref())
    }

    /// Run a request against archive directories on disk
    ///
    /// Backups are written to `archive_dir`; restores read from it.
    pub fn run(&self, request: OperationRequest) -> OperationResult {
        let OperationRequest {
            actor,
            kind,
            course_id,
            archive_dir,
        } = request;
        match kind {
            OperationKind::Backup => {
                let mut controller = match BackupController::new(self, actor, course_id) {
                    Ok(c) => c,
                    Err(e) => return OperationResult::rejected(kind, &e),
                };
                let outcome = drive_backup(&mut controller, None).and_then(|()| controller.save(&archive_dir));
                let error = outcome.err();
                let mut result = controller.finish(error.as_ref());
                if let Some(e) = error.filter(|_| result.state == OperationState::Finished) {
                    // the tasks finished but the archive never reached disk
                    result.log.error(&e.tag(), None, e.to_string());
                    result.state = OperationState::Aborted;
                }
                result
            }
            OperationKind::Restore => {
                let archive = match Archive::open(&archive_dir) {
                    Ok(a) => a,
                    Err(e) => return OperationResult::rejected(kind, &e),
                };
                let target = if course_id == 0 {
                    RestoreTarget::NewCourse
                } else {
                    RestoreTarget::ExistingCourse(course_id)
                };
                self.restore(actor, &archive, target, None)
            }
        }
    }
}

fn drive_backup(controller: &mut BackupController, settings: Option<BackupSettings>) -> Result<(), BackupError> {
    if let Some(settings) = settings {
        controller.set_settings(settings)?;
    }
    controller.configure()?;
    controller.build_plan()?;
    controller.execute_plan()
}

fn drive_restore(controller: &mut RestoreController, settings: Option<RestoreSettings>) -> Result<(), BackupError> {
    if let Some(settings) = settings {
        controller.set_settings(settings)?;
    }
    controller.configure()?;
    controller.build_plan()?;
    controller.execute_plan()
}

/// Result of [`Engine::backup`]
#[derive(Clone)]
pub struct BackupOutcome {
    /// How the operation ended
    pub result: OperationResult,
    /// Archive, when the operation finished
    pub archive: Option<Archive>,
}

impl fmt::Debug for BackupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupOutcome")
            .field("result", &self.result)
            .field("archived", &self.archive.is_some())
            .finish()
    }
}

/// One operation to run through [`Engine::run`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Operator
    pub actor: Actor,
    /// Backup or restore
    pub kind: OperationKind,
    /// Course to back up, or to restore into; `0` restores into a new course
    pub course_id: i64,
    /// Archive directory written or read
    pub archive_dir: PathBuf,
}

impl OperationRequest {
    /// Back up `course_id` into `archive_dir`
    #[must_use]
    pub fn backup(actor: Actor, course_id: i64, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            actor,
            kind: OperationKind::Backup,
            course_id,
            archive_dir: archive_dir.into(),
        }
    }

    /// Restore `archive_dir` into `course_id` (`0` for a new course)
    #[must_use]
    pub fn restore(actor: Actor, course_id: i64, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            actor,
            kind: OperationKind::Restore,
            course_id,
            archive_dir: archive_dir.into(),
        }
    }
}
