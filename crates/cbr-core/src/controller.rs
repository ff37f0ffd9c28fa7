//! Operation controllers
//!
//! A controller walks one backup or restore through its lifecycle:
//!
//! ```text
//! new ──▶ CREATED ──configure──▶ CONFIGURED ──build_plan──▶ PLAN_BUILT
//!                                                              │
//!                                             execute_plan ────┘
//!                                                  ▼
//!                               FINISHED  or  ABORTED ──destroy──▶ released
//! ```
//!
//! Permission checks happen once, in `new`. Settings are mutable only while
//! the controller is `CREATED`. `destroy` (or dropping the controller)
//! purges the operation's id-map rows and releases its course lock.

use crate::archive::{Archive, ArchiveHeader};
use crate::backup::{self, BackupContext, BackupParts};
use crate::config::{BackupSettings, RestoreSettings};
use crate::engine::Engine;
use crate::error::BackupError;
use crate::guard::OperationGuard;
use crate::ids::{BackupId, OperationKind};
use crate::restore::{self, RestoreContext, RestoreParts, RestoreTarget};
use crate::site::{capability, entity, Actor, Scope, SiteError};
use cbr_files::MemoryPool;
use cbr_plan::{
    CancelToken, Environment, ExecutionContext, Lifecycle, OperationLog, OperationState, Plan, PlanRunner,
};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

/// Lifecycle, plan and context shared by both controllers
struct Operation<C> {
    lifecycle: Lifecycle,
    cancel: CancelToken,
    plan: Option<Plan<C>>,
    context: Option<C>,
    log: OperationLog,
}

impl<C: ExecutionContext> Operation<C> {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            cancel: CancelToken::new(),
            plan: None,
            context: None,
            log: OperationLog::new(),
        }
    }

    fn state(&self) -> OperationState {
        self.lifecycle.state()
    }

    fn require(&self, action: &'static str, state: OperationState) -> Result<(), BackupError> {
        if self.state() == state {
            Ok(())
        } else {
            Err(BackupError::InvalidState {
                action,
                state: self.state(),
            })
        }
    }

    fn advance(&mut self, to: OperationState) -> Result<(), BackupError> {
        self.lifecycle.advance(to).map_err(BackupError::from)
    }

    /// Log `error`, abort, and hand the error back
    fn fail(&mut self, error: BackupError) -> BackupError {
        tracing::error!(error = %error, "operation aborted");
        let tag = error.tag();
        self.log_mut().error(&tag, None, error.to_string());
        self.lifecycle.abort();
        error
    }

    fn log_mut(&mut self) -> &mut OperationLog {
        match self.context.as_mut() {
            Some(ctx) => ctx.log(),
            None => &mut self.log,
        }
    }

    /// Install a freshly built context, carrying over entries logged so far
    fn install(&mut self, mut context: C, plan: Plan<C>) {
        let earlier = std::mem::take(&mut self.log);
        let log = context.log();
        let later = std::mem::replace(log, earlier);
        log.extend(later);
        self.context = Some(context);
        self.plan = Some(plan);
    }

    fn execute(&mut self, environment: &dyn Environment) -> Result<(), BackupError> {
        if self.state() != OperationState::PlanBuilt {
            return Err(BackupError::InvalidState {
                action: "execute the plan",
                state: self.state(),
            });
        }
        let (Some(plan), Some(ctx)) = (self.plan.as_mut(), self.context.as_mut()) else {
            return Err(BackupError::InvalidState {
                action: "execute the plan",
                state: self.state(),
            });
        };
        PlanRunner::new(environment)
            .with_cancel(self.cancel.clone())
            .run(plan, ctx, &mut self.lifecycle)
            .map_err(BackupError::from)
    }
}

/// Drives one backup of one course
pub struct BackupController {
    engine: Engine,
    actor: Actor,
    course_id: i64,
    settings: BackupSettings,
    guard: OperationGuard,
    op: Operation<BackupContext>,
}

impl std::fmt::Debug for BackupController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupController")
            .field("backupid", &self.guard.backupid())
            .field("course_id", &self.course_id)
            .field("state", &self.op.state())
            .finish_non_exhaustive()
    }
}

impl BackupController {
    /// Backup of `course_id` run by `actor`
    ///
    /// # Errors
    /// [`BackupError::PermissionDenied`] unless `actor` may back up the course
    pub fn new(engine: &Engine, actor: Actor, course_id: i64) -> Result<Self, BackupError> {
        check_capability(engine, actor, capability::BACKUP, Scope::Course(course_id))?;
        let backupid = BackupId::generate();
        tracing::info!(%backupid, course_id, userid = actor.userid, "backup created");
        Ok(Self {
            guard: engine.guard(backupid),
            settings: engine.config().backup.clone(),
            engine: engine.clone(),
            actor,
            course_id,
            op: Operation::new(),
        })
    }

    /// Operation id
    #[inline]
    #[must_use]
    pub fn backupid(&self) -> BackupId {
        self.guard.backupid()
    }

    /// Operator
    #[inline]
    #[must_use]
    pub fn actor(&self) -> Actor {
        self.actor
    }

    /// Course being backed up
    #[inline]
    #[must_use]
    pub fn course_id(&self) -> i64 {
        self.course_id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> OperationState {
        self.op.state()
    }

    /// States visited so far
    #[must_use]
    pub fn history(&self) -> &[OperationState] {
        self.op.lifecycle.history()
    }

    /// Effective settings
    #[must_use]
    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Token that cancels the run at the next task boundary
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.op.cancel.clone()
    }

    /// Replace the settings
    ///
    /// # Errors
    /// [`BackupError::InvalidState`] once configured
    pub fn set_settings(&mut self, settings: BackupSettings) -> Result<(), BackupError> {
        self.op.require("change settings", OperationState::Created)?;
        self.settings = settings;
        Ok(())
    }

    /// Freeze the settings
    ///
    /// # Errors
    /// [`BackupError::InvalidState`] unless `CREATED`
    pub fn configure(&mut self) -> Result<(), BackupError> {
        self.op.require("configure", OperationState::Created)?;
        self.settings = self.settings.clone().normalized();
        self.op.advance(OperationState::Configured)
    }

    /// Read the course and plan one task per unit
    ///
    /// # Errors
    /// [`BackupError::InvalidState`] unless `CONFIGURED`; a missing course
    /// or broken plugin definition aborts the operation
    pub fn build_plan(&mut self) -> Result<(), BackupError> {
        self.op.require("build the plan", OperationState::Configured)?;
        match self.plan_backup() {
            Ok((context, plan)) => {
                tracing::info!(backupid = %self.backupid(), tasks = plan.len(), "backup planned");
                self.op.install(context, plan);
                self.op.advance(OperationState::PlanBuilt)
            }
            Err(e) => Err(self.op.fail(e)),
        }
    }

    fn plan_backup(&mut self) -> Result<(BackupContext, Plan<BackupContext>), BackupError> {
        let course = self
            .engine
            .site()
            .accessor
            .fetch(entity::COURSE, self.course_id)?
            .ok_or_else(|| SiteError::NotFound {
                entity: entity::COURSE.to_string(),
                id: self.course_id,
            })?;
        let header = ArchiveHeader {
            format_version: self.engine.config().format_version,
            backupid: self.backupid(),
            created_at: Utc::now(),
            source_wwwroot: self.engine.config().wwwroot.clone(),
            original_course_id: self.course_id,
            original_course_format: course.get("format").unwrap_or_default().to_string(),
            settings: self.settings.clone(),
            contents: Vec::new(),
            missing_files: Vec::new(),
        };
        let parts = BackupParts {
            wwwroot: self.engine.config().wwwroot.clone(),
            site: self.engine.site().clone(),
            plugins: Arc::clone(self.engine.plugins()),
            idmap: Arc::clone(self.engine.idmap()),
            relocator: self.engine.relocator(),
        };
        let mut context = BackupContext::new(parts, header, Arc::new(MemoryPool::new()))?;
        let plan = backup::build_plan(&mut context, self.course_id)?;
        Ok((context, plan))
    }

    /// Planned task names in execution order
    #[must_use]
    pub fn task_names(&self) -> Vec<String> {
        self.op
            .plan
            .as_ref()
            .map(|plan| plan.task_names().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Run every task
    ///
    /// # Errors
    /// [`BackupError::InvalidState`] unless `PLAN_BUILT`; otherwise the
    /// error that aborted the run, already in the log
    pub fn execute_plan(&mut self) -> Result<(), BackupError> {
        let environment = Arc::clone(self.engine.environment());
        let _span = tracing::info_span!("backup", backupid = %self.backupid()).entered();
        self.op.execute(environment.as_ref())
    }

    /// Archive produced by a finished run
    #[must_use]
    pub fn archive(&self) -> Option<&Archive> {
        match self.op.state() {
            OperationState::Finished => self.op.context.as_ref().map(BackupContext::archive),
            _ => None,
        }
    }

    /// Write the finished archive to `dir`
    ///
    /// The archive is assembled in a staging directory next to `dir` and
    /// renamed into place, so `dir` never holds a partial archive.
    ///
    /// # Errors
    /// [`BackupError::InvalidState`] unless `FINISHED`; I/O failure
    pub fn save(&mut self, dir: &Path) -> Result<(), BackupError> {
        self.op.require("save the archive", OperationState::Finished)?;
        let archive = self.archive().cloned().ok_or(BackupError::InvalidState {
            action: "save the archive",
            state: self.op.state(),
        })?;
        let parent = match dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new().prefix(".cbr-staging-").tempdir_in(parent)?;
        let staged = self.guard.stage(staging).path().to_path_buf();
        archive.save(&staged)?;
        std::fs::rename(&staged, dir)?;
        tracing::info!(backupid = %self.backupid(), dir = %dir.display(), "archive saved");
        Ok(())
    }

    /// Operation log so far
    #[must_use]
    pub fn log(&self) -> &OperationLog {
        self.op.context.as_ref().map_or(&self.op.log, BackupContext::operation_log)
    }

    /// Release the operation's resources and report how it ended
    pub fn destroy(self) -> OperationResult {
        self.finish(None)
    }

    /// [`destroy`](Self::destroy), recording `error` as the reason it stopped
    pub(crate) fn finish(self, error: Option<&BackupError>) -> OperationResult {
        let Self {
            guard, op, course_id, ..
        } = self;
        let backupid = guard.backupid();
        guard.destroy();
        let state = op.lifecycle.state();
        let log = match op.context {
            Some(ctx) => ctx.into_parts().1,
            None => op.log,
        };
        tracing::info!(%backupid, %state, "backup destroyed");
        OperationResult {
            backupid,
            kind: OperationKind::Backup,
            state,
            course_id: Some(course_id),
            log,
            error: error.map(ToString::to_string),
        }
    }
}

/// Drives one restore of one archive
pub struct RestoreController {
    engine: Engine,
    actor: Actor,
    archive: Arc<Archive>,
    target: RestoreTarget,
    settings: RestoreSettings,
    guard: OperationGuard,
    op: Operation<RestoreContext>,
}

impl std::fmt::Debug for RestoreController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreController")
            .field("backupid", &self.guard.backupid())
            .field("target", &self.target)
            .field("state", &self.op.state())
            .finish_non_exhaustive()
    }
}

impl RestoreController {
    /// Restore of `archive` into `target` run by `actor`
    ///
    /// The archive's format version is checked here, before anything is
    /// written.
    ///
    /// # Errors
    /// [`BackupError::PermissionDenied`], or
    /// [`BackupError::UnsupportedVersion`] for an archive newer than the
    /// engine understands
    pub fn new(engine: &Engine, actor: Actor, archive: Arc<Archive>, target: RestoreTarget) -> Result<Self, BackupError> {
        let scope = match target {
            RestoreTarget::NewCourse => Scope::System,
            RestoreTarget::ExistingCourse(id) => Scope::Course(id),
        };
        check_capability(engine, actor, capability::RESTORE, scope)?;
        engine.config().format_version.accepts(archive.header().format_version)?;

        let backupid = BackupId::generate();
        tracing::info!(
            %backupid,
            source = %archive.header().backupid,
            ?target,
            userid = actor.userid,
            "restore created"
        );
        Ok(Self {
            guard: engine.guard(backupid),
            settings: engine.config().restore.clone(),
            engine: engine.clone(),
            actor,
            archive,
            target,
            op: Operation::new(),
        })
    }

    /// Operation id
    #[inline]
    #[must_use]
    pub fn backupid(&self) -> BackupId {
        self.guard.backupid()
    }

    /// Operator
    #[inline]
    #[must_use]
    pub fn actor(&self) -> Actor {
        self.actor
    }

    /// Where the archive goes
    #[must_use]
    pub fn target(&self) -> &RestoreTarget {
        &self.target
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> OperationState {
        self.op.state()
    }

    /// States visited so far
    #[must_use]
    pub fn history(&self) -> &[OperationState] {
        self.op.lifecycle.history()
    }

    /// Requested settings
    #[must_use]
    pub fn settings(&self) -> &RestoreSettings {
        &self.settings
    }

    /// Token that cancels the run at the next task boundary
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.op.cancel.clone()
    }

    /// Replace the settings
    ///
    /// # Errors
    /// [`BackupError::InvalidState`] once configured
    pub fn set_settings(&mut self, settings: RestoreSettings) -> Result<(), BackupError> {
        self.op.require("change settings", OperationState::Created)?;
        self.settings = settings;
        Ok(())
    }

    /// Freeze the settings and lock an existing target course
    ///
    /// # Errors
    /// [`BackupError::InvalidState`] unless `CREATED`;
    /// [`BackupError::Locked`] when another restore holds the course
    pub fn configure(&mut self) -> Result<(), BackupError> {
        self.op.require("configure", OperationState::Created)?;
        if let RestoreTarget::ExistingCourse(id) = self.target {
            if let Err(e) = self.guard.lock(id) {
                return Err(self.op.fail(e));
            }
        }
        self.op.advance(OperationState::Configured)
    }

    /// Plan one task per archive unit
    ///
    /// # Errors
    /// [`BackupError::InvalidState`] unless `CONFIGURED`; a malformed
    /// archive aborts the operation
    pub fn build_plan(&mut self) -> Result<(), BackupError> {
        self.op.require("build the plan", OperationState::Configured)?;
        let parts = RestoreParts {
            backupid: self.backupid(),
            wwwroot: self.engine.config().wwwroot.clone(),
            site: self.engine.site().clone(),
            plugins: Arc::clone(self.engine.plugins()),
            idmap: Arc::clone(self.engine.idmap()),
            relocator: self.engine.relocator(),
        };
        let planned = RestoreContext::new(parts, Arc::clone(&self.archive), self.target, &self.settings)
            .and_then(|mut ctx| restore::build_plan(&mut ctx).map(|plan| (ctx, plan)));
        match planned {
            Ok((context, plan)) => {
                tracing::info!(backupid = %self.backupid(), tasks = plan.len(), "restore planned");
                self.op.install(context, plan);
                self.op.advance(OperationState::PlanBuilt)
            }
            Err(e) => Err(self.op.fail(e)),
        }
    }

    /// Planned task names in execution order
    #[must_use]
    pub fn task_names(&self) -> Vec<String> {
        self.op
            .plan
            .as_ref()
            .map(|plan| plan.task_names().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Run every task
    ///
    /// # Errors
    /// [`BackupError::InvalidState`] unless `PLAN_BUILT`; otherwise the
    /// error that aborted the run, already in the log
    pub fn execute_plan(&mut self) -> Result<(), BackupError> {
        let environment = Arc::clone(self.engine.environment());
        let _span = tracing::info_span!("restore", backupid = %self.backupid()).entered();
        self.op.execute(environment.as_ref())
    }

    /// Id of the restored course, once its task ran
    #[must_use]
    pub fn course_id(&self) -> Option<i64> {
        match self.target {
            RestoreTarget::ExistingCourse(id) => Some(id),
            RestoreTarget::NewCourse => self.op.context.as_ref().and_then(RestoreContext::course_id),
        }
    }

    /// Operation log so far
    #[must_use]
    pub fn log(&self) -> &OperationLog {
        self.op.context.as_ref().map_or(&self.op.log, RestoreContext::operation_log)
    }

    /// Release the operation's resources and report how it ended
    pub fn destroy(self) -> OperationResult {
        self.finish(None)
    }

    pub(crate) fn finish(self, error: Option<&BackupError>) -> OperationResult {
        let course_id = self.course_id();
        let Self { guard, op, .. } = self;
        let backupid = guard.backupid();
        guard.destroy();
        let state = op.lifecycle.state();
        let log = match op.context {
            Some(ctx) => ctx.into_log(),
            None => op.log,
        };
        tracing::info!(%backupid, %state, ?course_id, "restore destroyed");
        OperationResult {
            backupid,
            kind: OperationKind::Restore,
            state,
            course_id,
            log,
            error: error.map(ToString::to_string),
        }
    }
}

fn check_capability(engine: &Engine, actor: Actor, permission: &str, scope: Scope) -> Result<(), BackupError> {
    if engine.site().capabilities.allowed(actor, permission, scope) {
        Ok(())
    } else {
        tracing::warn!(userid = actor.userid, permission, ?scope, "permission denied");
        Err(BackupError::PermissionDenied {
            userid: actor.userid,
            permission: permission.to_string(),
        })
    }
}

/// How an operation ended
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OperationResult {
    /// Operation id
    pub backupid: BackupId,
    /// Backup or restore
    pub kind: OperationKind,
    /// Final lifecycle state
    pub state: OperationState,
    /// Backed-up course, or the course restored into
    pub course_id: Option<i64>,
    /// Warnings and errors
    pub log: OperationLog,
    /// Error that stopped the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    /// Operation refused before it was created
    pub(crate) fn rejected(kind: OperationKind, error: &BackupError) -> Self {
        let mut log = OperationLog::new();
        log.error(&error.tag(), None, error.to_string());
        Self {
            backupid: BackupId::generate(),
            kind,
            state: OperationState::Aborted,
            course_id: None,
            log,
            error: Some(error.to_string()),
        }
    }

    /// Whether every task completed
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == OperationState::Finished
    }
}
