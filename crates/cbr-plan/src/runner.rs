//! Plan execution
//!
//! The runner drives a [`Lifecycle`] from `PLAN_BUILT` to `FINISHED`:
//! tasks in plan order, steps in declaration order, then one after-all pass
//! over every task. A failing step aborts the run unless it is best-effort,
//! in which case it becomes a warning in the context's log. Cancellation is
//! honored only between tasks.

use crate::error::RunError;
use crate::log::OperationLog;
use crate::plan::{Plan, PlannedTask, TaskStatus};
use crate::state::{Lifecycle, OperationState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Name passed to [`Environment::raise_time_budget`] for the after-all pass
pub const AFTER_ALL_STEP: &str = "after_all";

/// Hooks into whatever supervises the operation
pub trait Environment: Send + Sync {
    /// Called at the start of every step; a supervisor may extend its
    /// wall-clock budget here
    fn raise_time_budget(&self, task: &str, step: &str);
}

/// Environment that ignores every hook
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEnvironment;

impl Environment for NoopEnvironment {
    fn raise_time_budget(&self, _task: &str, _step: &str) {}
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, not cancelled
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State every task context exposes to the runner
pub trait ExecutionContext {
    /// Operation log warnings and errors go to
    fn log(&mut self) -> &mut OperationLog;
}

impl ExecutionContext for OperationLog {
    fn log(&mut self) -> &mut OperationLog {
        self
    }
}

/// Runs plans
pub struct PlanRunner<'a> {
    environment: &'a dyn Environment,
    cancel: CancelToken,
}

impl<'a> PlanRunner<'a> {
    /// Runner reporting to `environment`
    #[must_use]
    pub fn new(environment: &'a dyn Environment) -> Self {
        Self {
            environment,
            cancel: CancelToken::new(),
        }
    }

    /// Observe `token` at task boundaries
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Execute `plan` against `ctx`
    ///
    /// `lifecycle` must be in `PLAN_BUILT`; it ends in `FINISHED` on
    /// success and `ABORTED` on any error, which is also logged.
    ///
    /// # Errors
    /// Cancellation, a failed non-best-effort step, a failed after-all hook,
    /// or a lifecycle violation
    pub fn run<C: ExecutionContext>(
        &self,
        plan: &mut Plan<C>,
        ctx: &mut C,
        lifecycle: &mut Lifecycle,
    ) -> Result<(), RunError> {
        let result = self.run_inner(plan, ctx, lifecycle);
        if let Err(e) = &result {
            let task = match e {
                RunError::Step { task, .. } => Some(task.as_str()),
                _ => None,
            };
            ctx.log().error(e.kind(), task, e.to_string());
            lifecycle.abort();
        }
        result
    }

    fn run_inner<C: ExecutionContext>(
        &self,
        plan: &mut Plan<C>,
        ctx: &mut C,
        lifecycle: &mut Lifecycle,
    ) -> Result<(), RunError> {
        lifecycle.advance(OperationState::StepsExecuting)?;
        let order = plan.order()?;

        for id in &order {
            let planned = &mut plan.tasks[id.index()];
            self.check_cancelled(planned.task.name())?;
            self.run_steps(planned, ctx)?;
        }
        lifecycle.advance(OperationState::StepsComplete)?;

        lifecycle.advance(OperationState::AfterTasksExecuting)?;
        for id in &order {
            let planned = &mut plan.tasks[id.index()];
            let name = planned.task.name().to_string();
            self.check_cancelled(&name)?;
            self.environment.raise_time_budget(&name, AFTER_ALL_STEP);
            planned.task.after_all(ctx).map_err(|source| {
                planned.status = TaskStatus::Failed;
                RunError::Step {
                    task: name,
                    step: AFTER_ALL_STEP.to_string(),
                    source,
                }
            })?;
            planned.status = TaskStatus::Finished;
        }
        lifecycle.advance(OperationState::Finished)?;
        Ok(())
    }

    fn run_steps<C: ExecutionContext>(&self, planned: &mut PlannedTask<C>, ctx: &mut C) -> Result<(), RunError> {
        let name = planned.task.name().to_string();
        let span = tracing::info_span!("task", task = %name);
        let _entered = span.enter();
        tracing::info!("task started");

        planned.status = TaskStatus::Running;
        for step in &planned.steps {
            self.environment.raise_time_budget(&name, &step.name);
            tracing::debug!(step = %step.name, "running step");
            match planned.task.run_step(step, ctx) {
                Ok(()) => {}
                Err(e) if step.best_effort => {
                    ctx.log()
                        .warn(e.kind(), Some(name.as_str()), format!("best-effort step `{}` failed: {e}", step.name));
                }
                Err(source) => {
                    planned.status = TaskStatus::Failed;
                    return Err(RunError::Step {
                        task: name,
                        step: step.name.clone(),
                        source,
                    });
                }
            }
        }
        planned.status = TaskStatus::StepsComplete;
        tracing::info!("task steps complete");
        Ok(())
    }

    fn check_cancelled(&self, before: &str) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled {
                before: before.to_string(),
            });
        }
        Ok(())
    }
}
