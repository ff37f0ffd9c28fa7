//! Plans and the operation lifecycle
//!
//! Generic over the execution context, so the same machinery runs backups
//! and restores.
//!
//! # Core Concepts
//!
//! - [`Task`]: unit of work with ordered [`StepSpec`]s and an after-all hook
//! - [`Plan`]: tasks with backward-only dependencies, ordered topologically
//! - [`Lifecycle`]: `CREATED → … → FINISHED | ABORTED` state machine
//! - [`PlanRunner`]: executes a plan with best-effort and cancellation policy
//! - [`OperationLog`]: warnings and errors handed back to the caller
//!
//! # Example
//!
//! ```rust,ignore
//! use cbr_plan::{Lifecycle, NoopEnvironment, OperationLog, OperationState, Plan, PlanRunner};
//!
//! let mut plan: Plan<OperationLog> = Plan::new();
//! let course = plan.add_task(Box::new(CourseTask::new()), &[])?;
//! plan.add_task(Box::new(SectionTask::new(1)), &[course])?;
//!
//! let mut lifecycle = Lifecycle::new();
//! lifecycle.advance(OperationState::Configured)?;
//! lifecycle.advance(OperationState::PlanBuilt)?;
//! PlanRunner::new(&NoopEnvironment).run(&mut plan, &mut OperationLog::new(), &mut lifecycle)?;
//! ```

#![warn(unreachable_pub)]

mod error;
mod log;
mod plan;
mod runner;
mod state;
mod task;

pub use error::{PlanError, RunError, StepError};
pub use log::{LogEntry, LogLevel, OperationLog};
pub use plan::{Plan, SkippedUnit, TaskId, TaskStatus};
pub use runner::{CancelToken, Environment, ExecutionContext, NoopEnvironment, PlanRunner, AFTER_ALL_STEP};
pub use state::{allowed_transitions, validate_transition, Lifecycle, OperationState};
pub use task::{StepKind, StepSpec, Task};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
