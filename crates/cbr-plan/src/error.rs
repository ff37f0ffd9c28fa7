//! Plan and step errors

use crate::state::OperationState;
use std::error::Error as StdError;

/// Plan construction and lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Two tasks share a name
    #[error("duplicate task `{0}`")]
    DuplicateTask(String),

    /// Dependency id not in the plan
    #[error("task `{task}` depends on unknown task #{dependency}")]
    UnknownDependency {
        /// Dependent task
        task: String,
        /// Missing task index
        dependency: usize,
    },

    /// Two steps of one task share a name
    #[error("task `{task}` declares step `{step}` twice")]
    DuplicateStep {
        /// Task name
        task: String,
        /// Step name
        step: String,
    },

    /// Only file-copy steps may be best-effort
    #[error("step `{task}/{step}` is best-effort but is not a file step")]
    BestEffortNotAllowed {
        /// Task name
        task: String,
        /// Step name
        step: String,
    },

    /// No task type handles a structural unit
    #[error("no task registered for `{unit}`: {reason}")]
    Unresolvable {
        /// Unit description, e.g. `activity 14 (quiz)`
        unit: String,
        /// Why it could not be planned
        reason: String,
    },

    /// Dependency graph has a cycle
    #[error("task dependencies form a cycle")]
    Cycle,

    /// State machine violation
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: OperationState,
        /// Requested state
        to: OperationState,
    },
}

/// Failure of one task step
///
/// `kind` is the taxonomy tag carried into the operation log.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct StepError {
    kind: String,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl StepError {
    /// Generic step failure
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind("StepError", message)
    }

    /// Step failure tagged with an error kind
    #[must_use]
    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying error
    #[must_use]
    pub fn caused_by(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Taxonomy tag
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Message without the source chain
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a plan run stopped early
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Cancellation observed at a task boundary
    #[error("operation cancelled before task `{before}`")]
    Cancelled {
        /// Task that did not start
        before: String,
    },

    /// A non-best-effort step failed
    #[error("step `{task}/{step}` failed: {source}")]
    Step {
        /// Task name
        task: String,
        /// Step name
        step: String,
        /// Underlying failure
        #[source]
        source: StepError,
    },

    /// Lifecycle or plan problem
    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl RunError {
    /// Taxonomy tag for the log
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Cancelled { .. } => "Cancelled",
            Self::Step { source, .. } => source.kind(),
            Self::Plan(_) => "PlanError",
        }
    }
}
