//! Tasks and their steps

use crate::error::StepError;
use serde::{Deserialize, Serialize};

/// Category of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Element tree write or read
    Structure,
    /// Attachment copies
    Files,
    /// Id annotations and bookkeeping
    Annotations,
}

/// Declared step of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique within the task
    pub name: String,
    /// Category
    pub kind: StepKind,
    /// Failure downgrades to a warning; only allowed for [`StepKind::Files`]
    pub best_effort: bool,
}

impl StepSpec {
    /// Step of `kind`
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            best_effort: false,
        }
    }

    /// Structure step
    #[must_use]
    pub fn structure(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::Structure)
    }

    /// File-copy step
    #[must_use]
    pub fn files(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::Files)
    }

    /// Annotation step
    #[must_use]
    pub fn annotations(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::Annotations)
    }

    /// Mark best-effort
    #[inline]
    #[must_use]
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

/// Unit of plan work over an execution context `C`
///
/// Steps run strictly in the order [`steps`](Task::steps) declares them.
/// [`after_all`](Task::after_all) runs once every task of the plan has
/// completed its steps.
pub trait Task<C> {
    /// Unique task name, e.g. `activity_14`
    fn name(&self) -> &str;

    /// Ordered steps
    fn steps(&self) -> Vec<StepSpec>;

    /// Run one step
    ///
    /// # Errors
    /// Any failure; the runner applies the best-effort policy
    fn run_step(&mut self, step: &StepSpec, ctx: &mut C) -> Result<(), StepError>;

    /// Cross-task fix-ups after all steps of all tasks
    ///
    /// # Errors
    /// Any failure aborts the operation
    fn after_all(&mut self, ctx: &mut C) -> Result<(), StepError> {
        let _ = ctx;
        Ok(())
    }
}
