//! Operation state machine
//!
//! `CREATED → CONFIGURED → PLAN_BUILT → STEPS_EXECUTING → STEPS_COMPLETE →
//! AFTER_TASKS_EXECUTING → FINISHED`, with `ABORTED` reachable from every
//! non-terminal state.

use crate::error::PlanError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one backup or restore operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    /// Controller exists, settings still editable
    Created,
    /// Settings frozen
    Configured,
    /// Tasks instantiated and ordered
    PlanBuilt,
    /// Task steps running
    StepsExecuting,
    /// Every task finished its steps
    StepsComplete,
    /// Cross-task fix-up pass running
    AfterTasksExecuting,
    /// Done
    Finished,
    /// Stopped on an unrecoverable error or cancellation
    Aborted,
}

impl OperationState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Configured => "CONFIGURED",
            Self::PlanBuilt => "PLAN_BUILT",
            Self::StepsExecuting => "STEPS_EXECUTING",
            Self::StepsComplete => "STEPS_COMPLETE",
            Self::AfterTasksExecuting => "AFTER_TASKS_EXECUTING",
            Self::Finished => "FINISHED",
            Self::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: OperationState) -> Vec<OperationState> {
    use OperationState::{
        AfterTasksExecuting, Aborted, Configured, Created, Finished, PlanBuilt, StepsComplete,
        StepsExecuting,
    };
    match from {
        Created => vec![Configured, Aborted],
        Configured => vec![PlanBuilt, Aborted],
        PlanBuilt => vec![StepsExecuting, Aborted],
        StepsExecuting => vec![StepsComplete, Aborted],
        StepsComplete => vec![AfterTasksExecuting, Aborted],
        AfterTasksExecuting => vec![Finished, Aborted],
        Finished | Aborted => vec![],
    }
}

/// Check a single transition
///
/// # Errors
/// [`PlanError::IllegalTransition`] if `to` is not reachable from `from`
pub fn validate_transition(from: OperationState, to: OperationState) -> Result<(), PlanError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PlanError::IllegalTransition { from, to })
    }
}

/// Current state plus the path that led there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    state: OperationState,
    history: Vec<OperationState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: OperationState::Created,
            history: vec![OperationState::Created],
        }
    }
}

impl Lifecycle {
    /// Lifecycle in `CREATED`
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Every state visited, in order
    #[must_use]
    pub fn history(&self) -> &[OperationState] {
        &self.history
    }

    /// Move to `to`
    ///
    /// # Errors
    /// [`PlanError::IllegalTransition`]
    pub fn advance(&mut self, to: OperationState) -> Result<(), PlanError> {
        validate_transition(self.state, to)?;
        tracing::debug!(from = %self.state, %to, "operation state");
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Move to `ABORTED` unless already terminal
    ///
    /// Returns whether the state changed.
    pub fn abort(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = OperationState::Aborted;
        self.history.push(OperationState::Aborted);
        true
    }
}
