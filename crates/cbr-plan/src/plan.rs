//! Ordered task plans
//!
//! Tasks may only depend on tasks declared before them. Execution order is a
//! topological sort of the dependency graph with ties broken by declaration
//! order, so a plan without dependencies runs exactly as declared.

use crate::error::PlanError;
use crate::task::{StepKind, StepSpec, Task};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;

/// Index of a task in its plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(usize);

impl TaskId {
    /// Declaration index
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Progress of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Not started
    Pending,
    /// Steps running
    Running,
    /// All steps done
    StepsComplete,
    /// A step failed
    Failed,
    /// After-all pass done
    Finished,
}

/// Structural unit left out of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUnit {
    /// Unit description
    pub unit: String,
    /// Why it was skipped
    pub reason: String,
}

pub(crate) struct PlannedTask<C> {
    pub(crate) task: Box<dyn Task<C>>,
    pub(crate) steps: Vec<StepSpec>,
    pub(crate) status: TaskStatus,
}

/// Ordered set of tasks for one operation
pub struct Plan<C> {
    pub(crate) tasks: Vec<PlannedTask<C>>,
    graph: DiGraphMap<usize, ()>,
    skipped: Vec<SkippedUnit>,
}

impl<C> fmt::Debug for Plan<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("tasks", &self.task_names())
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl<C> Default for Plan<C> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            graph: DiGraphMap::new(),
            skipped: Vec::new(),
        }
    }
}

impl<C> Plan<C> {
    /// Empty plan
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task depending on earlier tasks `deps`
    ///
    /// # Errors
    /// Duplicate task or step names, a dependency that is not an earlier
    /// task, or a best-effort step that is not a file step
    pub fn add_task(&mut self, task: Box<dyn Task<C>>, deps: &[TaskId]) -> Result<TaskId, PlanError> {
        let name = task.name().to_string();
        if self.tasks.iter().any(|t| t.task.name() == name) {
            return Err(PlanError::DuplicateTask(name));
        }

        let steps = task.steps();
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name.as_str()) {
                return Err(PlanError::DuplicateStep {
                    task: name,
                    step: step.name.clone(),
                });
            }
            if step.best_effort && step.kind != StepKind::Files {
                return Err(PlanError::BestEffortNotAllowed {
                    task: name,
                    step: step.name.clone(),
                });
            }
        }

        let id = self.tasks.len();
        if let Some(bad) = deps.iter().find(|d| d.0 >= id) {
            return Err(PlanError::UnknownDependency {
                task: name,
                dependency: bad.0,
            });
        }

        self.graph.add_node(id);
        for dep in deps {
            self.graph.add_edge(dep.0, id, ());
        }
        tracing::debug!(task = %name, steps = steps.len(), deps = deps.len(), "planned task");
        self.tasks.push(PlannedTask {
            task,
            steps,
            status: TaskStatus::Pending,
        });
        Ok(TaskId(id))
    }

    /// Record a unit that could not be planned
    pub fn skip(&mut self, unit: impl Into<String>, reason: impl Into<String>) {
        let skipped = SkippedUnit {
            unit: unit.into(),
            reason: reason.into(),
        };
        tracing::debug!(unit = %skipped.unit, reason = %skipped.reason, "skipped unit");
        self.skipped.push(skipped);
    }

    /// Units left out of the plan
    #[must_use]
    pub fn skipped(&self) -> &[SkippedUnit] {
        &self.skipped
    }

    /// Execution order
    ///
    /// # Errors
    /// [`PlanError::Cycle`] if the graph is cyclic
    pub fn order(&self) -> Result<Vec<TaskId>, PlanError> {
        let mut indegree: Vec<usize> = (0..self.tasks.len())
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| Reverse(n))
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(Reverse(n)) = ready.pop() {
            order.push(TaskId(n));
            for next in self.graph.neighbors_directed(n, Direction::Outgoing) {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == self.tasks.len() {
            Ok(order)
        } else {
            Err(PlanError::Cycle)
        }
    }

    /// Dependencies of a task
    #[must_use]
    pub fn dependencies(&self, id: TaskId) -> Vec<TaskId> {
        let mut deps: Vec<_> = self
            .graph
            .neighbors_directed(id.0, Direction::Incoming)
            .map(TaskId)
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Task id by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<TaskId> {
        self.tasks.iter().position(|t| t.task.name() == name).map(TaskId)
    }

    /// Status of a task
    #[must_use]
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(id.0).map(|t| t.status)
    }

    /// Declared steps of a task
    #[must_use]
    pub fn steps(&self, id: TaskId) -> Option<&[StepSpec]> {
        self.tasks.get(id.0).map(|t| t.steps.as_slice())
    }

    /// Task names in declaration order
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.task.name()).collect()
    }

    /// Number of tasks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan has no tasks
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;

    struct Named(&'static str, Vec<StepSpec>);

    impl Task<()> for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn steps(&self) -> Vec<StepSpec> {
            self.1.clone()
        }
        fn run_step(&mut self, _step: &StepSpec, _ctx: &mut ()) -> Result<(), StepError> {
            Ok(())
        }
    }

    fn task(name: &'static str) -> Box<dyn Task<()>> {
        Box::new(Named(name, vec![StepSpec::structure("structure")]))
    }

    #[test]
    fn forward_dependency_rejected() {
        let mut plan = Plan::new();
        plan.add_task(task("course"), &[]).unwrap();
        let err = plan.add_task(task("section_1"), &[TaskId(1)]).unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { dependency: 1, .. }));
    }

    #[test]
    fn best_effort_only_for_files() {
        let mut plan: Plan<()> = Plan::new();
        let bad = Box::new(Named("course", vec![StepSpec::structure("structure").best_effort()]));
        assert!(matches!(plan.add_task(bad, &[]), Err(PlanError::BestEffortNotAllowed { .. })));
        let ok = Box::new(Named("course", vec![StepSpec::files("files").best_effort()]));
        assert!(plan.add_task(ok, &[]).is_ok());
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut plan = Plan::new();
        plan.add_task(task("course"), &[]).unwrap();
        assert_eq!(plan.add_task(task("course"), &[]).unwrap_err(), PlanError::DuplicateTask("course".into()));
        let twice = Box::new(Named("x", vec![StepSpec::structure("s"), StepSpec::files("s")]));
        assert!(matches!(plan.add_task(twice, &[]), Err(PlanError::DuplicateStep { .. })));
    }

    #[test]
    fn ties_follow_declaration_order() {
        let mut plan = Plan::new();
        let course = plan.add_task(task("course"), &[]).unwrap();
        let users = plan.add_task(task("users"), &[]).unwrap();
        plan.add_task(task("section_1"), &[course]).unwrap();
        plan.add_task(task("activity_3"), &[users]).unwrap();
        let order: Vec<_> = plan.order().unwrap().into_iter().map(TaskId::index).collect();
        assert_eq!(order, [0, 1, 2, 3]);
        assert_eq!(plan.dependencies(TaskId(3)), [users]);
    }
}
