//! Admission conditions and their evaluation
//!
//! A condition relates a candidate task to other tasks by identifier. The
//! evaluators here are pure: they take the declared conditions and a
//! predicate telling whether a task is currently executing.

use std::collections::HashSet;

use crate::task::{Task, TaskId};

/// A rule relating a task's admission to other tasks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    /// Cancel the candidate if any of these tasks is executing
    CancelIfExecuting(Vec<TaskId>),
    /// Defer the candidate while any of these tasks is executing
    DeferIfExecuting(Vec<TaskId>),
    /// Cancel any of these tasks that are executing when the candidate is admitted
    MakeWayByCancelling(Vec<TaskId>),
}

impl Condition {
    pub fn cancel_if_executing<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        Self::CancelIfExecuting(ids(tasks))
    }

    pub fn defer_if_executing<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        Self::DeferIfExecuting(ids(tasks))
    }

    pub fn make_way_by_cancelling<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        Self::MakeWayByCancelling(ids(tasks))
    }

    /// The referenced tasks
    pub fn tasks(&self) -> &[TaskId] {
        match self {
            Self::CancelIfExecuting(tasks)
            | Self::DeferIfExecuting(tasks)
            | Self::MakeWayByCancelling(tasks) => tasks,
        }
    }

    fn any_executing(&self, is_executing: &impl Fn(&TaskId) -> bool) -> bool {
        self.tasks().iter().any(is_executing)
    }
}

fn ids<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<TaskId> {
    tasks.into_iter().map(Task::id).collect()
}

/// True if a cancel or defer condition references an executing task
pub fn blocks_execution(conditions: &[Condition], is_executing: impl Fn(&TaskId) -> bool) -> bool {
    conditions.iter().any(|condition| match condition {
        Condition::CancelIfExecuting(_) | Condition::DeferIfExecuting(_) => {
            condition.any_executing(&is_executing)
        }
        Condition::MakeWayByCancelling(_) => false,
    })
}

/// True if a defer condition references an executing task
pub fn requests_deferral(conditions: &[Condition], is_executing: impl Fn(&TaskId) -> bool) -> bool {
    conditions.iter().any(|condition| {
        matches!(condition, Condition::DeferIfExecuting(_)) && condition.any_executing(&is_executing)
    })
}

/// Executing tasks named by make-way conditions, in first-seen order without duplicates
pub fn make_way_targets(
    conditions: &[Condition],
    is_executing: impl Fn(&TaskId) -> bool,
) -> Vec<TaskId> {
    let mut seen = HashSet::new();
    conditions
        .iter()
        .filter(|c| matches!(c, Condition::MakeWayByCancelling(_)))
        .flat_map(|c| c.tasks().iter().copied())
        .filter(|id| is_executing(id) && seen.insert(*id))
        .collect()
}
