//! Task types and the per-task state machine

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::condition::Condition;
use crate::context::{ExecutionContext, Job};
use crate::lifecycle::Suspension;

/// Globally unique, immutable task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a task is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Not submitted, or finished its last round normally
    #[default]
    Idle,
    /// Admitted and running
    Executing,
    /// Waiting for a conflicting task to finish
    Deferred,
    /// Cancelled during the current round
    Cancelled,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Executing => write!(f, "executing"),
            Self::Deferred => write!(f, "deferred"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The work a task performs
pub type TaskBlock = dyn Fn(TaskControl) + Send + Sync;

/// Invoked once when an execution round finishes
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Flags and completion callback for a single execution round
struct Round {
    finished: AtomicBool,
    cancelled: AtomicBool,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl Round {
    fn new(on_complete: CompletionCallback) -> Self {
        Self {
            finished: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            on_complete: Mutex::new(Some(on_complete)),
        }
    }

    /// Mark the round finished. Only the call that flips the flag runs the
    /// callback, and it runs with no lock held.
    fn finish(&self) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callback = self.on_complete.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Handle given to a task's block for the current execution round.
///
/// The block must call [`finish`](Self::finish) exactly when its work is
/// done, either before returning or later from whatever asynchronous work it
/// started. Until then the coordinator considers the task executing.
/// Cancellation is cooperative: long-running blocks should poll
/// [`is_cancelled`](Self::is_cancelled) and stop early.
#[derive(Clone)]
pub struct TaskControl {
    id: TaskId,
    round: Arc<Round>,
    suspension: Option<Arc<Suspension>>,
}

impl TaskControl {
    /// Signal that the task's work is complete
    pub fn finish(&self) {
        if self.round.finish() {
            debug!(task = %self.id, "task round finished");
        }
    }

    /// Whether the round has already finished (normally or by cancellation)
    pub fn is_finished(&self) -> bool {
        self.round.is_finished()
    }

    /// Whether the task has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.round.cancelled.load(Ordering::Acquire)
    }

    /// Whether a pausable task is currently suspended by the host lifecycle
    pub fn is_suspended(&self) -> bool {
        self.suspension
            .as_ref()
            .is_some_and(|s| s.is_suspended())
    }

    /// Sleep in `poll` slices while suspended. Returns early on cancellation.
    pub fn wait_while_suspended(&self, poll: Duration) {
        while self.is_suspended() && !self.is_cancelled() {
            std::thread::sleep(poll);
        }
    }

    /// Identifier of the task this round belongs to
    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

impl fmt::Debug for TaskControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskControl")
            .field("task", &self.id)
            .field("finished", &self.is_finished())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct TaskInner {
    id: TaskId,
    label: Option<String>,
    conditions: Mutex<Vec<Condition>>,
    context: Option<Arc<dyn ExecutionContext>>,
    state: Mutex<TaskState>,
    round: Mutex<Option<Arc<Round>>>,
    block: Arc<TaskBlock>,
    suspension: Option<Arc<Suspension>>,
}

/// A schedulable unit of work.
///
/// `Task` is a cheap shared handle: clones refer to the same task, and
/// equality is by identifier.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a task with an optional dedicated context and its conditions
    pub fn new<F>(
        context: Option<Arc<dyn ExecutionContext>>,
        conditions: Vec<Condition>,
        block: F,
    ) -> Self
    where
        F: Fn(TaskControl) + Send + Sync + 'static,
    {
        let mut builder = Self::builder(block).conditions(conditions);
        builder.context = context;
        builder.build()
    }

    /// Start building a task around `block`
    pub fn builder<F>(block: F) -> TaskBuilder
    where
        F: Fn(TaskControl) + Send + Sync + 'static,
    {
        TaskBuilder {
            label: None,
            context: None,
            conditions: Vec::new(),
            pausable: false,
            block: Arc::new(block),
        }
    }

    /// Unique identifier
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Human-readable label, if one was given
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        *self.inner.state.lock()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.inner.state.lock() = state;
    }

    /// Snapshot of the declared conditions
    pub fn conditions(&self) -> Vec<Condition> {
        self.inner.conditions.lock().clone()
    }

    /// Replace the declared conditions. Only meaningful before submission.
    pub fn set_conditions(&self, conditions: Vec<Condition>) {
        *self.inner.conditions.lock() = conditions;
    }

    /// Append a condition. Only meaningful before submission.
    pub fn add_condition(&self, condition: Condition) {
        self.inner.conditions.lock().push(condition);
    }

    /// The task's dedicated execution context, if any
    pub fn context(&self) -> Option<&Arc<dyn ExecutionContext>> {
        self.inner.context.as_ref()
    }

    /// Lifecycle suspension flag for pausable tasks
    pub fn suspension(&self) -> Option<&Arc<Suspension>> {
        self.inner.suspension.as_ref()
    }

    /// Run one execution round.
    ///
    /// The block goes to the task's own context if it has one, else to
    /// `context`, else runs inline before this returns. `on_complete` fires
    /// once, when the block (or [`cancel`](Self::cancel)) finishes the round.
    pub fn execute(
        &self,
        context: Option<&Arc<dyn ExecutionContext>>,
        on_complete: Option<CompletionCallback>,
    ) {
        let task = self.clone();
        let round = Arc::new(Round::new(Box::new(move || {
            task.complete_round();
            if let Some(on_complete) = on_complete {
                on_complete();
            }
        })));

        {
            let mut current = self.inner.round.lock();
            if current.as_ref().is_some_and(|r| !r.is_finished()) {
                warn!(task = %self, "task resubmitted before its previous round finished");
            }
            *current = Some(Arc::clone(&round));
        }

        let control = TaskControl {
            id: self.id(),
            round,
            suspension: self.inner.suspension.clone(),
        };
        let block = Arc::clone(&self.inner.block);
        let job: Job = Box::new(move || block(control));

        match self.inner.context.as_ref().or(context) {
            Some(context) => {
                debug!(task = %self, context = context.label(), "posting task");
                context.post(job);
            }
            None => {
                debug!(task = %self, "running task inline");
                job();
            }
        }
    }

    /// Cancel the task. Idempotent.
    ///
    /// Marks the task cancelled, raises the round's cancellation flag and
    /// forces the round finished, firing its completion callback if it has
    /// not fired yet. A block already running is not interrupted.
    pub fn cancel(&self) {
        self.set_state(TaskState::Cancelled);
        let round = self.inner.round.lock().clone();
        if let Some(round) = round {
            round.cancelled.store(true, Ordering::Release);
            if round.finish() {
                debug!(task = %self, "task cancelled mid-round");
            }
        }
    }

    fn complete_round(&self) {
        let mut state = self.inner.state.lock();
        if *state == TaskState::Executing {
            *state = TaskState::Idle;
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "{}", label),
            None => write!(f, "{}", self.id()),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`Task`]
pub struct TaskBuilder {
    label: Option<String>,
    context: Option<Arc<dyn ExecutionContext>>,
    conditions: Vec<Condition>,
    pausable: bool,
    block: Arc<TaskBlock>,
}

impl TaskBuilder {
    /// Set a label used in logs and reports
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Run on a dedicated context instead of the coordinator's
    pub fn context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Add a condition
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add several conditions
    pub fn conditions(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    /// Let the host lifecycle suspend this task while backgrounded
    pub fn pausable(mut self) -> Self {
        self.pausable = true;
        self
    }

    /// Finish building
    pub fn build(self) -> Task {
        Task {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                label: self.label,
                conditions: Mutex::new(self.conditions),
                context: self.context,
                state: Mutex::new(TaskState::Idle),
                round: Mutex::new(None),
                block: self.block,
                suspension: self.pausable.then(|| Arc::new(Suspension::default())),
            }),
        }
    }
}
