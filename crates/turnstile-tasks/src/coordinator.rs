//! Task coordinator: admission, dispatch and requeue
//!
//! Every submitted task gets one of three decisions:
//!
//! 1. It may run if none of its cancel/defer conditions name an executing
//!    task (the observer may override).
//! 2. Otherwise it is deferred if a defer condition names an executing task,
//!    else cancelled (the observer may override).
//! 3. An admitted task first cancels every executing task named by its
//!    make-way conditions.
//!
//! When a task finishes, every deferred task that may now run is pulled off
//! the pending list and submitted again. Those retries go through a
//! work-list drained in a loop, so long chains of completions do not nest.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use turnstile_core::config::{CoordinatorConfig, RequeueOrder};

use crate::condition;
use crate::context::ExecutionContext;
use crate::observer::CoordinatorObserver;
use crate::task::{Task, TaskId, TaskState};

/// Outcome of submitting a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Executing,
    Deferred,
    Cancelled,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executing => write!(f, "executing"),
            Self::Deferred => write!(f, "deferred"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Default)]
struct AdmissionState {
    executing: HashMap<TaskId, Task>,
    pending: Vec<Task>,
}

#[derive(Default)]
struct RetryQueue {
    queue: VecDeque<Task>,
    draining: bool,
}

struct Shared {
    config: CoordinatorConfig,
    context: Option<Arc<dyn ExecutionContext>>,
    state: Mutex<AdmissionState>,
    retries: Mutex<RetryQueue>,
    observer: RwLock<Option<Weak<dyn CoordinatorObserver>>>,
}

/// Admits, defers or cancels tasks according to their conditions.
///
/// `Coordinator` is a shared handle; clones drive the same instance.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

static SHARED: OnceLock<Coordinator> = OnceLock::new();

impl Coordinator {
    /// Create a coordinator. Tasks without their own context run on
    /// `context`, or inline on the submitting thread if it is `None`.
    pub fn new(config: CoordinatorConfig, context: Option<Arc<dyn ExecutionContext>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                context,
                state: Mutex::new(AdmissionState::default()),
                retries: Mutex::new(RetryQueue::default()),
                observer: RwLock::new(None),
            }),
        }
    }

    /// Process-wide default instance with default configuration and no
    /// shared context
    pub fn shared() -> &'static Coordinator {
        SHARED.get_or_init(Coordinator::default)
    }

    /// Configuration in effect
    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    /// Register the observer. Only a weak reference is kept; the caller
    /// owns the observer.
    pub fn set_observer<O: CoordinatorObserver + 'static>(&self, observer: &Arc<O>) {
        let observer: Arc<dyn CoordinatorObserver> = observer.clone();
        *self.shared.observer.write() = Some(Arc::downgrade(&observer));
    }

    pub fn clear_observer(&self) {
        *self.shared.observer.write() = None;
    }

    fn observer(&self) -> Option<Arc<dyn CoordinatorObserver>> {
        self.shared.observer.read().as_ref().and_then(Weak::upgrade)
    }

    /// Submit a task and return its admission decision.
    ///
    /// The decision is made under the coordinator's lock; the task's block
    /// is started only after the lock is released, so blocks may submit
    /// further tasks.
    pub fn execute(&self, task: &Task) -> Decision {
        let observer = self.observer();
        let observer = observer.as_deref();

        let (decision, make_way) = {
            let mut state = self.shared.state.lock();
            let decision = decide(&state, task, observer);

            let make_way = match decision {
                Decision::Cancelled => {
                    task.set_state(TaskState::Cancelled);
                    Vec::new()
                }
                Decision::Deferred => {
                    // A task cancelled while deferred may still sit on the list.
                    state.pending.retain(|t| t != task);
                    state.pending.push(task.clone());
                    task.set_state(TaskState::Deferred);
                    Vec::new()
                }
                Decision::Executing => {
                    let targets = condition::make_way_targets(&task.conditions(), |id| {
                        *id != task.id() && state.executing.contains_key(id)
                    });
                    // Victims leave the executing set now; they are cancelled
                    // once the lock is released.
                    let victims: Vec<Task> = targets
                        .iter()
                        .filter_map(|id| state.executing.remove(id))
                        .collect();
                    state.executing.insert(task.id(), task.clone());
                    task.set_state(TaskState::Executing);
                    victims
                }
            };
            (decision, make_way)
        };

        debug!(task = %task, %decision, "admission decision");

        match decision {
            Decision::Cancelled => {
                if let Some(observer) = observer {
                    observer.did_cancel(task);
                }
            }
            Decision::Deferred => {
                if let Some(observer) = observer {
                    observer.did_defer(task);
                }
            }
            Decision::Executing => {
                for victim in &make_way {
                    info!(task = %victim, by = %task, "cancelling to make way");
                    victim.cancel();
                    if let Some(observer) = observer {
                        observer.did_cancel(victim);
                    }
                }
                if let Some(observer) = observer {
                    observer.will_execute(task);
                }
                self.dispatch(task);
            }
        }

        decision
    }

    /// Submit tasks one after another. Each decision sees the effects of
    /// the ones before it.
    pub fn execute_all<'a>(&self, tasks: impl IntoIterator<Item = &'a Task>) -> Vec<Decision> {
        tasks.into_iter().map(|task| self.execute(task)).collect()
    }

    fn dispatch(&self, task: &Task) {
        let coordinator = Arc::downgrade(&self.shared);
        let finished = task.clone();
        task.execute(
            self.shared.context.as_ref(),
            Some(Box::new(move || {
                if let Some(shared) = coordinator.upgrade() {
                    Coordinator { shared }.finished(&finished);
                }
            })),
        );
    }

    /// Called once per completed round of an admitted task
    fn finished(&self, task: &Task) {
        let observer = self.observer();
        let observer = observer.as_deref();

        let ready = {
            let mut state = self.shared.state.lock();
            if state.executing.remove(&task.id()).is_none() {
                debug!(task = %task, "finished task was not tracked as executing");
            }
            self.take_admissible(&mut state, observer)
        };

        debug!(task = %task, retries = ready.len(), "task finished");
        if let Some(observer) = observer {
            observer.finished_executing(task);
        }

        self.retry(ready);
    }

    /// Remove and return every pending task that may now run, in requeue order.
    /// Pending tasks cancelled while deferred are dropped.
    fn take_admissible(
        &self,
        state: &mut AdmissionState,
        observer: Option<&dyn CoordinatorObserver>,
    ) -> Vec<Task> {
        let AdmissionState { executing, pending } = state;
        let executing: &HashMap<TaskId, Task> = executing;
        let mut ready = Vec::new();

        pending.retain(|candidate| {
            if candidate.state() == TaskState::Cancelled {
                debug!(task = %candidate, "dropping cancelled deferred task");
                return false;
            }
            if can_execute(executing, candidate, observer) {
                ready.push(candidate.clone());
                false
            } else {
                true
            }
        });

        if self.shared.config.requeue_order == RequeueOrder::Lifo {
            ready.reverse();
        }
        ready
    }

    /// Queue retries and drain the queue unless another call is already
    /// draining it.
    fn retry(&self, ready: Vec<Task>) {
        {
            let mut retries = self.shared.retries.lock();
            retries.queue.extend(ready);
            if retries.draining || retries.queue.is_empty() {
                return;
            }
            retries.draining = true;
        }

        let _guard = DrainGuard(&self.shared.retries);
        loop {
            let next = {
                let mut retries = self.shared.retries.lock();
                match retries.queue.pop_front() {
                    Some(task) => task,
                    None => {
                        retries.draining = false;
                        return;
                    }
                }
            };
            debug!(task = %next, "retrying deferred task");
            self.execute(&next);
        }
    }

    /// Number of tasks currently executing
    pub fn executing_count(&self) -> usize {
        self.shared.state.lock().executing.len()
    }

    /// Number of tasks waiting on the pending list
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_executing(&self, id: TaskId) -> bool {
        self.shared.state.lock().executing.contains_key(&id)
    }

    /// Pending task ids in deferral order
    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.shared.state.lock().pending.iter().map(Task::id).collect()
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default(), None)
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Coordinator")
            .field("requeue_order", &self.shared.config.requeue_order)
            .field("executing", &state.executing.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// Releases the drain flag if a retried block panics inline
struct DrainGuard<'a>(&'a Mutex<RetryQueue>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().draining = false;
        }
    }
}

fn can_execute(
    executing: &HashMap<TaskId, Task>,
    task: &Task,
    observer: Option<&dyn CoordinatorObserver>,
) -> bool {
    let default = !condition::blocks_execution(&task.conditions(), |id| {
        executing.contains_key(id)
    });
    match observer {
        Some(observer) => observer.should_execute(task, default),
        None => default,
    }
}

fn should_defer(
    executing: &HashMap<TaskId, Task>,
    task: &Task,
    observer: Option<&dyn CoordinatorObserver>,
) -> bool {
    let default = condition::requests_deferral(&task.conditions(), |id| {
        executing.contains_key(id)
    });
    match observer {
        Some(observer) => observer.should_defer(task, default),
        None => default,
    }
}

fn decide(
    state: &AdmissionState,
    task: &Task,
    observer: Option<&dyn CoordinatorObserver>,
) -> Decision {
    if can_execute(&state.executing, task, observer) {
        Decision::Executing
    } else if should_defer(&state.executing, task, observer) {
        Decision::Deferred
    } else {
        Decision::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::observer::{CollectingObserver, CoordinatorEvent};
    use crate::task::TaskControl;

    /// Task whose block parks its control so the test decides when it finishes
    fn held(label: &str) -> (Task, Arc<Mutex<Option<TaskControl>>>) {
        let slot: Arc<Mutex<Option<TaskControl>>> = Arc::new(Mutex::new(None));
        let parked = slot.clone();
        let task = Task::builder(move |control| *parked.lock() = Some(control))
            .label(label)
            .build();
        (task, slot)
    }

    fn release(slot: &Arc<Mutex<Option<TaskControl>>>) {
        let control = slot.lock().take().expect("task never started");
        control.finish();
    }

    #[test]
    fn test_unconditioned_task_executes() {
        let coordinator = Coordinator::default();
        let (task, slot) = held("a");

        assert_eq!(coordinator.execute(&task), Decision::Executing);
        assert_eq!(task.state(), TaskState::Executing);
        assert!(coordinator.is_executing(task.id()));

        release(&slot);
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(coordinator.executing_count(), 0);
    }

    #[test]
    fn test_observer_can_force_execution() {
        struct AlwaysRun;
        impl CoordinatorObserver for AlwaysRun {
            fn should_execute(&self, _task: &Task, _default: bool) -> bool {
                true
            }
        }

        let coordinator = Coordinator::default();
        let observer = Arc::new(AlwaysRun);
        coordinator.set_observer(&observer);

        let (a, _slot_a) = held("a");
        let (b, _slot_b) = held("b");
        b.add_condition(Condition::cancel_if_executing([&a]));

        coordinator.execute(&a);
        assert_eq!(coordinator.execute(&b), Decision::Executing);
    }

    #[test]
    fn test_observer_can_defer_instead_of_cancel() {
        struct DeferEverything;
        impl CoordinatorObserver for DeferEverything {
            fn should_defer(&self, _task: &Task, _default: bool) -> bool {
                true
            }
        }

        let coordinator = Coordinator::default();
        let observer = Arc::new(DeferEverything);
        coordinator.set_observer(&observer);

        let (a, slot_a) = held("a");
        let (b, slot_b) = held("b");
        b.add_condition(Condition::cancel_if_executing([&a]));

        coordinator.execute(&a);
        assert_eq!(coordinator.execute(&b), Decision::Deferred);

        release(&slot_a);
        assert_eq!(b.state(), TaskState::Executing);
        release(&slot_b);
    }

    #[test]
    fn test_observer_is_not_owned() {
        let coordinator = Coordinator::default();
        {
            let observer = Arc::new(CollectingObserver::default());
            coordinator.set_observer(&observer);
        }
        let (task, slot) = held("a");
        assert_eq!(coordinator.execute(&task), Decision::Executing);
        release(&slot);
    }

    #[test]
    fn test_cancelled_deferred_task_is_dropped() {
        let coordinator = Coordinator::default();
        let (a, slot_a) = held("a");
        let (b, slot_b) = held("b");
        b.add_condition(Condition::defer_if_executing([&a]));

        coordinator.execute(&a);
        assert_eq!(coordinator.execute(&b), Decision::Deferred);
        b.cancel();

        release(&slot_a);
        assert_eq!(coordinator.pending_count(), 0);
        assert_eq!(b.state(), TaskState::Cancelled);
        assert!(slot_b.lock().is_none());
    }

    #[test]
    fn test_make_way_ignores_self_reference() {
        let coordinator = Coordinator::default();
        let (a, slot) = held("a");
        a.add_condition(Condition::make_way_by_cancelling([&a]));

        assert_eq!(coordinator.execute(&a), Decision::Executing);
        assert_eq!(a.state(), TaskState::Executing);
        release(&slot);
    }

    #[test]
    fn test_retries_are_drained_iteratively() {
        let coordinator = Coordinator::default();
        let observer = Arc::new(CollectingObserver::default());
        coordinator.set_observer(&observer);

        let (gate, slot) = held("gate");
        coordinator.execute(&gate);

        let followers: Vec<Task> = (0..200)
            .map(|i| {
                Task::builder(|c| c.finish())
                    .label(format!("follower-{}", i))
                    .condition(Condition::defer_if_executing([&gate]))
                    .build()
            })
            .collect();
        for follower in &followers {
            assert_eq!(coordinator.execute(follower), Decision::Deferred);
        }

        release(&slot);

        assert_eq!(coordinator.pending_count(), 0);
        assert_eq!(coordinator.executing_count(), 0);
        assert!(followers.iter().all(|t| t.state() == TaskState::Idle));
        let finished = observer
            .events()
            .iter()
            .filter(|e| matches!(e, CoordinatorEvent::Finished { .. }))
            .count();
        assert_eq!(finished, 201);
    }

    #[test]
    fn test_shared_instance_is_stable() {
        let first = Coordinator::shared() as *const Coordinator;
        let second = Coordinator::shared() as *const Coordinator;
        assert_eq!(first, second);
    }

    #[test]
    fn test_pending_ids_in_deferral_order() {
        let coordinator = Coordinator::default();
        let (a, slot) = held("a");
        coordinator.execute(&a);

        let b = Task::builder(|c| c.finish())
            .condition(Condition::defer_if_executing([&a]))
            .build();
        let c = Task::builder(|c| c.finish())
            .condition(Condition::defer_if_executing([&a]))
            .build();
        coordinator.execute_all([&b, &c]);

        assert_eq!(coordinator.pending_ids(), vec![b.id(), c.id()]);
        release(&slot);
        assert!(coordinator.pending_ids().is_empty());
    }
}
