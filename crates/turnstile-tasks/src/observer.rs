//! Coordinator observers
//!
//! An observer may override each admission sub-decision and is told about
//! every lifecycle transition the coordinator drives.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::task::{Task, TaskId};

/// Policy hooks and notifications for a [`Coordinator`](crate::Coordinator).
///
/// Every method has a default: decision hooks return the coordinator's
/// default unchanged, notifications do nothing.
///
/// The two `should_*` hooks run inside the coordinator's critical section
/// and must not call back into the coordinator. Notifications are delivered
/// after the section is released.
pub trait CoordinatorObserver: Send + Sync {
    /// Override whether `task` may run now
    fn should_execute(&self, _task: &Task, default: bool) -> bool {
        default
    }

    /// Override whether a task that may not run is deferred (true) or cancelled (false)
    fn should_defer(&self, _task: &Task, default: bool) -> bool {
        default
    }

    fn did_defer(&self, _task: &Task) {}

    fn did_cancel(&self, _task: &Task) {}

    fn will_execute(&self, _task: &Task) {}

    fn finished_executing(&self, _task: &Task) {}
}

/// Notification emitted by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    Deferred { id: TaskId },
    Cancelled { id: TaskId },
    WillExecute { id: TaskId },
    Finished { id: TaskId },
}

impl CoordinatorEvent {
    /// The task the event is about
    pub fn id(&self) -> TaskId {
        match self {
            Self::Deferred { id }
            | Self::Cancelled { id }
            | Self::WillExecute { id }
            | Self::Finished { id } => *id,
        }
    }

    /// Short name for display
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deferred { .. } => "deferred",
            Self::Cancelled { .. } => "cancelled",
            Self::WillExecute { .. } => "executing",
            Self::Finished { .. } => "finished",
        }
    }
}

/// Simple observer that logs to tracing
#[derive(Debug, Default)]
pub struct TracingObserver;

impl CoordinatorObserver for TracingObserver {
    fn did_defer(&self, task: &Task) {
        tracing::info!(task = %task, "deferred");
    }

    fn did_cancel(&self, task: &Task) {
        tracing::info!(task = %task, "cancelled");
    }

    fn will_execute(&self, task: &Task) {
        tracing::info!(task = %task, "executing");
    }

    fn finished_executing(&self, task: &Task) {
        tracing::debug!(task = %task, "finished");
    }
}

/// Observer that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<CoordinatorEvent>>,
}

impl CollectingObserver {
    /// Get all collected events
    pub fn events(&self) -> Vec<CoordinatorEvent> {
        self.events.lock().clone()
    }

    /// Forget everything collected so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, event: CoordinatorEvent) {
        self.events.lock().push(event);
    }
}

impl CoordinatorObserver for CollectingObserver {
    fn did_defer(&self, task: &Task) {
        self.push(CoordinatorEvent::Deferred { id: task.id() });
    }

    fn did_cancel(&self, task: &Task) {
        self.push(CoordinatorEvent::Cancelled { id: task.id() });
    }

    fn will_execute(&self, task: &Task) {
        self.push(CoordinatorEvent::WillExecute { id: task.id() });
    }

    fn finished_executing(&self, task: &Task) {
        self.push(CoordinatorEvent::Finished { id: task.id() });
    }
}

/// Fans out to several observers.
///
/// Decision hooks are folded through the observers in registration order,
/// each seeing the previous one's answer as its default.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn CoordinatorObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<O: CoordinatorObserver + 'static>(&mut self, observer: O) {
        self.observers.push(Arc::new(observer));
    }

    pub fn register_shared(&mut self, observer: Arc<dyn CoordinatorObserver>) {
        self.observers.push(observer);
    }

    pub fn all(&self) -> &[Arc<dyn CoordinatorObserver>] {
        &self.observers
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl CoordinatorObserver for ObserverRegistry {
    fn should_execute(&self, task: &Task, default: bool) -> bool {
        self.observers
            .iter()
            .fold(default, |decision, o| o.should_execute(task, decision))
    }

    fn should_defer(&self, task: &Task, default: bool) -> bool {
        self.observers
            .iter()
            .fold(default, |decision, o| o.should_defer(task, decision))
    }

    fn did_defer(&self, task: &Task) {
        for observer in &self.observers {
            observer.did_defer(task);
        }
    }

    fn did_cancel(&self, task: &Task) {
        for observer in &self.observers {
            observer.did_cancel(task);
        }
    }

    fn will_execute(&self, task: &Task) {
        for observer in &self.observers {
            observer.will_execute(task);
        }
    }

    fn finished_executing(&self, task: &Task) {
        for observer in &self.observers {
            observer.finished_executing(task);
        }
    }
}
