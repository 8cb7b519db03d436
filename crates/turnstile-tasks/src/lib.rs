//! Turnstile Tasks - task admission and coordination engine
//!
//! This crate decides, for every submitted task, whether it runs now, waits
//! for a conflicting task to finish, or is cancelled outright. Admitted
//! tasks may cancel running tasks to make way for themselves, and deferred
//! tasks are retried automatically as running tasks complete.

pub mod condition;
pub mod context;
pub mod coordinator;
pub mod lifecycle;
pub mod observer;
pub mod scenario;
pub mod task;

pub use condition::Condition;
pub use context::{ExecutionContext, Job, RuntimeContext, SerialContext};
pub use coordinator::{Coordinator, Decision};
pub use lifecycle::{LifecycleAdapter, LifecycleMonitor, Suspension};
pub use observer::{
    CollectingObserver, CoordinatorEvent, CoordinatorObserver, ObserverRegistry, TracingObserver,
};
pub use scenario::{ScenarioReport, ScenarioRunner, TaskOutcome, TimelineEntry};
pub use task::{Task, TaskBuilder, TaskControl, TaskId, TaskState};
