//! Scenario runner
//!
//! Turns a [`Scenario`] into real tasks with simulated work, feeds them
//! through a [`Coordinator`] and reports what happened to each.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use turnstile_core::config::{Config, RequeueOrder};
use turnstile_core::scenario::{Scenario, TaskSpec};
use turnstile_core::Result;

use crate::condition::Condition;
use crate::context::{ExecutionContext, RuntimeContext, SerialContext};
use crate::coordinator::{Coordinator, Decision};
use crate::observer::{CoordinatorObserver, ObserverRegistry, TracingObserver};
use crate::task::{Task, TaskControl, TaskState};

/// What happened to one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    /// Decision returned when the task was first submitted
    pub decision: Decision,
    pub final_state: TaskState,
    /// The block started running
    pub started: bool,
    /// The block ran its work to the end
    pub completed: bool,
    /// The block noticed it was cancelled and stopped early
    pub saw_cancellation: bool,
}

/// A timestamped coordinator notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub at_ms: u64,
    pub task: String,
    pub event: &'static str,
}

/// Result of running a scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub requeue_order: RequeueOrder,
    pub tasks: Vec<TaskOutcome>,
    pub timeline: Vec<TimelineEntry>,
    pub elapsed_ms: u64,
    /// Some tasks were still executing or deferred when the runner gave up
    pub timed_out: bool,
}

impl ScenarioReport {
    /// Look up a task's outcome by name
    pub fn outcome(&self, name: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Timeline entries for one task
    pub fn events_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TimelineEntry> + 'a {
        self.timeline.iter().filter(move |e| e.task == name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Default)]
struct Probe {
    started: AtomicBool,
    completed: AtomicBool,
    saw_cancellation: AtomicBool,
    exited: AtomicBool,
}

impl Probe {
    fn settled(&self) -> bool {
        !self.started.load(Ordering::Acquire) || self.exited.load(Ordering::Acquire)
    }
}

struct TimelineRecorder {
    start: Instant,
    entries: Mutex<Vec<TimelineEntry>>,
}

impl TimelineRecorder {
    fn new(start: Instant) -> Self {
        Self {
            start,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, task: &Task, event: &'static str) {
        self.entries.lock().push(TimelineEntry {
            at_ms: self.start.elapsed().as_millis() as u64,
            task: task.to_string(),
            event,
        });
    }
}

impl CoordinatorObserver for TimelineRecorder {
    fn did_defer(&self, task: &Task) {
        self.record(task, "deferred");
    }

    fn did_cancel(&self, task: &Task) {
        self.record(task, "cancelled");
    }

    fn will_execute(&self, task: &Task) {
        self.record(task, "executing");
    }

    fn finished_executing(&self, task: &Task) {
        self.record(task, "finished");
    }
}

/// Runs scenarios against a fresh coordinator each time
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    config: Config,
}

impl ScenarioRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run a scenario to completion (or until the configured timeout).
    ///
    /// Tasks without a context run on a shared tokio blocking pool so they
    /// can overlap. Must not be called from inside an async runtime.
    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioReport> {
        scenario.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("turnstile-shared")
            .build()?;
        let shared: Arc<dyn ExecutionContext> =
            Arc::new(RuntimeContext::new("shared", runtime.handle().clone()));

        let mut contexts: HashMap<&str, Arc<dyn ExecutionContext>> = HashMap::new();
        for spec in &scenario.contexts {
            contexts.insert(spec.name.as_str(), Arc::new(SerialContext::new(&spec.name)?));
        }

        let start = Instant::now();
        let recorder = Arc::new(TimelineRecorder::new(start));
        let mut registry = ObserverRegistry::new();
        registry.register(TracingObserver);
        registry.register_shared(recorder.clone());
        let observer = Arc::new(registry);

        let coordinator = Coordinator::new(self.config.coordinator.clone(), Some(shared));
        coordinator.set_observer(&observer);

        let poll = Duration::from_millis(self.config.runner.poll_interval_ms);
        let mut tasks = Vec::with_capacity(scenario.tasks.len());
        let mut probes = Vec::with_capacity(scenario.tasks.len());
        for spec in &scenario.tasks {
            let probe = Arc::new(Probe::default());
            let mut builder = Task::builder(simulated_work(spec, poll, probe.clone()))
                .label(spec.name.as_str());
            if let Some(context) = spec.context.as_deref().and_then(|c| contexts.get(c)) {
                builder = builder.context(context.clone());
            }
            tasks.push(builder.build());
            probes.push(probe);
        }

        let by_name: HashMap<&str, &Task> = scenario
            .tasks
            .iter()
            .map(|s| s.name.as_str())
            .zip(tasks.iter())
            .collect();
        for (spec, task) in scenario.tasks.iter().zip(&tasks) {
            task.set_conditions(conditions_for(spec, &by_name));
        }

        info!(
            tasks = tasks.len(),
            contexts = contexts.len(),
            requeue_order = %self.config.coordinator.requeue_order,
            "running scenario"
        );

        let mut decisions = Vec::with_capacity(tasks.len());
        for (spec, task) in scenario.tasks.iter().zip(&tasks) {
            if spec.delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(spec.delay_ms));
            }
            let decision = coordinator.execute(task);
            debug!(task = %task, %decision, "submitted");
            decisions.push(decision);
        }

        let deadline = start + Duration::from_millis(self.config.runner.timeout_ms);
        let mut timed_out = false;
        while coordinator.executing_count() > 0
            || coordinator.pending_count() > 0
            || !probes.iter().all(|p| p.settled())
        {
            if Instant::now() >= deadline {
                warn!(
                    executing = coordinator.executing_count(),
                    pending = coordinator.pending_count(),
                    "scenario timed out"
                );
                timed_out = true;
                break;
            }
            std::thread::sleep(poll);
        }
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let outcomes = scenario
            .tasks
            .iter()
            .zip(&tasks)
            .zip(decisions)
            .zip(&probes)
            .map(|(((spec, task), decision), probe)| TaskOutcome {
                name: spec.name.clone(),
                decision,
                final_state: task.state(),
                started: probe.started.load(Ordering::Acquire),
                completed: probe.completed.load(Ordering::Acquire),
                saw_cancellation: probe.saw_cancellation.load(Ordering::Acquire),
            })
            .collect();
        let timeline = recorder.entries.lock().clone();

        coordinator.clear_observer();
        drop(coordinator);
        drop(contexts);
        runtime.shutdown_timeout(Duration::from_millis(self.config.runner.timeout_ms));

        Ok(ScenarioReport {
            requeue_order: self.config.coordinator.requeue_order,
            tasks: outcomes,
            timeline,
            elapsed_ms,
            timed_out,
        })
    }
}

/// Sleep for the task's duration in `poll` slices, stopping early on cancellation
fn simulated_work(
    spec: &TaskSpec,
    poll: Duration,
    probe: Arc<Probe>,
) -> impl Fn(TaskControl) + Send + Sync + 'static {
    let duration = Duration::from_millis(spec.duration_ms);
    move |control: TaskControl| {
        probe.started.store(true, Ordering::Release);
        let began = Instant::now();
        while !control.is_cancelled() {
            let remaining = duration.saturating_sub(began.elapsed());
            if remaining.is_zero() {
                break;
            }
            control.wait_while_suspended(poll);
            std::thread::sleep(remaining.min(poll));
        }

        if control.is_cancelled() {
            probe.saw_cancellation.store(true, Ordering::Release);
        } else {
            probe.completed.store(true, Ordering::Release);
        }
        control.finish();
        probe.exited.store(true, Ordering::Release);
    }
}

fn conditions_for(spec: &TaskSpec, by_name: &HashMap<&str, &Task>) -> Vec<Condition> {
    let resolve = |names: &[String]| -> Vec<&Task> {
        names
            .iter()
            .filter_map(|name| by_name.get(name.as_str()).copied())
            .collect()
    };

    let mut conditions = Vec::new();
    if !spec.cancel_if_executing.is_empty() {
        conditions.push(Condition::cancel_if_executing(resolve(&spec.cancel_if_executing)));
    }
    if !spec.defer_if_executing.is_empty() {
        conditions.push(Condition::defer_if_executing(resolve(&spec.defer_if_executing)));
    }
    if !spec.make_way_by_cancelling.is_empty() {
        conditions.push(Condition::make_way_by_cancelling(resolve(
            &spec.make_way_by_cancelling,
        )));
    }
    conditions
}
