use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use turnstile_core::config::{CoordinatorConfig, RequeueOrder};
use turnstile_tasks::{
    CollectingObserver, Condition, Coordinator, CoordinatorEvent, CoordinatorObserver, Decision,
    ExecutionContext, RuntimeContext, SerialContext, Task, TaskControl, TaskId, TaskState,
};

type Slot = Arc<Mutex<Option<TaskControl>>>;

/// A task whose block parks its control; the test finishes it explicitly.
fn held(label: &str) -> (Task, Slot, Arc<AtomicUsize>) {
    let slot: Slot = Arc::new(Mutex::new(None));
    let runs = Arc::new(AtomicUsize::new(0));
    let parked = slot.clone();
    let counter = runs.clone();
    let task = Task::builder(move |control| {
        counter.fetch_add(1, Ordering::SeqCst);
        *parked.lock() = Some(control);
    })
    .label(label)
    .build();
    (task, slot, runs)
}

fn release(slot: &Slot) {
    let control = slot.lock().take().expect("task was never started");
    control.finish();
}

fn observed(coordinator: &Coordinator) -> Arc<CollectingObserver> {
    let observer = Arc::new(CollectingObserver::default());
    coordinator.set_observer(&observer);
    observer
}

#[test]
fn cancel_if_executing_cancels_without_running() {
    let coordinator = Coordinator::default();
    let (a, _slot_a, _) = held("a");
    let (b, _slot_b, runs_b) = held("b");
    b.add_condition(Condition::cancel_if_executing([&a]));

    assert_eq!(coordinator.execute(&a), Decision::Executing);
    assert_eq!(coordinator.execute(&b), Decision::Cancelled);
    assert_eq!(runs_b.load(Ordering::SeqCst), 0);
    assert_eq!(b.state(), TaskState::Cancelled);
}

#[test]
fn cancel_if_executing_allows_when_target_idle() {
    let coordinator = Coordinator::default();
    let (a, _slot_a, _) = held("a");
    let (b, slot_b, _) = held("b");
    b.add_condition(Condition::cancel_if_executing([&a]));

    assert_eq!(coordinator.execute(&b), Decision::Executing);
    release(&slot_b);
}

#[test]
fn deferred_task_runs_after_blocker_finishes() {
    let coordinator = Coordinator::default();
    let (a, slot_a, _) = held("a");
    let (b, slot_b, runs_b) = held("b");
    b.add_condition(Condition::defer_if_executing([&a]));

    assert_eq!(coordinator.execute(&a), Decision::Executing);
    assert_eq!(coordinator.execute(&b), Decision::Deferred);
    assert_eq!(b.state(), TaskState::Deferred);
    assert_eq!(runs_b.load(Ordering::SeqCst), 0);

    release(&slot_a);

    assert_eq!(b.state(), TaskState::Executing);
    assert_eq!(runs_b.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.pending_count(), 0);

    release(&slot_b);
    assert_eq!(b.state(), TaskState::Idle);
}

#[test]
fn deferred_task_waits_for_every_blocker() {
    let coordinator = Coordinator::default();
    let (a, slot_a, _) = held("a");
    let (b, slot_b, _) = held("b");
    let (c, slot_c, _) = held("c");
    c.add_condition(Condition::defer_if_executing([&a, &b]));

    coordinator.execute_all([&a, &b]);
    assert_eq!(coordinator.execute(&c), Decision::Deferred);

    release(&slot_a);
    assert_eq!(c.state(), TaskState::Deferred);

    release(&slot_b);
    assert_eq!(c.state(), TaskState::Executing);
    release(&slot_c);
}

#[test]
fn make_way_cancels_running_task_before_executing() {
    let coordinator = Coordinator::default();
    let observer = observed(&coordinator);

    let (a, slot_a, _) = held("a");
    let (c, slot_c, _) = held("c");
    c.add_condition(Condition::make_way_by_cancelling([&a]));

    assert_eq!(coordinator.execute(&a), Decision::Executing);
    let a_control = slot_a.lock().clone().unwrap();

    assert_eq!(coordinator.execute(&c), Decision::Executing);
    assert_eq!(a.state(), TaskState::Cancelled);
    assert!(a_control.is_cancelled());
    assert!(!coordinator.is_executing(a.id()));
    assert!(coordinator.is_executing(c.id()));

    let events = observer.events();
    let cancelled = events
        .iter()
        .position(|e| *e == CoordinatorEvent::Cancelled { id: a.id() })
        .unwrap();
    let executing = events
        .iter()
        .position(|e| *e == CoordinatorEvent::WillExecute { id: c.id() })
        .unwrap();
    assert!(cancelled < executing);

    // The cancelled block finishing late is harmless.
    a_control.finish();
    assert_eq!(a.state(), TaskState::Cancelled);
    release(&slot_c);
}

#[test]
fn serial_context_runs_blocks_in_order_without_overlap() {
    let coordinator = Coordinator::default();
    let context = Arc::new(SerialContext::new("serial-test").unwrap());
    let log: Arc<Mutex<Vec<(&'static str, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    let make = |name: &'static str| {
        let log = log.clone();
        Task::builder(move |control: TaskControl| {
            log.lock().push((name, Instant::now()));
            std::thread::sleep(Duration::from_millis(25));
            log.lock().push((name, Instant::now()));
            control.finish();
        })
        .label(name)
        .context(context.clone())
        .build()
    };
    let first = make("first");
    let second = make("second");

    assert_eq!(
        coordinator.execute_all([&first, &second]),
        vec![Decision::Executing, Decision::Executing]
    );

    context.wait_idle();

    let log = log.lock();
    let names: Vec<_> = log.iter().map(|(n, _)| *n).collect();
    assert_eq!(names, vec!["first", "first", "second", "second"]);
    assert!(log[1].1 <= log[2].1);
    assert_eq!(first.state(), TaskState::Idle);
    assert_eq!(second.state(), TaskState::Idle);
}

#[test]
fn cancel_twice_is_safe() {
    let coordinator = Coordinator::default();
    let (a, _slot, _) = held("a");
    coordinator.execute(&a);

    a.cancel();
    assert_eq!(a.state(), TaskState::Cancelled);
    a.cancel();
    assert_eq!(a.state(), TaskState::Cancelled);
    assert_eq!(coordinator.executing_count(), 0);
}

#[test]
fn batch_sees_earlier_admissions() {
    let coordinator = Coordinator::default();
    let (a, _slot_a, _) = held("a");
    let (b, _slot_b, _) = held("b");
    b.add_condition(Condition::defer_if_executing([&a]));

    assert_eq!(
        coordinator.execute_all([&a, &b]),
        vec![Decision::Executing, Decision::Deferred]
    );
}

fn requeue_order(order: RequeueOrder) -> Vec<String> {
    let coordinator = Coordinator::new(CoordinatorConfig::default().with_requeue_order(order), None);
    let observer = observed(&coordinator);

    let (a, slot_a, _) = held("a");
    coordinator.execute(&a);

    let waiting: Vec<(Task, Slot, Arc<AtomicUsize>)> =
        (1..=4).map(|i| held(&format!("t{}", i))).collect();
    for (task, _, _) in &waiting {
        task.add_condition(Condition::defer_if_executing([&a]));
        assert_eq!(coordinator.execute(task), Decision::Deferred);
    }

    observer.clear();
    release(&slot_a);

    let label_of = |id: TaskId| {
        waiting
            .iter()
            .find(|(t, _, _)| t.id() == id)
            .map(|(t, _, _)| t.to_string())
            .unwrap()
    };
    observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            CoordinatorEvent::WillExecute { id } => Some(label_of(id)),
            _ => None,
        })
        .collect()
}

#[test]
fn lifo_requeue_retries_most_recent_deferral_first() {
    assert_eq!(requeue_order(RequeueOrder::Lifo), vec!["t4", "t3", "t2", "t1"]);
}

#[test]
fn fifo_requeue_retries_oldest_deferral_first() {
    assert_eq!(requeue_order(RequeueOrder::Fifo), vec!["t1", "t2", "t3", "t4"]);
}

#[test]
fn retried_task_can_be_deferred_again() {
    let coordinator = Coordinator::default();
    let (a, slot_a, _) = held("a");
    let (b, slot_b, _) = held("b");
    let (c, slot_c, _) = held("c");
    // b defers behind a; c runs once a is done and keeps b waiting.
    b.add_condition(Condition::defer_if_executing([&a, &c]));
    c.add_condition(Condition::defer_if_executing([&a]));

    coordinator.execute(&a);
    assert_eq!(coordinator.execute(&c), Decision::Deferred);
    assert_eq!(coordinator.execute(&b), Decision::Deferred);

    // FIFO: c is retried first and starts executing, so b's retry in the
    // same pass defers it again.
    release(&slot_a);
    assert_eq!(c.state(), TaskState::Executing);
    assert_eq!(b.state(), TaskState::Deferred);
    assert_eq!(coordinator.pending_ids(), vec![b.id()]);

    release(&slot_c);
    assert_eq!(b.state(), TaskState::Executing);
    release(&slot_b);
}

#[test]
fn block_may_submit_tasks_recursively() {
    let coordinator = Coordinator::default();
    let inner = Task::builder(|c| c.finish()).label("inner").build();

    let nested = coordinator.clone();
    let child = inner.clone();
    let decision = Arc::new(Mutex::new(None));
    let seen = decision.clone();
    let outer = Task::builder(move |control: TaskControl| {
        *seen.lock() = Some(nested.execute(&child));
        control.finish();
    })
    .label("outer")
    .build();

    assert_eq!(coordinator.execute(&outer), Decision::Executing);
    assert_eq!(*decision.lock(), Some(Decision::Executing));
    assert_eq!(inner.state(), TaskState::Idle);
    assert_eq!(coordinator.executing_count(), 0);
}

#[test]
fn task_can_be_resubmitted_after_cancellation() {
    let coordinator = Coordinator::default();
    let (a, slot_a, _) = held("a");
    let (b, slot_b, runs_b) = held("b");
    b.add_condition(Condition::cancel_if_executing([&a]));

    coordinator.execute(&a);
    assert_eq!(coordinator.execute(&b), Decision::Cancelled);

    release(&slot_a);
    assert_eq!(coordinator.execute(&b), Decision::Executing);
    assert_eq!(b.state(), TaskState::Executing);
    assert_eq!(runs_b.load(Ordering::SeqCst), 1);
    release(&slot_b);
}

#[test]
fn observer_notified_of_full_lifecycle() {
    let coordinator = Coordinator::default();
    let observer = observed(&coordinator);

    let (a, slot_a, _) = held("a");
    let (b, slot_b, _) = held("b");
    b.add_condition(Condition::defer_if_executing([&a]));

    coordinator.execute_all([&a, &b]);
    release(&slot_a);
    release(&slot_b);

    assert_eq!(
        observer.events(),
        vec![
            CoordinatorEvent::WillExecute { id: a.id() },
            CoordinatorEvent::Deferred { id: b.id() },
            CoordinatorEvent::Finished { id: a.id() },
            CoordinatorEvent::WillExecute { id: b.id() },
            CoordinatorEvent::Finished { id: b.id() },
        ]
    );
}

#[test]
fn cancel_if_executing_notifies_observer() {
    let coordinator = Coordinator::default();
    let observer = observed(&coordinator);
    let (a, _slot_a, _) = held("a");
    let (b, _slot_b, _) = held("b");
    b.add_condition(Condition::cancel_if_executing([&a]));

    coordinator.execute(&a);
    observer.clear();
    assert_eq!(coordinator.execute(&b), Decision::Cancelled);

    assert_eq!(observer.events(), vec![CoordinatorEvent::Cancelled { id: b.id() }]);
}

#[test]
fn resubmitting_task_cancelled_while_deferred_runs_once() {
    let coordinator = Coordinator::default();
    let observer = observed(&coordinator);
    let (a, slot_a, _) = held("a");
    let (b, slot_b, runs_b) = held("b");
    b.add_condition(Condition::defer_if_executing([&a]));

    coordinator.execute(&a);
    assert_eq!(coordinator.execute(&b), Decision::Deferred);
    b.cancel();
    assert_eq!(coordinator.execute(&b), Decision::Deferred);
    assert_eq!(coordinator.pending_ids(), vec![b.id()]);

    release(&slot_a);
    assert_eq!(runs_b.load(Ordering::SeqCst), 1);
    assert_eq!(b.state(), TaskState::Executing);
    assert_eq!(coordinator.pending_count(), 0);

    release(&slot_b);
    let finished_b = observer
        .events()
        .into_iter()
        .filter(|e| *e == CoordinatorEvent::Finished { id: b.id() })
        .count();
    assert_eq!(finished_b, 1);
}

/// Records whether `watched` was still executing when `trigger` finished
struct ExecutingWhenFinished {
    coordinator: Coordinator,
    trigger: TaskId,
    watched: TaskId,
    seen: Mutex<Option<bool>>,
}

impl CoordinatorObserver for ExecutingWhenFinished {
    fn finished_executing(&self, task: &Task) {
        if task.id() == self.trigger {
            *self.seen.lock() = Some(self.coordinator.is_executing(self.watched));
        }
    }
}

#[test]
fn make_way_victims_leave_executing_set_before_cancellation() {
    let coordinator = Coordinator::default();
    let (a1, _slot_a1, _) = held("a1");
    let (a2, _slot_a2, _) = held("a2");
    let (c, slot_c, _) = held("c");
    c.add_condition(Condition::make_way_by_cancelling([&a1, &a2]));

    let observer = Arc::new(ExecutingWhenFinished {
        coordinator: coordinator.clone(),
        trigger: a1.id(),
        watched: a2.id(),
        seen: Mutex::new(None),
    });
    coordinator.set_observer(&observer);

    coordinator.execute_all([&a1, &a2]);
    assert_eq!(coordinator.execute(&c), Decision::Executing);

    // a1 is cancelled first; by then a2 must already be out of the executing set.
    assert_eq!(*observer.seen.lock(), Some(false));
    assert_eq!(a2.state(), TaskState::Cancelled);
    assert_eq!(coordinator.executing_count(), 1);
    release(&slot_c);
}

#[test]
fn concurrent_submissions_are_all_deferred_then_run_once() {
    let coordinator = Coordinator::default();
    let (gate, slot, _) = held("gate");
    coordinator.execute(&gate);

    let runs = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|thread| {
            let coordinator = coordinator.clone();
            let gate = gate.clone();
            let runs = runs.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                (0..25)
                    .map(|i| {
                        let runs = runs.clone();
                        let task = Task::builder(move |control: TaskControl| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            control.finish();
                        })
                        .label(format!("w{}-{}", thread, i))
                        .condition(Condition::defer_if_executing([&gate]))
                        .build();
                        coordinator.execute(&task)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        let decisions = handle.join().unwrap();
        assert!(decisions.iter().all(|d| *d == Decision::Deferred));
    }
    assert_eq!(coordinator.pending_count(), 100);

    release(&slot);
    assert_eq!(runs.load(Ordering::SeqCst), 100);
    assert_eq!(coordinator.pending_count(), 0);
    assert_eq!(coordinator.executing_count(), 0);
}

#[test]
fn mutually_exclusive_tasks_never_overlap_across_threads() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let pool: Arc<dyn ExecutionContext> =
        Arc::new(RuntimeContext::new("pool", runtime.handle().clone()));
    let coordinator = Coordinator::new(CoordinatorConfig::default(), Some(pool));

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<Task> = (0..20)
        .map(|i| {
            let active = active.clone();
            let peak = peak.clone();
            let runs = runs.clone();
            Task::builder(move |control: TaskControl| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
                runs.fetch_add(1, Ordering::SeqCst);
                active.fetch_sub(1, Ordering::SeqCst);
                control.finish();
            })
            .label(format!("x{}", i))
            .build()
        })
        .collect();
    for task in &tasks {
        let others = tasks.iter().filter(|t| *t != task);
        task.set_conditions(vec![Condition::defer_if_executing(others)]);
    }

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = tasks
        .chunks(5)
        .map(|chunk| {
            let chunk = chunk.to_vec();
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                coordinator.execute_all(&chunk);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while runs.load(Ordering::SeqCst) < 20 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    while coordinator.executing_count() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(runs.load(Ordering::SeqCst), 20);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.pending_count(), 0);
    assert_eq!(coordinator.executing_count(), 0);
}
