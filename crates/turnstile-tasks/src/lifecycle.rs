//! Host lifecycle integration
//!
//! The coordinator knows nothing about the host application's lifecycle.
//! Hosts that background and foreground (mobile apps, desktop sessions)
//! drive a [`LifecycleMonitor`], which forwards transitions to registered
//! adapters. Pausable tasks expose a [`Suspension`] adapter that their
//! blocks can observe through [`TaskControl`](crate::TaskControl).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::task::Task;

/// Receives host lifecycle transitions
pub trait LifecycleAdapter: Send + Sync {
    fn on_enter_background(&self);
    fn on_enter_foreground(&self);
}

/// Suspension flag for a pausable task
#[derive(Debug, Default)]
pub struct Suspension {
    suspended: AtomicBool,
}

impl Suspension {
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }
}

impl LifecycleAdapter for Suspension {
    fn on_enter_background(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    fn on_enter_foreground(&self) {
        self.suspended.store(false, Ordering::Release);
    }
}

/// Broadcasts lifecycle transitions to weakly held adapters
#[derive(Default)]
pub struct LifecycleMonitor {
    adapters: Mutex<Vec<Weak<dyn LifecycleAdapter>>>,
    in_background: AtomicBool,
}

impl LifecycleMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. If the host is already backgrounded the adapter
    /// is told so immediately.
    pub fn register(&self, adapter: &Arc<dyn LifecycleAdapter>) {
        if self.is_in_background() {
            adapter.on_enter_background();
        }
        self.adapters.lock().push(Arc::downgrade(adapter));
    }

    /// Register a task's suspension flag. Returns false for tasks not built
    /// as pausable.
    pub fn register_task(&self, task: &Task) -> bool {
        match task.suspension() {
            Some(suspension) => {
                let adapter: Arc<dyn LifecycleAdapter> = suspension.clone();
                self.register(&adapter);
                true
            }
            None => false,
        }
    }

    pub fn is_in_background(&self) -> bool {
        self.in_background.load(Ordering::Acquire)
    }

    /// Number of adapters still alive
    pub fn len(&self) -> usize {
        self.adapters
            .lock()
            .iter()
            .filter(|a| a.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enter_background(&self) {
        if self.in_background.swap(true, Ordering::AcqRel) {
            return;
        }
        let adapters = self.live_adapters();
        info!(adapters = adapters.len(), "host entered background");
        for adapter in adapters {
            adapter.on_enter_background();
        }
    }

    pub fn enter_foreground(&self) {
        if !self.in_background.swap(false, Ordering::AcqRel) {
            return;
        }
        let adapters = self.live_adapters();
        info!(adapters = adapters.len(), "host entered foreground");
        for adapter in adapters {
            adapter.on_enter_foreground();
        }
    }

    /// Upgrade live adapters and prune dead ones
    fn live_adapters(&self) -> Vec<Arc<dyn LifecycleAdapter>> {
        let mut adapters = self.adapters.lock();
        let before = adapters.len();
        adapters.retain(|a| a.strong_count() > 0);
        if adapters.len() != before {
            debug!(pruned = before - adapters.len(), "dropped dead lifecycle adapters");
        }
        adapters.iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskControl;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        background: AtomicUsize,
        foreground: AtomicUsize,
    }

    impl LifecycleAdapter for Counting {
        fn on_enter_background(&self) {
            self.background.fetch_add(1, Ordering::SeqCst);
        }

        fn on_enter_foreground(&self) {
            self.foreground.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_transitions_are_deduplicated() {
        let monitor = LifecycleMonitor::new();
        let counting = Arc::new(Counting::default());
        let adapter: Arc<dyn LifecycleAdapter> = counting.clone();
        monitor.register(&adapter);

        monitor.enter_background();
        monitor.enter_background();
        monitor.enter_foreground();
        monitor.enter_foreground();

        assert_eq!(counting.background.load(Ordering::SeqCst), 1);
        assert_eq!(counting.foreground.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_registration_sees_background() {
        let monitor = LifecycleMonitor::new();
        monitor.enter_background();

        let counting = Arc::new(Counting::default());
        let adapter: Arc<dyn LifecycleAdapter> = counting.clone();
        monitor.register(&adapter);

        assert_eq!(counting.background.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_adapters_are_pruned() {
        let monitor = LifecycleMonitor::new();
        {
            let adapter: Arc<dyn LifecycleAdapter> = Arc::new(Counting::default());
            monitor.register(&adapter);
            assert_eq!(monitor.len(), 1);
        }
        assert!(monitor.is_empty());
        monitor.enter_background();
    }

    #[test]
    fn test_pausable_task_suspends() {
        let held: Arc<Mutex<Option<TaskControl>>> = Arc::new(Mutex::new(None));
        let slot = held.clone();
        let task = Task::builder(move |control| *slot.lock() = Some(control))
            .pausable()
            .build();
        let plain = Task::builder(|c| c.finish()).build();

        let monitor = LifecycleMonitor::new();
        assert!(monitor.register_task(&task));
        assert!(!monitor.register_task(&plain));

        task.execute(None, None);
        let control = held.lock().clone().unwrap();
        assert!(!control.is_suspended());

        monitor.enter_background();
        assert!(control.is_suspended());

        monitor.enter_foreground();
        assert!(!control.is_suspended());
    }
}
