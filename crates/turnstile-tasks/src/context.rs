//! Execution contexts that task blocks are posted to

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use turnstile_core::Result;

/// A unit of work posted to a context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere a task's block can run
pub trait ExecutionContext: Send + Sync {
    /// Queue a job for execution
    fn post(&self, job: Job);

    /// Name used in logs
    fn label(&self) -> &str;
}

/// Serial context backed by a dedicated worker thread.
///
/// Jobs run one at a time in the order they were posted. The worker exits
/// once every handle is dropped and the queue is drained.
pub struct SerialContext {
    label: String,
    sender: mpsc::UnboundedSender<Job>,
}

impl SerialContext {
    /// Spawn the worker thread, named `turnstile-<label>`
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let worker_label = label.clone();
        std::thread::Builder::new()
            .name(format!("turnstile-{}", label))
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(context = %worker_label, "job panicked; its task will never finish");
                    }
                }
                debug!(context = %worker_label, "serial context shut down");
            })?;

        Ok(Self { label, sender })
    }

    /// Block until every job posted before this call has run.
    ///
    /// Must not be called from the context's own worker or from inside an
    /// async runtime.
    pub fn wait_idle(&self) {
        let (tx, rx) = oneshot::channel();
        self.post(Box::new(move || {
            let _ = tx.send(());
        }));
        let _ = rx.blocking_recv();
    }
}

impl ExecutionContext for SerialContext {
    fn post(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!(context = %self.label, "serial context worker is gone; job dropped");
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for SerialContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialContext").field("label", &self.label).finish()
    }
}

/// Concurrent context on a tokio runtime's blocking pool
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    label: String,
    handle: Handle,
}

impl RuntimeContext {
    pub fn new(label: impl Into<String>, handle: Handle) -> Self {
        Self {
            label: label.into(),
            handle,
        }
    }

    /// Use the runtime this is called from, if any
    pub fn current(label: impl Into<String>) -> Option<Self> {
        Handle::try_current().ok().map(|handle| Self::new(label, handle))
    }
}

impl ExecutionContext for RuntimeContext {
    fn post(&self, job: Job) {
        drop(self.handle.spawn_blocking(job));
    }

    fn label(&self) -> &str {
        &self.label
    }
}
