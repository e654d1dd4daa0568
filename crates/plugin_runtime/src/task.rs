//! Task contract
//!
//! A task is one invocation of one plugin operation. Every backend follows
//! the same lifecycle:
//!
//! ```text
//! Created ──start()──▶ Running ──▶ Completed | Errored | Stopped
//! ```
//!
//! `start` is effective at most once. The worker reports exactly one
//! [`Termination`], which fixes the task's result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use plugin_types::{PluginInput, PluginManifest, PluginOperation, PluginOutput};

use crate::error::TaskError;
use crate::query::QueryHandler;

/// Sending half of a task's progress channel. Values are fractions in 0..=1.
pub type ProgressSink = mpsc::UnboundedSender<f64>;

/// Receiving half of a task's progress channel.
pub type ProgressReceiver = mpsc::UnboundedReceiver<f64>;

/// Create a progress channel
pub fn progress_channel() -> (ProgressSink, ProgressReceiver) {
    mpsc::unbounded_channel()
}

// ─────────────────────────────────────────────────────────────────────────────
// Termination
// ─────────────────────────────────────────────────────────────────────────────

/// Why a worker stopped
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// The plugin returned
    Normal(PluginOutput),
    /// The plugin raised an uncaught fault
    Faulted(String),
    /// The plugin honored a stop request
    Cancelled,
}

impl Termination {
    /// The result a caller observes for this termination
    pub fn result(&self) -> Option<PluginOutput> {
        match self {
            Termination::Normal(output) => Some(output.clone()),
            Termination::Faulted(message) => Some(PluginOutput::error(message.clone())),
            Termination::Cancelled => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task Status
// ─────────────────────────────────────────────────────────────────────────────

/// Observable lifecycle position of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Completed,
    Errored,
    Stopped,
}

impl TaskStatus {
    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Errored | TaskStatus::Stopped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Created => write!(f, "created"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Errored => write!(f, "errored"),
            TaskStatus::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
enum TaskState {
    Created,
    Running,
    Finished(Termination),
}

impl TaskState {
    fn status(&self) -> TaskStatus {
        match self {
            TaskState::Created => TaskStatus::Created,
            TaskState::Running => TaskStatus::Running,
            TaskState::Finished(Termination::Normal(_)) => TaskStatus::Completed,
            TaskState::Finished(Termination::Faulted(_)) => TaskStatus::Errored,
            TaskState::Finished(Termination::Cancelled) => TaskStatus::Stopped,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task Trait
// ─────────────────────────────────────────────────────────────────────────────

/// One invocation of one plugin operation.
#[async_trait]
pub trait Task: Send + Sync {
    /// Plugin this task belongs to
    fn plugin_id(&self) -> &str;

    /// Operation being invoked
    fn operation(&self) -> &str;

    /// Input handed to the plugin
    fn input(&self) -> &PluginInput;

    /// Begin execution. Returns once the worker is launched.
    ///
    /// May block on script reads and engine setup; async callers should run
    /// it on the blocking pool.
    fn start(&self) -> Result<(), TaskError>;

    /// Wait until the task reaches a terminal state. Returns immediately if
    /// the task was never started.
    async fn wait(&self);

    /// Request cooperative cancellation. Does not wait for the worker.
    fn stop(&self) -> Result<(), TaskError>;

    /// Result captured at completion; `None` while running, after a stop,
    /// or if the task never ran.
    fn result(&self) -> Option<PluginOutput>;

    /// Current lifecycle position
    fn status(&self) -> TaskStatus;
}

/// Everything a backend needs to build a task
pub struct TaskSpec {
    pub manifest: Arc<PluginManifest>,
    pub operation: PluginOperation,
    pub input: PluginInput,
    pub progress: ProgressSink,
    pub query_handler: Arc<dyn QueryHandler>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Shared lifecycle bookkeeping for task backends
pub(crate) struct Lifecycle {
    started: AtomicBool,
    state: Arc<watch::Sender<TaskState>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(TaskState::Created);
        Self {
            started: AtomicBool::new(false),
            state: Arc::new(state),
        }
    }

    /// Claim the single start. Fails on every call after the first.
    pub(crate) fn claim_start(&self) -> Result<(), TaskError> {
        self.started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| TaskError::AlreadyStarted)
    }

    /// Move to Running and hand out the completion handle for the worker
    pub(crate) fn run(&self) -> Completer {
        self.state.send_replace(TaskState::Running);
        Completer {
            state: Some(Arc::clone(&self.state)),
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.state.borrow().status()
    }

    pub(crate) fn result(&self) -> Option<PluginOutput> {
        match &*self.state.borrow() {
            TaskState::Finished(termination) => termination.result(),
            _ => None,
        }
    }

    pub(crate) async fn wait(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if !matches!(*rx.borrow_and_update(), TaskState::Running) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Write-once completion handle held by a worker.
///
/// Dropping it without calling [`Completer::finish`] (for example when the
/// worker panics) records a fault, so waiters are always released.
pub(crate) struct Completer {
    state: Option<Arc<watch::Sender<TaskState>>>,
}

impl Completer {
    pub(crate) fn finish(mut self, termination: Termination) {
        if let Some(state) = self.state.take() {
            state.send_replace(TaskState::Finished(termination));
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            tracing::error!("Plugin worker exited without reporting a result");
            state.send_replace(TaskState::Finished(Termination::Faulted(
                "plugin worker exited unexpectedly".to_string(),
            )));
        }
    }
}
