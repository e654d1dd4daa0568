//! Job Orchestrator
//!
//! Bridges one plugin [`Task`] to a host job: relays progress into the job's
//! percent complete and turns job cancellation into a task stop.

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use plugin_runtime::plugin_types::PluginOutput;
use plugin_runtime::{ProgressReceiver, Task, TaskError};

use crate::job::{Job, JobContext};

/// How an orchestrated task ended, from the job's point of view
#[derive(Debug, Clone, PartialEq)]
pub enum TaskReport {
    /// The task reached a terminal state on its own
    Completed(Option<PluginOutput>),
    /// The job was cancelled; the task was asked to stop
    Cancelled,
    /// The task could not be started
    Failed(TaskError),
}

/// Drive a started task until it completes or `ctx` is cancelled.
///
/// Progress is forwarded in emission order. On completion any progress still
/// queued is applied before the result is read. On cancellation the task is
/// stopped and this returns without waiting for it to wind down.
pub async fn orchestrate(task: &dyn Task, mut progress: ProgressReceiver, ctx: &JobContext) -> TaskReport {
    let plugin_id = task.plugin_id();
    let operation = task.operation();

    let mut done = task.wait();
    let mut progress_open = true;

    loop {
        tokio::select! {
            _ = &mut done => {
                while let Ok(value) = progress.try_recv() {
                    ctx.progress.set_percent(value);
                }

                let result = task.result();
                log_result(plugin_id, operation, result.as_ref());
                return TaskReport::Completed(result);
            }

            value = progress.recv(), if progress_open => match value {
                Some(value) => ctx.progress.set_percent(value),
                None => progress_open = false,
            },

            _ = ctx.cancelled() => {
                info!(job_id = %ctx.job_id, plugin_id, operation, "Stopping plugin task");
                if let Err(e) = task.stop() {
                    warn!(job_id = %ctx.job_id, plugin_id, operation, "Failed to stop plugin task: {}", e);
                }
                return TaskReport::Cancelled;
            }
        }
    }
}

fn log_result(plugin_id: &str, operation: &str, result: Option<&PluginOutput>) {
    match result {
        Some(PluginOutput { error: Some(message), .. }) => {
            error!(plugin_id, operation, "Plugin returned error: {}", message);
        }
        Some(PluginOutput { output: Some(output), .. }) => {
            debug!(plugin_id, operation, "Plugin returned: {}", output);
        }
        _ => debug!(plugin_id, operation, "Plugin returned no result"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Task Job
// ─────────────────────────────────────────────────────────────────────────────

/// A job that starts one plugin task and orchestrates it
pub struct PluginTaskJob {
    task: Box<dyn Task>,
    progress: ProgressReceiver,
    report: Option<oneshot::Sender<TaskReport>>,
}

impl PluginTaskJob {
    pub fn new(task: Box<dyn Task>, progress: ProgressReceiver) -> Self {
        Self {
            task,
            progress,
            report: None,
        }
    }

    /// Also deliver the final report over a channel
    pub fn with_report(mut self) -> (Self, oneshot::Receiver<TaskReport>) {
        let (tx, rx) = oneshot::channel();
        self.report = Some(tx);
        (self, rx)
    }
}

#[async_trait]
impl Job for PluginTaskJob {
    async fn execute(self: Box<Self>, ctx: JobContext) {
        let PluginTaskJob {
            task,
            progress,
            report,
        } = *self;

        // Starting reads the script and builds the engine, both blocking
        let started = tokio::task::spawn_blocking(move || {
            let result = task.start();
            (task, result)
        })
        .await;

        let outcome = match started {
            Ok((task, Ok(()))) => orchestrate(task.as_ref(), progress, &ctx).await,
            Ok((task, Err(e))) => {
                error!(
                    job_id = %ctx.job_id,
                    plugin_id = task.plugin_id(),
                    operation = task.operation(),
                    "Error running plugin task: {}",
                    e
                );
                TaskReport::Failed(e)
            }
            Err(e) => {
                error!(job_id = %ctx.job_id, "Plugin task start panicked: {}", e);
                TaskReport::Failed(TaskError::Spawn(format!("start panicked: {}", e)))
            }
        };

        if let Some(report) = report {
            // Nobody listening is fine
            let _ = report.send(outcome);
        }
    }
}
