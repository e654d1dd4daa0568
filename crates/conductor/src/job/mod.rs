//! Job System
//!
//! Jobs are host-side units of background work. Each one runs on the tokio
//! runtime with a [`JobContext`] through which it reports percent complete
//! and observes cancellation.
//!
//! # Lifecycle
//!
//! ```text
//! Running ──cancel()──▶ Stopping ──▶ Cancelled
//!    └──────────────────────────────▶ Finished
//! ```

mod context;
mod manager;

pub use context::*;
pub use manager::*;

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job identifier
pub type JobId = Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Job Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already finished: {0}")]
    AlreadyFinished(JobId),
}

// ─────────────────────────────────────────────────────────────────────────────
// Job Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is executing
    Running,
    /// Cancellation requested, job has not returned yet
    Stopping,
    /// Job returned on its own
    Finished,
    /// Job returned after cancellation
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Stopping => write!(f, "stopping"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Snapshot of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub description: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub added_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Job Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A unit of background work
#[async_trait]
pub trait Job: Send + 'static {
    /// Run the job to completion. Should return promptly once
    /// [`JobContext::cancelled`] resolves.
    async fn execute(self: Box<Self>, ctx: JobContext);
}

struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn execute(self: Box<Self>, ctx: JobContext) {
        (self.0)(ctx).await
    }
}

/// Build a job from an async closure
pub fn job_fn<F, Fut>(f: F) -> impl Job
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnJob(f)
}
