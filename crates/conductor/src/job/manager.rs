//! Job Manager
//!
//! Tracks every submitted job, spawning each on the tokio runtime and
//! recording its status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use super::{Job, JobContext, JobError, JobId, JobInfo, JobProgress, JobStatus};

/// Internal representation of a submitted job
struct JobEntry {
    description: String,
    added_at: DateTime<Utc>,
    status: Arc<watch::Sender<JobStatus>>,
    progress: JobProgress,
    cancel: Arc<watch::Sender<bool>>,
}

impl JobEntry {
    fn info(&self, id: JobId) -> JobInfo {
        JobInfo {
            id,
            description: self.description.clone(),
            status: *self.status.borrow(),
            progress: self.progress.percent(),
            added_at: self.added_at,
        }
    }
}

/// Central registry of host jobs
#[derive(Default)]
pub struct JobManager {
    jobs: DashMap<JobId, JobEntry>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a job. Must be called from within a tokio runtime.
    pub fn add(&self, description: impl Into<String>, job: impl Job) -> JobId {
        let id = JobId::new_v4();
        let description = description.into();

        let (status, _) = watch::channel(JobStatus::Running);
        let status = Arc::new(status);
        let (cancel, cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel);
        let progress = JobProgress::new();

        let ctx = JobContext::new(id, progress.clone(), cancel_rx);

        self.jobs.insert(
            id,
            JobEntry {
                description: description.clone(),
                added_at: Utc::now(),
                status: Arc::clone(&status),
                progress,
                cancel: Arc::clone(&cancel),
            },
        );

        tracing::info!(job_id = %id, "Job added: {}", description);

        let job: Box<dyn Job> = Box::new(job);
        tokio::spawn(async move {
            // Inner task so a panicking job still reaches a terminal status
            if let Err(e) = tokio::spawn(job.execute(ctx)).await {
                tracing::error!(job_id = %id, error = %e, "Job panicked");
            }

            let final_status = if *cancel.borrow() {
                JobStatus::Cancelled
            } else {
                JobStatus::Finished
            };
            status.send_replace(final_status);
            tracing::info!(job_id = %id, "Job {}", final_status);
        });

        id
    }

    /// Request cancellation of a job
    pub fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let entry = self.jobs.get(&id).ok_or(JobError::NotFound(id))?;

        let mut accepted = false;
        entry.status.send_if_modified(|status| {
            if *status == JobStatus::Running {
                *status = JobStatus::Stopping;
                accepted = true;
                true
            } else {
                false
            }
        });

        if !accepted {
            // Already stopping is fine; already done is not
            if entry.status.borrow().is_terminal() {
                return Err(JobError::AlreadyFinished(id));
            }
            return Ok(());
        }

        tracing::info!(job_id = %id, "Cancelling job");
        entry.cancel.send_replace(true);
        Ok(())
    }

    /// Wait until a job reaches a terminal status
    pub async fn wait(&self, id: JobId) -> Result<JobStatus, JobError> {
        let mut rx = self
            .jobs
            .get(&id)
            .map(|entry| entry.status.subscribe())
            .ok_or(JobError::NotFound(id))?;

        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return Ok(status);
            }
            if rx.changed().await.is_err() {
                return Ok(*rx.borrow());
            }
        }
    }

    pub fn get(&self, id: JobId) -> Option<JobInfo> {
        self.jobs.get(&id).map(|entry| entry.info(id))
    }

    /// Watch percent updates of a job
    pub fn progress(&self, id: JobId) -> Option<watch::Receiver<Option<f64>>> {
        self.jobs.get(&id).map(|entry| entry.progress.subscribe())
    }

    /// All jobs, oldest first
    pub fn list(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<_> = self
            .jobs
            .iter()
            .map(|entry| entry.value().info(*entry.key()))
            .collect();
        jobs.sort_by_key(|job| job.added_at);
        jobs
    }

    /// Drop terminal jobs from the registry, returning how many were removed
    pub fn remove_finished(&self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| !entry.status.borrow().is_terminal());
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::job_fn;
    use std::time::Duration;

    struct PanickingJob;

    #[async_trait::async_trait]
    impl Job for PanickingJob {
        async fn execute(self: Box<Self>, _ctx: JobContext) {
            panic!("job blew up")
        }
    }

    #[tokio::test]
    async fn test_job_finishes() {
        let manager = JobManager::new();
        let id = manager.add(
            "Counting",
            job_fn(|ctx: JobContext| async move {
                ctx.progress.set_percent(0.5);
                ctx.progress.set_percent(1.0);
            }),
        );

        assert_eq!(manager.wait(id).await, Ok(JobStatus::Finished));

        let info = manager.get(id).unwrap();
        assert_eq!(info.description, "Counting");
        assert_eq!(info.progress, Some(1.0));
        assert_eq!(manager.cancel(id), Err(JobError::AlreadyFinished(id)));
    }

    #[tokio::test]
    async fn test_cancel_job() {
        let manager = JobManager::new();
        let id = manager.add(
            "Forever",
            job_fn(|ctx: JobContext| async move {
                ctx.cancelled().await;
            }),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.get(id).unwrap().status, JobStatus::Running);

        manager.cancel(id).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(1), manager.wait(id))
            .await
            .unwrap();
        assert_eq!(status, Ok(JobStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_panicking_job_finishes() {
        let manager = JobManager::new();
        let id = manager.add("Panics", PanickingJob);

        assert_eq!(manager.wait(id).await, Ok(JobStatus::Finished));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let manager = JobManager::new();
        let id = JobId::new_v4();

        assert_eq!(manager.cancel(id), Err(JobError::NotFound(id)));
        assert_eq!(manager.wait(id).await, Err(JobError::NotFound(id)));
        assert!(manager.get(id).is_none());
    }

    #[tokio::test]
    async fn test_list_and_remove_finished() {
        let manager = JobManager::new();
        let done = manager.add("Done", job_fn(|_ctx: JobContext| async move {}));
        let pending = manager.add(
            "Pending",
            job_fn(|ctx: JobContext| async move { ctx.cancelled().await }),
        );
        manager.wait(done).await.unwrap();

        let listed: Vec<_> = manager.list().into_iter().map(|j| j.description).collect();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&"Done".to_string()));

        assert_eq!(manager.remove_finished(), 1);
        assert_eq!(manager.len(), 1);

        manager.cancel(pending).unwrap();
        manager.wait(pending).await.unwrap();
    }
}
