//! Per-job progress and cancellation

use std::sync::Arc;

use tokio::sync::watch;

use super::JobId;

/// Percent complete of a job, as a fraction in 0..=1
#[derive(Debug, Clone)]
pub struct JobProgress {
    percent: Arc<watch::Sender<Option<f64>>>,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl JobProgress {
    pub fn new() -> Self {
        let (percent, _) = watch::channel(None);
        Self {
            percent: Arc::new(percent),
        }
    }

    /// Record percent complete. Values outside 0..=1 are clamped; NaN is ignored.
    pub fn set_percent(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.percent.send_replace(Some(value.clamp(0.0, 1.0)));
    }

    /// Last recorded percent, if any
    pub fn percent(&self) -> Option<f64> {
        *self.percent.borrow()
    }

    /// Watch percent updates
    pub fn subscribe(&self) -> watch::Receiver<Option<f64>> {
        self.percent.subscribe()
    }
}

/// Handle given to a running job
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub progress: JobProgress,
    cancel: watch::Receiver<bool>,
}

impl JobContext {
    pub(crate) fn new(job_id: JobId, progress: JobProgress, cancel: watch::Receiver<bool>) -> Self {
        Self {
            job_id,
            progress,
            cancel,
        }
    }

    /// A context outside any manager, with the sender that cancels it
    pub fn detached() -> (Self, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = Self::new(JobId::new_v4(), JobProgress::new(), cancel_rx);
        (ctx, cancel_tx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// canceller is gone without having cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_progress_clamped() {
        let progress = JobProgress::new();
        assert_eq!(progress.percent(), None);

        progress.set_percent(0.4);
        assert_eq!(progress.percent(), Some(0.4));
        progress.set_percent(1.7);
        assert_eq!(progress.percent(), Some(1.0));
        progress.set_percent(-3.0);
        assert_eq!(progress.percent(), Some(0.0));
        progress.set_percent(f64::NAN);
        assert_eq!(progress.percent(), Some(0.0));
    }

    #[tokio::test]
    async fn test_cancelled_resolves() {
        let (ctx, cancel) = JobContext::detached();
        assert!(!ctx.is_cancelled());

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.send_replace(true);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_canceller_never_cancels() {
        let (ctx, cancel) = JobContext::detached();
        drop(cancel);

        let result = tokio::time::timeout(Duration::from_millis(50), ctx.cancelled()).await;
        assert!(result.is_err());
    }
}
