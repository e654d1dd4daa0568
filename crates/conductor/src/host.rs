//! Conductor - the host that owns the plugin cache and the job manager

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::info;

use plugin_runtime::plugin_types::PluginArg;
use plugin_runtime::{progress_channel, LoadError, NoQueryHandler, PluginCache, QueryHandler, ResolveError};

use crate::config::ConductorConfig;
use crate::job::{JobId, JobManager};
use crate::orchestrator::{PluginTaskJob, TaskReport};
use crate::watcher::PluginWatcher;

pub struct Conductor {
    config: ConductorConfig,
    cache: Arc<PluginCache>,
    jobs: Arc<JobManager>,
}

impl Conductor {
    pub fn new(config: ConductorConfig) -> Self {
        Self::with_query_handler(config, Arc::new(NoQueryHandler))
    }

    /// Create a conductor whose plugins query the host through `query_handler`
    pub fn with_query_handler(config: ConductorConfig, query_handler: Arc<dyn QueryHandler>) -> Self {
        Self {
            config,
            cache: Arc::new(PluginCache::new(query_handler)),
            jobs: Arc::new(JobManager::new()),
        }
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PluginCache> {
        &self.cache
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    /// (Re)load plugins from the configured directory
    pub async fn load_plugins(&self) -> Result<usize, LoadError> {
        self.cache.load(&self.config.plugins_dir).await
    }

    /// Watch the plugin directory and reload on manifest changes
    pub fn watch_plugins(&self) -> Result<PluginWatcher, notify::Error> {
        PluginWatcher::new(&self.config.plugins_dir, Arc::clone(&self.cache))
    }

    /// Queue a plugin operation as a job
    pub fn run_plugin_task(
        &self,
        plugin_id: &str,
        operation: &str,
        args: &[PluginArg],
    ) -> Result<JobId, ResolveError> {
        let (job, _report) = self.plugin_task_job(plugin_id, operation, args)?;
        Ok(self.submit(operation, job))
    }

    /// Queue a plugin operation as a job and receive its final report
    pub fn submit_plugin_task(
        &self,
        plugin_id: &str,
        operation: &str,
        args: &[PluginArg],
    ) -> Result<(JobId, oneshot::Receiver<TaskReport>), ResolveError> {
        let (job, report) = self.plugin_task_job(plugin_id, operation, args)?;
        Ok((self.submit(operation, job), report))
    }

    fn plugin_task_job(
        &self,
        plugin_id: &str,
        operation: &str,
        args: &[PluginArg],
    ) -> Result<(PluginTaskJob, oneshot::Receiver<TaskReport>), ResolveError> {
        let (sink, progress) = progress_channel();
        let task = self.cache.create_task(
            plugin_id,
            operation,
            self.config.server_connection(),
            args,
            sink,
        )?;
        Ok(PluginTaskJob::new(task, progress).with_report())
    }

    fn submit(&self, operation: &str, job: PluginTaskJob) -> JobId {
        let id = self.jobs.add(format!("Running plugin task: {}", operation), job);
        info!(job_id = %id, operation, "Plugin task queued");
        id
    }
}
