//! External process backend
//!
//! Spawns the manifest's `exec` command, writes the task input to its stdin
//! as JSON and reads the result from stdout. Stderr carries encoded log and
//! progress lines (see [`crate::log`]).

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use plugin_types::{PluginInput, PluginManifest, PluginOutput};

use crate::error::TaskError;
use crate::log::{emit, parse_log_line, LogLine};
use crate::task::{Completer, Lifecycle, ProgressSink, Task, TaskSpec, TaskStatus, Termination};

const RESULT_KEYS: [&str; 4] = ["output", "Output", "error", "Error"];

/// A plugin operation run as a child process
pub struct RawTask {
    manifest: Arc<PluginManifest>,
    operation: String,
    input: PluginInput,
    progress: ProgressSink,
    lifecycle: Lifecycle,
    kill: Arc<Notify>,
}

impl RawTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            manifest: spec.manifest,
            operation: spec.operation.name,
            input: spec.input,
            progress: spec.progress,
            lifecycle: Lifecycle::new(),
            kill: Arc::new(Notify::new()),
        }
    }

    /// Program to run: a file next to the manifest wins over a PATH lookup
    fn program(&self, entry: &str) -> PathBuf {
        let local = self.manifest.base_dir.join(entry);
        if local.is_file() {
            local
        } else {
            PathBuf::from(entry)
        }
    }

    fn command(&self) -> Result<Command, TaskError> {
        let entry = self.manifest.primary_exec().ok_or_else(|| {
            TaskError::InvalidManifest(format!(
                "no command specified in exec for plugin {}",
                self.manifest.id
            ))
        })?;

        let mut cmd = Command::new(self.program(entry));
        cmd.args(&self.manifest.exec[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !self.manifest.base_dir.as_os_str().is_empty() {
            cmd.current_dir(&self.manifest.base_dir);
        }

        Ok(cmd)
    }
}

#[async_trait]
impl Task for RawTask {
    fn plugin_id(&self) -> &str {
        &self.manifest.id
    }

    fn operation(&self) -> &str {
        &self.operation
    }

    fn input(&self) -> &PluginInput {
        &self.input
    }

    fn start(&self) -> Result<(), TaskError> {
        self.lifecycle.claim_start()?;

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| TaskError::Spawn(format!("no async runtime available: {}", e)))?;
        let mut cmd = self.command()?;
        let payload = serde_json::to_vec(&self.input)
            .map_err(|e| TaskError::Spawn(format!("failed to encode input: {}", e)))?;

        info!(
            plugin_id = %self.manifest.id,
            operation = %self.operation,
            "Spawning plugin process: {:?}",
            self.manifest.exec
        );

        let child = {
            let _guard = handle.enter();
            cmd.spawn().map_err(|e| {
                error!("Failed to spawn plugin {}: {}", self.manifest.id, e);
                TaskError::Spawn(e.to_string())
            })?
        };

        let completer = self.lifecycle.run();
        handle.spawn(supervise(
            child,
            payload,
            self.manifest.id.clone(),
            self.progress.clone(),
            Arc::clone(&self.kill),
            completer,
        ));

        Ok(())
    }

    async fn wait(&self) {
        self.lifecycle.wait().await
    }

    fn stop(&self) -> Result<(), TaskError> {
        match self.lifecycle.status() {
            TaskStatus::Created => Err(TaskError::NotRunning),
            TaskStatus::Running => {
                debug!(plugin_id = %self.manifest.id, operation = %self.operation, "Stop requested");
                self.kill.notify_one();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn result(&self) -> Option<PluginOutput> {
        self.lifecycle.result()
    }

    fn status(&self) -> TaskStatus {
        self.lifecycle.status()
    }
}

/// Drive the child to completion or until a stop request kills it
async fn supervise(
    mut child: Child,
    payload: Vec<u8>,
    plugin_id: String,
    progress: ProgressSink,
    kill: Arc<Notify>,
    completer: Completer,
) {
    if let Some(mut stdin) = child.stdin.take() {
        let plugin_id = plugin_id.clone();
        tokio::spawn(async move {
            // The plugin may exit without reading its input
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("[{}] could not write input: {}", plugin_id, e);
            }
        });
    }

    let stdout = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        })
    });

    let stderr = child.stderr.take().map(|stderr| {
        let plugin_id = plugin_id.clone();
        tokio::spawn(async move {
            // Keep draining on bad bytes; closing the pipe would kill the plugin
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        match parse_log_line(line.trim_end_matches(['\n', '\r'])) {
                            LogLine::Message(level, message) => emit(&plugin_id, level, &message),
                            LogLine::Progress(value) => {
                                let _ = progress.send(value);
                            }
                        }
                    }
                    Err(e) => {
                        debug!("[{}] stderr read failed: {}", plugin_id, e);
                        break;
                    }
                }
            }
        })
    });

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill.notified() => None,
    };

    let termination = match status {
        None => {
            if let Err(e) = child.kill().await {
                warn!("[{}] failed to kill plugin process: {}", plugin_id, e);
            }
            abort(stdout);
            abort(stderr);
            info!("[{}] plugin process stopped", plugin_id);
            Termination::Cancelled
        }
        Some(Err(e)) => {
            abort(stdout);
            abort(stderr);
            Termination::Faulted(format!("failed to wait for plugin: {}", e))
        }
        Some(Ok(status)) => {
            // Drain stderr first so every progress line precedes completion
            if let Some(stderr) = stderr {
                let _ = stderr.await;
            }
            let stdout = match stdout {
                Some(reader) => match reader.await {
                    Ok(Ok(buf)) => buf,
                    Ok(Err(e)) => {
                        warn!("[{}] failed to read plugin output: {}", plugin_id, e);
                        Vec::new()
                    }
                    Err(e) => {
                        warn!("[{}] output reader failed: {}", plugin_id, e);
                        Vec::new()
                    }
                },
                None => Vec::new(),
            };
            debug!("[{}] plugin process exited with {}", plugin_id, status);
            Termination::Normal(finish_output(&stdout, status))
        }
    };

    completer.finish(termination);
}

fn abort<T>(handle: Option<JoinHandle<T>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

fn finish_output(stdout: &[u8], status: ExitStatus) -> PluginOutput {
    let mut output = parse_output(stdout);
    if !status.success() && output.error.is_none() {
        output.error = Some(format!("plugin exited with {}", status));
    }
    output
}

/// Interpret a plugin's stdout.
///
/// A JSON object carrying `output`/`error` keys is a full result; any other
/// JSON is the output value; anything else is the output as a string.
fn parse_output(stdout: &[u8]) -> PluginOutput {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return PluginOutput::default();
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return PluginOutput::output(text.to_string());
    };

    let is_result = value
        .as_object()
        .is_some_and(|map| RESULT_KEYS.iter().any(|k| map.contains_key(*k)));
    if is_result {
        if let Ok(output) = serde_json::from_value::<PluginOutput>(value.clone()) {
            return output;
        }
    }
    PluginOutput::output(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{progress_channel, ProgressReceiver};
    use plugin_types::{PluginArg, PluginOperation, ServerConnection};
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_parse_output() {
        assert_eq!(parse_output(b"  \n"), PluginOutput::default());
        assert_eq!(
            parse_output(br#"{"Output": {"count": 2}}"#),
            PluginOutput::output(json!({ "count": 2 }))
        );
        assert_eq!(parse_output(br#"{"error": "nope"}"#), PluginOutput::error("nope"));
        assert_eq!(parse_output(br#"[1, 2]"#), PluginOutput::output(json!([1, 2])));
        assert_eq!(parse_output(b"all done\n"), PluginOutput::output("all done"));
    }

    #[cfg(unix)]
    fn sh_task(dir: &Path, script: &str) -> (RawTask, ProgressReceiver) {
        std::fs::write(dir.join("plugin.sh"), script).unwrap();
        let manifest = PluginManifest::new("raw-test", "Raw Test")
            .with_exec(vec!["sh".into(), "plugin.sh".into()])
            .with_operation(PluginOperation::new("Run"))
            .with_base_dir(dir);
        task_for(manifest)
    }

    fn task_for(manifest: PluginManifest) -> (RawTask, ProgressReceiver) {
        let (progress, rx) = progress_channel();
        let spec = TaskSpec {
            manifest: Arc::new(manifest),
            operation: PluginOperation::new("Run"),
            input: PluginInput::new(
                ServerConnection::default(),
                &serde_json::Map::new(),
                &[PluginArg::new("name", "world")],
            ),
            progress,
            query_handler: Arc::new(crate::query::NoQueryHandler),
        };
        (RawTask::new(spec), rx)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_output() {
        let temp = TempDir::new().unwrap();
        let (task, _rx) = sh_task(temp.path(), "cat > /dev/null\necho '{\"Output\": \"done\"}'\n");

        task.start().unwrap();
        task.wait().await;

        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.result(), Some(PluginOutput::output("done")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_reads_input() {
        let temp = TempDir::new().unwrap();
        let (task, _rx) = sh_task(temp.path(), "cat\n");

        task.start().unwrap();
        task.wait().await;

        let output = task.result().unwrap().output.unwrap();
        assert_eq!(output["args"]["name"], json!("world"));
        assert_eq!(output["server_connection"]["Host"], json!("localhost"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_progress_and_logs() {
        let temp = TempDir::new().unwrap();
        let (task, mut rx) = sh_task(
            temp.path(),
            "printf '\\001i\\002%s\\n' starting >&2\nprintf '\\001p\\002%s\\n' 0.5 >&2\necho plain >&2\necho ok\n",
        );

        task.start().unwrap();
        task.wait().await;

        assert_eq!(rx.try_recv().unwrap(), 0.5);
        assert!(rx.try_recv().is_err());
        assert_eq!(task.result(), Some(PluginOutput::output("ok")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_on_stderr_keeps_plugin_alive() {
        let temp = TempDir::new().unwrap();
        let (task, mut rx) = sh_task(
            temp.path(),
            "printf '\\377\\376\\n' >&2\n\
             i=0; while [ $i -lt 2000 ]; do echo \"line $i\" >&2; i=$((i+1)); done\n\
             printf '\\001p\\002%s\\n' 0.8 >&2\n\
             echo '{\"Output\": \"done\"}'\n",
        );

        task.start().unwrap();
        tokio::time::timeout(Duration::from_secs(10), task.wait()).await.unwrap();

        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.result(), Some(PluginOutput::output("done")));
        assert_eq!(rx.try_recv().unwrap(), 0.8);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_sets_error() {
        let temp = TempDir::new().unwrap();
        let (task, _rx) = sh_task(temp.path(), "exit 3\n");

        task.start().unwrap();
        task.wait().await;

        let result = task.result().unwrap();
        assert!(result.error.unwrap().starts_with("plugin exited with"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_process() {
        let temp = TempDir::new().unwrap();
        let (task, _rx) = sh_task(temp.path(), "exec sleep 30\n");

        task.start().unwrap();
        task.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), task.wait())
            .await
            .expect("killed process should finish");

        assert_eq!(task.status(), TaskStatus::Stopped);
        assert!(task.result().is_none());
        assert_eq!(task.stop(), Ok(()));
    }

    #[tokio::test]
    async fn test_missing_program_fails_start() {
        let temp = TempDir::new().unwrap();
        let manifest = PluginManifest::new("missing", "Missing")
            .with_exec(vec!["no-such-plugin-binary-7f3a".into()])
            .with_base_dir(temp.path());
        let (task, _rx) = task_for(manifest);

        assert!(matches!(task.start(), Err(TaskError::Spawn(_))));
        assert_eq!(task.status(), TaskStatus::Created);
        task.wait().await;
    }

    #[tokio::test]
    async fn test_empty_exec_is_invalid() {
        let (task, _rx) = task_for(PluginManifest::new("empty", "Empty"));
        assert!(matches!(task.start(), Err(TaskError::InvalidManifest(_))));
        assert_eq!(task.stop(), Err(TaskError::NotRunning));
    }
}
