//! JavaScript task backend.

use std::ffi::CString;
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use rquickjs::context::EvalOptions;
use rquickjs::{qjs, Context, Ctx, Runtime, Value};
use tracing::{debug, error, warn};

use plugin_types::{PluginInput, PluginManifest, PluginOutput};

use crate::error::TaskError;
use crate::query::QueryHandler;
use crate::task::{Lifecycle, ProgressSink, Task, TaskSpec, TaskStatus, Termination};

use super::convert::{js_to_display, js_to_json};
use super::globals::{register_plugin_globals, HostBindings};
use super::interrupt::StopSignal;

/// A plugin operation run as a QuickJS script
pub struct JsTask {
    manifest: Arc<PluginManifest>,
    operation: String,
    input: PluginInput,
    progress: ProgressSink,
    query_handler: Arc<dyn QueryHandler>,
    lifecycle: Lifecycle,
    stop: StopSignal,
}

impl JsTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            manifest: spec.manifest,
            operation: spec.operation.name,
            input: spec.input,
            progress: spec.progress,
            query_handler: spec.query_handler,
            lifecycle: Lifecycle::new(),
            stop: StopSignal::default(),
        }
    }

    /// Build a runtime with the host bindings installed and the script
    /// syntax-checked. Nothing from the script runs yet.
    fn prepare(&self, source: &str) -> Result<(Runtime, Context), TaskError> {
        let runtime = Runtime::new().map_err(|e| TaskError::Runtime(e.to_string()))?;
        let context = Context::full(&runtime).map_err(|e| TaskError::Runtime(e.to_string()))?;

        let stop = self.stop.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || stop.checkpoint())));

        let bindings = HostBindings {
            plugin_id: self.manifest.id.clone(),
            input: self.input.clone(),
            progress: self.progress.clone(),
            query_handler: Arc::clone(&self.query_handler),
            stop: self.stop.clone(),
        };

        context.with(|ctx| {
            check_syntax(&ctx, source).map_err(|e| TaskError::Compile(exception_message(&ctx, e)))?;
            register_plugin_globals(&ctx, bindings)
                .map_err(|e| TaskError::Runtime(exception_message(&ctx, e)))
        })?;

        Ok((runtime, context))
    }
}

#[async_trait]
impl Task for JsTask {
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

        let script_path = self.manifest.primary_path().ok_or_else(|| {
            TaskError::InvalidManifest(format!(
                "no script specified in exec for plugin {}",
                self.manifest.id
            ))
        })?;

        let source = std::fs::read_to_string(&script_path).map_err(|e| TaskError::ScriptUnreadable {
            path: script_path.clone(),
            message: e.to_string(),
        })?;

        let (runtime, context) = self.prepare(&source)?;

        let plugin_id = self.manifest.id.clone();
        let operation = self.operation.clone();
        let stop = self.stop.clone();
        let completer = self.lifecycle.run();

        debug!(plugin_id = %plugin_id, operation = %operation, "Starting script worker");

        thread::Builder::new()
            .name(format!("plugin-{}", plugin_id))
            .spawn(move || {
                let termination = run_script(&context, source, &stop);
                match &termination {
                    Termination::Normal(_) => {
                        debug!(plugin_id = %plugin_id, operation = %operation, "Script finished")
                    }
                    Termination::Faulted(message) => {
                        debug!(plugin_id = %plugin_id, operation = %operation, error = %message, "Script raised an error")
                    }
                    Termination::Cancelled => {
                        debug!(plugin_id = %plugin_id, operation = %operation, "Script stopped")
                    }
                }
                drop(context);
                drop(runtime);
                completer.finish(termination);
            })
            .map_err(|e| {
                error!("Failed to spawn script worker: {}", e);
                TaskError::Spawn(e.to_string())
            })?;

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
                self.stop.request();
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

/// Parse the script without running any of it. The compiled function is
/// discarded; the worker evaluates the source again.
fn check_syntax(ctx: &Ctx<'_>, source: &str) -> rquickjs::Result<()> {
    let len = source.len();
    let source = CString::new(source)?;
    let raw = ctx.as_raw().as_ptr();
    let flags = qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY;

    // SAFETY: `raw` is the live context behind `ctx` and `source` is
    // NUL-terminated with `len` bytes before the terminator. The returned
    // value is owned here and freed before returning.
    unsafe {
        let compiled = qjs::JS_Eval(raw, source.as_ptr(), len as _, c"script".as_ptr(), flags as i32);
        if qjs::JS_IsException(compiled) {
            return Err(rquickjs::Error::Exception);
        }
        qjs::JS_FreeValue(raw, compiled);
    }
    Ok(())
}

/// Supervising frame around the script. A fired stop signal makes the run a
/// clean cancellation even if the script caught the unwind; any other
/// exception is a fault captured as data.
fn run_script(context: &Context, source: String, stop: &StopSignal) -> Termination {
    context.with(|ctx| {
        let mut options = EvalOptions::default();
        options.global = true;
        options.strict = false;
        options.backtrace_barrier = true;

        let outcome = ctx.eval_with_options::<Value, _>(source, options);
        if stop.has_fired() {
            return Termination::Cancelled;
        }
        match outcome {
            Ok(value) => Termination::Normal(make_output(&value)),
            Err(e) => Termination::Faulted(exception_message(&ctx, e)),
        }
    })
}

/// Read `Output` and `Error` off the script's completion value
fn make_output(value: &Value<'_>) -> PluginOutput {
    let Some(object) = value.as_object() else {
        return PluginOutput::default();
    };

    let mut error = object
        .get::<_, Value>("Error")
        .ok()
        .filter(|v| !v.is_undefined() && !v.is_null())
        .map(|v| js_to_display(&v));

    let output = match object
        .get::<_, Value>("Output")
        .ok()
        .filter(|v| !v.is_undefined() && !v.is_null())
        .map(|v| js_to_json(&v))
    {
        Some(Ok(value)) => Some(value),
        Some(Err(e)) => {
            warn!("Script output could not be converted: {}", e);
            error.get_or_insert_with(|| format!("invalid Output: {}", e));
            None
        }
        None => None,
    };

    PluginOutput { output, error }
}

/// Message of the pending exception behind an engine error
fn exception_message(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }

    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        return exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
    }
    js_to_display(&caught)
}
