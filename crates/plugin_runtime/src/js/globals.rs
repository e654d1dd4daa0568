//! Host bindings injected into a plugin script's global scope.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rquickjs::function::{Opt, Rest};
use rquickjs::{Ctx, Exception, Function, Object, Result as JsResult, Value};

use plugin_types::{PluginInput, ServerConnection};

use crate::log::{emit, LogLevel};
use crate::query::QueryHandler;
use crate::task::ProgressSink;

use super::convert::{js_to_display, js_to_json, json_to_js};
use super::interrupt::StopSignal;

/// Granularity at which `util.Sleep` notices a stop request
const SLEEP_SLICE: Duration = Duration::from_millis(20);

const LOG_LEVELS: [(&str, LogLevel); 5] = [
    ("Trace", LogLevel::Trace),
    ("Debug", LogLevel::Debug),
    ("Info", LogLevel::Info),
    ("Warn", LogLevel::Warn),
    ("Error", LogLevel::Error),
];

/// Host services a script can reach
pub(crate) struct HostBindings {
    pub plugin_id: String,
    pub input: PluginInput,
    pub progress: ProgressSink,
    pub query_handler: Arc<dyn QueryHandler>,
    pub stop: StopSignal,
}

fn throw(ctx: &Ctx<'_>, err: impl std::fmt::Display) -> rquickjs::Error {
    Exception::throw_message(ctx, &err.to_string())
}

/// Register `input`, `log`, `util`, `gql` and `console`
pub(crate) fn register_plugin_globals<'js>(ctx: &Ctx<'js>, bindings: HostBindings) -> JsResult<()> {
    let globals = ctx.globals();

    let input = serde_json::to_value(&bindings.input).map_err(|e| throw(ctx, e))?;
    globals.set("input", json_to_js(ctx, &input).map_err(|e| throw(ctx, e))?)?;

    register_console(ctx, &bindings.plugin_id)?;
    globals.set("log", log_api(ctx, &bindings.plugin_id, bindings.progress)?)?;
    globals.set("util", util_api(ctx, bindings.stop)?)?;
    globals.set(
        "gql",
        gql_api(
            ctx,
            bindings.input.server_connection.clone(),
            bindings.query_handler,
        )?,
    )?;

    Ok(())
}

/// `log.<Level>(msg)` and `log.Progress(fraction)`
fn log_api<'js>(ctx: &Ctx<'js>, plugin_id: &str, progress: ProgressSink) -> JsResult<Object<'js>> {
    let log = Object::new(ctx.clone())?;

    for (name, level) in LOG_LEVELS {
        let plugin_id = plugin_id.to_string();
        log.set(
            name,
            Function::new(ctx.clone(), move |msg: Value<'js>| {
                emit(&plugin_id, level, &js_to_display(&msg));
            })?,
        )?;
    }

    log.set(
        "Progress",
        Function::new(ctx.clone(), move |fraction: f64| {
            // Receiver gone means nobody is watching anymore
            let _ = progress.send(fraction);
        })?,
    )?;

    Ok(log)
}

/// `util.Sleep(ms)`
fn util_api<'js>(ctx: &Ctx<'js>, stop: StopSignal) -> JsResult<Object<'js>> {
    let util = Object::new(ctx.clone())?;

    util.set(
        "Sleep",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, ms: f64| -> JsResult<()> {
            let deadline = Instant::now() + Duration::from_millis(ms.max(0.0) as u64);
            loop {
                if stop.checkpoint() {
                    return Err(throw(&ctx, "interrupted"));
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(());
                }
                std::thread::sleep((deadline - now).min(SLEEP_SLICE));
            }
        })?,
    )?;

    Ok(util)
}

/// `gql.Do(query, variables?)`
fn gql_api<'js>(
    ctx: &Ctx<'js>,
    connection: ServerConnection,
    handler: Arc<dyn QueryHandler>,
) -> JsResult<Object<'js>> {
    let gql = Object::new(ctx.clone())?;

    gql.set(
        "Do",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, query: String, variables: Opt<Value<'js>>| -> JsResult<Value<'js>> {
                let variables = match variables.0 {
                    Some(v) => js_to_json(&v).map_err(|e| throw(&ctx, e))?,
                    None => serde_json::Value::Null,
                };
                let response = handler
                    .query(&connection, &query, variables)
                    .map_err(|e| throw(&ctx, e))?;
                json_to_js(&ctx, &response).map_err(|e| throw(&ctx, e))
            },
        )?,
    )?;

    Ok(gql)
}

/// Register the console object, routed to the plugin log target
fn register_console<'js>(ctx: &Ctx<'js>, plugin_id: &str) -> JsResult<()> {
    let globals = ctx.globals();

    if globals.get::<_, Object>("console").is_ok() {
        return Ok(());
    }

    let console = Object::new(ctx.clone())?;

    for (name, level) in [
        ("log", LogLevel::Info),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
        ("debug", LogLevel::Debug),
    ] {
        let plugin_id = plugin_id.to_string();
        console.set(
            name,
            Function::new(ctx.clone(), move |args: Rest<Value<'js>>| {
                let msg = args
                    .0
                    .iter()
                    .map(js_to_display)
                    .collect::<Vec<_>>()
                    .join(" ");
                emit(&plugin_id, level, &msg);
            })?,
        )?;
    }

    globals.set("console", console)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{NoQueryHandler, QueryError};
    use plugin_types::PluginArg;
    use rquickjs::{Context, Runtime};

    struct EchoQuery;

    impl QueryHandler for EchoQuery {
        fn query(
            &self,
            connection: &ServerConnection,
            query: &str,
            variables: serde_json::Value,
        ) -> Result<serde_json::Value, QueryError> {
            Ok(serde_json::json!({ "host": connection.host, "query": query, "variables": variables }))
        }
    }

    fn bindings(handler: Arc<dyn QueryHandler>) -> (HostBindings, tokio::sync::mpsc::UnboundedReceiver<f64>) {
        let (progress, rx) = tokio::sync::mpsc::unbounded_channel();
        let input = PluginInput::new(
            ServerConnection::default(),
            &serde_json::Map::new(),
            &[PluginArg::new("path", "/media")],
        );
        let bindings = HostBindings {
            plugin_id: "test".into(),
            input,
            progress,
            query_handler: handler,
            stop: StopSignal::default(),
        };
        (bindings, rx)
    }

    #[test]
    fn test_register_globals() {
        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();
        let (bindings, mut progress) = bindings(Arc::new(NoQueryHandler));

        ctx.with(|ctx| {
            register_plugin_globals(&ctx, bindings).unwrap();

            let path: String = ctx.eval("input.args.path").unwrap();
            assert_eq!(path, "/media");
            let scheme: String = ctx.eval("input.server_connection.Scheme").unwrap();
            assert_eq!(scheme, "http");

            let _: () = ctx
                .eval("log.Info('hello'); log.Debug({ a: 1 }); console.log('x', 2); log.Progress(0.5); log.Progress(1)")
                .unwrap();
        });

        assert_eq!(progress.try_recv().unwrap(), 0.5);
        assert_eq!(progress.try_recv().unwrap(), 1.0);
    }

    #[test]
    fn test_gql_proxies_to_handler() {
        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();
        let (bindings, _progress) = bindings(Arc::new(EchoQuery));

        ctx.with(|ctx| {
            register_plugin_globals(&ctx, bindings).unwrap();

            let host: String = ctx.eval("gql.Do('query { x }', { id: 4 }).host").unwrap();
            assert_eq!(host, "localhost");
            let id: i32 = ctx.eval("gql.Do('query { x }', { id: 4 }).variables.id").unwrap();
            assert_eq!(id, 4);
        });
    }

    #[test]
    fn test_gql_error_is_thrown() {
        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();
        let (bindings, _progress) = bindings(Arc::new(NoQueryHandler));

        ctx.with(|ctx| {
            register_plugin_globals(&ctx, bindings).unwrap();

            let message: String = ctx
                .eval("var m; try { gql.Do('query { x }'); } catch (e) { m = e.message; } m")
                .unwrap();
            assert_eq!(message, "Query API unavailable");
        });
    }

    #[test]
    fn test_sleep_interrupted_by_stop() {
        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();
        let (bindings, _progress) = bindings(Arc::new(NoQueryHandler));
        let stop = bindings.stop.clone();
        stop.request();

        ctx.with(|ctx| {
            register_plugin_globals(&ctx, bindings).unwrap();

            let started = Instant::now();
            let result: JsResult<()> = ctx.eval("util.Sleep(10000)");
            assert!(result.is_err());
            assert!(started.elapsed() < Duration::from_secs(5));
        });
        assert!(stop.has_fired());
    }
}
