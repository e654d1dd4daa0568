//! Plugin Runtime - Task execution engine for plugins
//!
//! This crate turns a (plugin, operation) reference into a controllable,
//! observable unit of work.
//!
//! # Architecture
//!
//! - [`PluginCache`] indexes manifests and builds tasks
//! - [`Task`] is the lifecycle contract: start, wait, stop, result
//! - `js` backend runs scripts in an embedded QuickJS engine on a dedicated thread
//! - `raw` backend runs an external process fed JSON on stdin
//! - Progress flows out through an unbounded channel, so a worker never blocks on it

mod cache;
mod error;
mod js;
mod log;
mod query;
mod raw;
mod task;

pub use cache::*;
pub use error::*;
pub use js::JsTask;
pub use log::{parse_log_line, LogLevel, LogLine};
pub use query::*;
pub use raw::RawTask;
pub use task::*;

pub use plugin_types;
