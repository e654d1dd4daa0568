//! JavaScript Backend
//!
//! Runs plugin scripts in QuickJS. Each task gets its own runtime, compiled
//! on the caller's thread and then moved onto a dedicated worker thread.
//!
//! # Example
//!
//! ```javascript
//! log.Info("scanning " + input.args.path);
//! for (var i = 0; i < 10; i++) {
//!     util.Sleep(100);
//!     log.Progress(i / 10);
//! }
//! var tags = gql.Do("query { allTags { id } }");
//! ({ Output: tags });
//! ```
//!
//! # Global Objects
//!
//! - `input` - `{ server_connection, args }`
//! - `log.Trace/Debug/Info/Warn/Error(msg)` - Log under the `plugin` target
//! - `log.Progress(fraction)` - Report progress to the orchestrator
//! - `util.Sleep(ms)` - Sleep, interrupted by a stop request
//! - `gql.Do(query, variables?)` - Query the host through the connection
//! - `console.log/info/warn/error/debug(...)`
//!
//! The script's completion value is the result: an object exposing `Output`
//! and/or `Error` populates them, anything else yields an empty result.

mod convert;
mod globals;
mod interrupt;
mod task;

pub use task::JsTask;
