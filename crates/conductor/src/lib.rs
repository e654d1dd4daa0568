//! Conductor - Plugin task host
//!
//! This crate hosts plugin tasks on behalf of an application, including:
//! - Host job tracking with progress and cancellation
//! - The orchestrator that drives a plugin task inside a job
//! - Plugin directory watching and configuration

// Re-export the plugin runtime
pub use plugin_runtime;

pub mod config;

// Host job system
pub mod job;

// Task orchestration
pub mod orchestrator;

// Plugin directory watcher
pub mod watcher;

mod host;

pub use host::Conductor;
