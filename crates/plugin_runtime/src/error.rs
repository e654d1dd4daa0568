//! Error types for the plugin runtime.

use std::path::PathBuf;

use plugin_types::ManifestError;

/// Errors that abort loading a plugin directory.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to walk plugin directory {path}: {source}")]
    DirectoryWalk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors loading a single manifest file. These are logged and the file is
/// skipped; they never abort a directory load.
#[derive(Debug, thiserror::Error)]
pub enum ManifestLoadError {
    #[error("Failed to read manifest: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Invalid(#[from] ManifestError),
}

/// Errors resolving a (plugin, operation) reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("No plugin with ID {0}")]
    PluginNotFound(String),

    #[error("No task with name {operation} in plugin {plugin}")]
    OperationNotFound { plugin: String, operation: String },
}

/// Errors from task lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task already started")]
    AlreadyStarted,

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Failed to read script {path}: {message}")]
    ScriptUnreadable { path: PathBuf, message: String },

    #[error("Failed to compile script: {0}")]
    Compile(String),

    #[error("Failed to prepare runtime: {0}")]
    Runtime(String),

    #[error("Failed to spawn plugin: {0}")]
    Spawn(String),

    #[error("Task is not running")]
    NotRunning,
}

impl TaskError {
    /// Whether the error came out of `start`
    pub fn is_start_error(&self) -> bool {
        !matches!(self, TaskError::NotRunning)
    }
}
