//! Host data-query seam
//!
//! Plugins can call back into the host's query API through the connection
//! they were started with. The host supplies the implementation.

use plugin_types::ServerConnection;

/// Errors from a host query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Query API unavailable")]
    Unavailable,

    #[error("Query failed: {0}")]
    Failed(String),
}

/// Host-provided query service.
///
/// Called synchronously from the plugin worker thread, so implementations
/// must not rely on being inside an async runtime.
pub trait QueryHandler: Send + Sync + 'static {
    /// Run `query` with `variables` on behalf of a plugin.
    fn query(
        &self,
        connection: &ServerConnection,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, QueryError>;
}

/// Handler used when the host exposes no query API.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoQueryHandler;

impl QueryHandler for NoQueryHandler {
    fn query(
        &self,
        _connection: &ServerConnection,
        _query: &str,
        _variables: serde_json::Value,
    ) -> Result<serde_json::Value, QueryError> {
        Err(QueryError::Unavailable)
    }
}
