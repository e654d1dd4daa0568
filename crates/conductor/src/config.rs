//! Conductor configuration
//!
//! Layered, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. `conductor.toml` (or the file given on the command line)
//! 3. `CONDUCTOR_*` environment variables, `__` separating nested keys
//!    (`CONDUCTOR_SERVER__PORT=8080`)
//!
//! Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use plugin_runtime::plugin_types::ServerConnection;

/// Config file read when none is given explicitly
pub const DEFAULT_CONFIG_FILE: &str = "conductor.toml";

const ENV_PREFIX: &str = "CONDUCTOR_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] figment::Error),
}

/// How plugins reach back into the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub session_cookie: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let connection = ServerConnection::default();
        Self {
            scheme: connection.scheme,
            host: connection.host,
            port: connection.port,
            session_cookie: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Directory scanned for plugin manifests
    pub plugins_dir: PathBuf,

    /// Log filter used when `RUST_LOG` is unset
    pub log_filter: String,

    pub server: ServerConfig,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("./plugins"),
            log_filter: "conductor=info,plugin_runtime=info,plugin=info".to_string(),
            server: ServerConfig::default(),
        }
    }
}

impl ConductorConfig {
    /// Load configuration. An explicit `path` must exist; the default file
    /// is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        Self::figment(&file).extract().map_err(ConfigError::from)
    }

    /// The provider stack behind [`ConductorConfig::load`]
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Connection handed to every plugin task
    pub fn server_connection(&self) -> ServerConnection {
        ServerConnection {
            scheme: self.server.scheme.clone(),
            host: self.server.host.clone(),
            port: self.server.port,
            session_cookie: self.server.session_cookie.clone(),
            dir: std::env::current_dir().unwrap_or_default(),
            plugin_dir: PathBuf::new(),
        }
    }
}
