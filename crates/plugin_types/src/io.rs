//! Invocation input and output
//!
//! What a plugin receives when one of its operations runs, and what it hands
//! back when it finishes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

/// A single caller-supplied argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginArg {
    pub key: String,
    pub value: Value,
}

impl PluginArg {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse a `key=value` pair. The value is read as JSON when it parses,
    /// otherwise it is kept as a plain string.
    pub fn parse(pair: &str) -> Option<Self> {
        let (key, raw) = pair.split_once('=')?;
        if key.is_empty() {
            return None;
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Some(Self::new(key, value))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Connection
// ─────────────────────────────────────────────────────────────────────────────

/// How a plugin can reach back into the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerConnection {
    pub scheme: String,
    pub host: String,
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,

    /// Host working directory
    #[serde(default)]
    pub dir: PathBuf,

    /// Directory of the plugin being run, filled in per task
    #[serde(default)]
    pub plugin_dir: PathBuf,
}

impl Default for ServerConnection {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 9999,
            session_cookie: None,
            dir: PathBuf::new(),
            plugin_dir: PathBuf::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Input
// ─────────────────────────────────────────────────────────────────────────────

/// The document handed to a plugin as `input`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInput {
    pub server_connection: ServerConnection,
    pub args: Map<String, Value>,
}

impl PluginInput {
    /// Build input from operation defaults followed by caller arguments.
    /// Later keys override earlier ones.
    pub fn new(server_connection: ServerConnection, defaults: &Map<String, Value>, args: &[PluginArg]) -> Self {
        let mut merged = defaults.clone();
        for arg in args {
            merged.insert(arg.key.clone(), arg.value.clone());
        }

        Self {
            server_connection,
            args: merged,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Output
// ─────────────────────────────────────────────────────────────────────────────

/// Terminal outcome of a plugin task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginOutput {
    #[serde(default, alias = "Output", skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, alias = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginOutput {
    pub fn output(value: impl Into<Value>) -> Self {
        Self {
            output: Some(value.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(message.into()),
        }
    }

    /// Neither an output nor an error was produced
    pub fn is_empty(&self) -> bool {
        self.output.is_none() && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arg() {
        let arg = PluginArg::parse("limit=10").unwrap();
        assert_eq!(arg.key, "limit");
        assert_eq!(arg.value, json!(10));

        let arg = PluginArg::parse("path=/media/videos").unwrap();
        assert_eq!(arg.value, json!("/media/videos"));

        let arg = PluginArg::parse("expr=a=b").unwrap();
        assert_eq!(arg.key, "expr");
        assert_eq!(arg.value, json!("a=b"));

        assert!(PluginArg::parse("novalue").is_none());
        assert!(PluginArg::parse("=x").is_none());
    }

    #[test]
    fn test_input_merges_defaults_then_args() {
        let mut defaults = Map::new();
        defaults.insert("mode".into(), json!("full"));
        defaults.insert("dry_run".into(), json!(true));

        let args = vec![
            PluginArg::new("dry_run", false),
            PluginArg::new("tag", "a"),
            PluginArg::new("tag", "b"),
        ];

        let input = PluginInput::new(ServerConnection::default(), &defaults, &args);
        assert_eq!(input.args.get("mode"), Some(&json!("full")));
        assert_eq!(input.args.get("dry_run"), Some(&json!(false)));
        assert_eq!(input.args.get("tag"), Some(&json!("b")));
    }

    #[test]
    fn test_output_accepts_either_case() {
        let lower: PluginOutput = serde_json::from_str(r#"{"output": "ok"}"#).unwrap();
        let upper: PluginOutput = serde_json::from_str(r#"{"Output": "ok"}"#).unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower, PluginOutput::output("ok"));

        let err: PluginOutput = serde_json::from_str(r#"{"Error": "boom"}"#).unwrap();
        assert_eq!(err, PluginOutput::error("boom"));
        assert!(PluginOutput::default().is_empty());
    }

    #[test]
    fn test_connection_serializes_pascal_case() {
        let json = serde_json::to_value(ServerConnection::default()).unwrap();
        assert_eq!(json["Scheme"], json!("http"));
        assert_eq!(json["Port"], json!(9999));
        assert!(json.get("SessionCookie").is_none());
    }
}
