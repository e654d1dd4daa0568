//! Plugin manifest types
//!
//! A manifest is a YAML document describing one plugin:
//!
//! ```yaml
//! id: example
//! name: Example Plugin
//! description: Does example things
//! exec:
//!   - example.js
//! tasks:
//!   - name: Scan
//!     description: Scan everything
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Manifest Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur while parsing a manifest
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Invalid manifest YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Manifest has no id and none could be derived from {0}")]
    MissingId(PathBuf),

    #[error("Manifest {0} declares operation with empty name")]
    EmptyOperationName(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Interface
// ─────────────────────────────────────────────────────────────────────────────

/// Execution kind of a plugin, selects the task backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginInterface {
    /// Script executed in an embedded JavaScript engine
    Js,
    /// External process fed JSON on stdin
    Raw,
}

impl fmt::Display for PluginInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginInterface::Js => write!(f, "js"),
            PluginInterface::Raw => write!(f, "raw"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Operation
// ─────────────────────────────────────────────────────────────────────────────

/// A named capability declared by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOperation {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Arguments merged in before the caller's arguments
    #[serde(default, alias = "defaultArgs", skip_serializing_if = "serde_json::Map::is_empty")]
    pub default_args: serde_json::Map<String, serde_json::Value>,
}

impl PluginOperation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            default_args: serde_json::Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.default_args.insert(key.into(), value);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Manifest
// ─────────────────────────────────────────────────────────────────────────────

/// Declarative description of a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin identifier; defaults to the manifest file stem
    #[serde(default)]
    pub id: String,

    /// Human-readable name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Executable entries; the first one is the primary script or command
    #[serde(default)]
    pub exec: Vec<String>,

    /// Explicit execution kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<PluginInterface>,

    /// Declared operations
    #[serde(default)]
    pub tasks: Vec<PluginOperation>,

    /// Directory containing the manifest file
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl PluginManifest {
    /// Create a manifest in memory
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            version: None,
            url: None,
            exec: Vec::new(),
            interface: None,
            tasks: Vec::new(),
            base_dir: PathBuf::new(),
        }
    }

    /// Parse a manifest read from `path`
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, ManifestError> {
        let mut manifest: PluginManifest = serde_yaml::from_str(content)?;

        if manifest.id.is_empty() {
            manifest.id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .ok_or_else(|| ManifestError::MissingId(path.to_path_buf()))?;
        }

        if manifest.tasks.iter().any(|t| t.name.is_empty()) {
            return Err(ManifestError::EmptyOperationName(manifest.id));
        }

        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(manifest)
    }

    pub fn with_exec(mut self, exec: Vec<String>) -> Self {
        self.exec = exec;
        self
    }

    pub fn with_interface(mut self, interface: PluginInterface) -> Self {
        self.interface = Some(interface);
        self
    }

    pub fn with_operation(mut self, operation: PluginOperation) -> Self {
        self.tasks.push(operation);
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// The execution kind, inferred from the primary entry when not declared
    pub fn interface(&self) -> PluginInterface {
        if let Some(interface) = self.interface {
            return interface;
        }

        match self.primary_exec() {
            Some(entry) if entry.ends_with(".js") => PluginInterface::Js,
            _ => PluginInterface::Raw,
        }
    }

    /// First executable entry
    pub fn primary_exec(&self) -> Option<&str> {
        self.exec.first().map(String::as_str)
    }

    /// Primary entry resolved against the manifest directory
    pub fn primary_path(&self) -> Option<PathBuf> {
        self.primary_exec().map(|entry| self.base_dir.join(entry))
    }

    /// Look up an operation by exact name
    pub fn operation(&self, name: &str) -> Option<&PluginOperation> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let yaml = r#"
id: scanner
name: Scanner
description: Scans things
exec:
  - scanner.js
tasks:
  - name: Scan
    description: Scan the library
    defaultArgs:
      mode: full
  - name: Clean
"#;
        let manifest = PluginManifest::from_yaml(yaml, Path::new("/plugins/scanner/scanner.yml")).unwrap();

        assert_eq!(manifest.id, "scanner");
        assert_eq!(manifest.name, "Scanner");
        assert_eq!(manifest.base_dir, PathBuf::from("/plugins/scanner"));
        assert_eq!(manifest.interface(), PluginInterface::Js);
        assert_eq!(manifest.tasks.len(), 2);

        let scan = manifest.operation("Scan").unwrap();
        assert_eq!(scan.default_args.get("mode"), Some(&serde_json::json!("full")));
        assert!(manifest.operation("scan").is_none());
    }

    #[test]
    fn test_id_defaults_to_file_stem() {
        let yaml = "name: Unnamed\nexec: [run.sh]\n";
        let manifest = PluginManifest::from_yaml(yaml, Path::new("plugins/tagger.yml")).unwrap();

        assert_eq!(manifest.id, "tagger");
        assert_eq!(manifest.interface(), PluginInterface::Raw);
    }

    #[test]
    fn test_explicit_interface_wins() {
        let yaml = "id: p\nname: P\ninterface: raw\nexec: [node, main.js]\n";
        let manifest = PluginManifest::from_yaml(yaml, Path::new("p.yml")).unwrap();
        assert_eq!(manifest.interface(), PluginInterface::Raw);
    }

    #[test]
    fn test_malformed_manifest() {
        let result = PluginManifest::from_yaml("name: [unclosed", Path::new("bad.yml"));
        assert!(matches!(result, Err(ManifestError::Parse(_))));

        let result = PluginManifest::from_yaml("id: x\nname: X\ntasks:\n  - name: ''\n", Path::new("x.yml"));
        assert!(matches!(result, Err(ManifestError::EmptyOperationName(_))));
    }
}
