//! Plugin Cache - Discovers plugin manifests and builds tasks from them
//!
//! Manifests are `.yml`/`.yaml` files anywhere under the plugin directory.
//!
//! ```text
//! plugins/
//! ├── scanner/
//! │   ├── scanner.yml   <- Found (id "scanner" unless declared)
//! │   └── scanner.js
//! └── tools/
//!     └── cleanup.yaml  <- Found
//! ```
//!
//! A load replaces the whole plugin set at once, so concurrent readers see
//! either the old set or the new one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use plugin_types::{
    PluginArg, PluginInput, PluginInterface, PluginManifest, PluginOperation, ServerConnection,
};

use crate::error::{LoadError, ManifestLoadError, ResolveError};
use crate::js::JsTask;
use crate::query::{NoQueryHandler, QueryHandler};
use crate::raw::RawTask;
use crate::task::{ProgressSink, Task, TaskSpec};

type PluginSet = BTreeMap<String, Arc<PluginManifest>>;

/// Registry of loaded plugins
pub struct PluginCache {
    plugins: RwLock<Arc<PluginSet>>,
    query_handler: Arc<dyn QueryHandler>,
}

impl Default for PluginCache {
    fn default() -> Self {
        Self::new(Arc::new(NoQueryHandler))
    }
}

impl PluginCache {
    pub fn new(query_handler: Arc<dyn QueryHandler>) -> Self {
        Self {
            plugins: RwLock::new(Arc::new(PluginSet::new())),
            query_handler,
        }
    }

    /// Discover and parse every manifest under `path`, replacing the current
    /// plugin set. Malformed manifests are logged and skipped. A directory
    /// that cannot be walked leaves the current set untouched.
    pub async fn load(&self, path: &Path) -> Result<usize, LoadError> {
        info!("Reading plugin configs from {}", path.display());

        let files = find_manifests(path).await?;
        let mut manifests = Vec::with_capacity(files.len());

        for file in files {
            match load_manifest(&file).await {
                Ok(manifest) => {
                    debug!("Discovered plugin: {} at {}", manifest.id, file.display());
                    manifests.push(manifest);
                }
                Err(e) => {
                    error!("Error loading plugin config {}: {}", file.display(), e);
                }
            }
        }

        Ok(self.set_plugins(manifests))
    }

    /// Replace the plugin set. The first manifest with a given id wins.
    pub fn set_plugins(&self, manifests: Vec<PluginManifest>) -> usize {
        let mut plugins = PluginSet::new();

        for manifest in manifests {
            if plugins.contains_key(&manifest.id) {
                warn!(
                    "Duplicate plugin id {} in {}, skipping",
                    manifest.id,
                    manifest.base_dir.display()
                );
                continue;
            }
            plugins.insert(manifest.id.clone(), Arc::new(manifest));
        }

        let count = plugins.len();
        *self.plugins.write() = Arc::new(plugins);
        info!("Loaded {} plugins", count);
        count
    }

    fn snapshot(&self) -> Arc<PluginSet> {
        Arc::clone(&self.plugins.read())
    }

    /// All loaded plugins, ordered by id
    pub fn list(&self) -> Vec<Arc<PluginManifest>> {
        self.snapshot().values().cloned().collect()
    }

    /// Every operation of every plugin, paired with its plugin id
    pub fn list_operations(&self) -> Vec<(String, PluginOperation)> {
        self.snapshot()
            .values()
            .flat_map(|manifest| {
                manifest
                    .tasks
                    .iter()
                    .map(|op| (manifest.id.clone(), op.clone()))
            })
            .collect()
    }

    pub fn get(&self, plugin_id: &str) -> Option<Arc<PluginManifest>> {
        self.snapshot().get(plugin_id).cloned()
    }

    /// Find a plugin and one of its operations
    pub fn resolve(
        &self,
        plugin_id: &str,
        operation: &str,
    ) -> Result<(Arc<PluginManifest>, PluginOperation), ResolveError> {
        let manifest = self
            .get(plugin_id)
            .ok_or_else(|| ResolveError::PluginNotFound(plugin_id.to_string()))?;

        let op = manifest
            .operation(operation)
            .cloned()
            .ok_or_else(|| ResolveError::OperationNotFound {
                plugin: plugin_id.to_string(),
                operation: operation.to_string(),
            })?;

        Ok((manifest, op))
    }

    /// Build an unstarted task for `operation` of `plugin_id`.
    ///
    /// The input carries the connection (with `plugin_dir` set to the
    /// plugin's directory) and the operation's default args overlaid with
    /// `args`.
    pub fn create_task(
        &self,
        plugin_id: &str,
        operation: &str,
        mut connection: ServerConnection,
        args: &[PluginArg],
        progress: ProgressSink,
    ) -> Result<Box<dyn Task>, ResolveError> {
        let (manifest, op) = self.resolve(plugin_id, operation)?;

        connection.plugin_dir = manifest.base_dir.clone();
        let input = PluginInput::new(connection, &op.default_args, args);
        let interface = manifest.interface();

        let spec = TaskSpec {
            manifest,
            operation: op,
            input,
            progress,
            query_handler: Arc::clone(&self.query_handler),
        };

        let task: Box<dyn Task> = match interface {
            PluginInterface::Js => Box::new(JsTask::new(spec)),
            PluginInterface::Raw => Box::new(RawTask::new(spec)),
        };
        Ok(task)
    }
}

/// Read and parse one manifest file
pub async fn load_manifest(path: &Path) -> Result<PluginManifest, ManifestLoadError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(PluginManifest::from_yaml(&content, path)?)
}

/// Whether a path names a manifest file
pub fn is_manifest_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Collect manifest paths under `root`, sorted
async fn find_manifests(root: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let walk_error = |path: &Path, source| LoadError::DirectoryWalk {
        path: path.to_path_buf(),
        source,
    };

    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| walk_error(&dir, e))?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| walk_error(&dir, e))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|e| walk_error(&path, e))?;

            if file_type.is_dir() {
                pending.push(path);
            } else if is_manifest_path(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}
