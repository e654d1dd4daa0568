//! Plugin Directory Watcher
//!
//! Watches the plugin directory and reloads the cache when a manifest is
//! created, modified or removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use plugin_runtime::{is_manifest_path, PluginCache};

/// Quiet period after a change before reloading
const DEBOUNCE: Duration = Duration::from_millis(250);

pub struct PluginWatcher {
    plugins_dir: PathBuf,
    cache: Arc<PluginCache>,
    rx: mpsc::Receiver<PathBuf>,
    /// The underlying watcher (kept alive)
    _watcher: RecommendedWatcher,
}

impl PluginWatcher {
    pub fn new(plugins_dir: impl AsRef<Path>, cache: Arc<PluginCache>) -> Result<Self, notify::Error> {
        let plugins_dir = plugins_dir
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| plugins_dir.as_ref().to_path_buf());
        let (tx, rx) = mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if let Some(path) = Self::manifest_change(&event) {
                    let _ = tx.blocking_send(path);
                }
            }
            Err(e) => {
                error!("File watcher error: {}", e);
            }
        })?;

        watcher.watch(&plugins_dir, RecursiveMode::Recursive)?;
        info!("Watching plugin directory: {}", plugins_dir.display());

        Ok(Self {
            plugins_dir,
            cache,
            rx,
            _watcher: watcher,
        })
    }

    /// The manifest path an event touches, if it is one we reload on
    fn manifest_change(event: &Event) -> Option<PathBuf> {
        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {}
            _ => return None,
        }

        event.paths.iter().find(|path| is_manifest_path(path)).cloned()
    }

    /// Run the watcher loop
    pub async fn run(mut self) {
        while let Some(path) = self.rx.recv().await {
            debug!("Plugin manifest changed: {}", path.display());

            // Coalesce a burst of events into a single reload
            tokio::time::sleep(DEBOUNCE).await;
            while self.rx.try_recv().is_ok() {}

            match self.cache.load(&self.plugins_dir).await {
                Ok(count) => info!("Reloaded {} plugins", count),
                Err(e) => warn!("Failed to reload plugins: {}", e),
            }
        }

        info!("Plugin watcher loop ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    #[test]
    fn test_only_manifest_changes_reload() {
        let manifest = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/plugins/scan/scan.yml"));
        assert_eq!(
            PluginWatcher::manifest_change(&manifest),
            Some(PathBuf::from("/plugins/scan/scan.yml"))
        );

        let script = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/plugins/scan/scan.js"));
        assert_eq!(PluginWatcher::manifest_change(&script), None);

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/plugins/scan/scan.yaml"));
        assert_eq!(PluginWatcher::manifest_change(&access), None);
    }

    #[tokio::test]
    async fn test_reload_on_new_manifest() {
        let temp = tempfile::TempDir::new().unwrap();
        let cache = Arc::new(PluginCache::default());
        cache.load(temp.path()).await.unwrap();

        let watcher = PluginWatcher::new(temp.path(), Arc::clone(&cache)).unwrap();
        tokio::spawn(watcher.run());

        std::fs::write(temp.path().join("late.yml"), "name: Late\n").unwrap();

        let mut found = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if cache.get("late").is_some() {
                found = true;
                break;
            }
        }
        assert!(found, "watcher should pick up the new manifest");
    }
}
