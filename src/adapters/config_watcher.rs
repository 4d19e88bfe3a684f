//! Reload the gateway when its config file is edited on disk.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use eyre::{Result, WrapErr};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::core::Gateway;

/// Quiet period after a change before reloading; editors often write a file
/// in several steps.
const SETTLE: Duration = Duration::from_millis(250);

/// Watches the directory holding a config file for changes to that file.
pub struct ConfigWatcher {
    path: PathBuf,
    // Dropping the watcher stops notifications.
    _watcher: notify::RecommendedWatcher,
    changes: mpsc::Receiver<()>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (tx, changes) = mpsc::channel(1);
        let file_name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid config path {}", path.display()))?
            .to_owned();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(file_name.as_os_str()))
                        {
                            tracing::debug!("Config file changed: {:?}", event.kind);
                            // A pending signal already covers this change.
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!("File watch error: {:?}", e),
                }
            })?;

        let watch_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err("Failed to watch config directory")?;

        Ok(Self {
            path,
            _watcher: watcher,
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next change, folding bursts into one. `None` once the
    /// watcher has shut down.
    pub async fn changed(&mut self) -> Option<()> {
        self.changes.recv().await?;
        tokio::time::sleep(SETTLE).await;
        while self.changes.try_recv().is_ok() {}
        Some(())
    }

    /// Reload `gateway` after every change until the watcher shuts down.
    /// Failed reloads keep the current instance live.
    pub async fn reload_on_change(mut self, gateway: Arc<Gateway>) {
        tracing::info!(path = %self.path.display(), "Watching config file for changes");
        while self.changed().await.is_some() {
            match gateway.reload().await {
                Ok(generation) => {
                    tracing::info!(generation, "Reloaded config after file change");
                }
                Err(e) => tracing::error!("Config reload after file change failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_change_is_signalled() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("config.json");
        std::fs::write(&file_path, "{}")?;

        let mut watcher = ConfigWatcher::new(&file_path)?;
        assert_eq!(watcher.path(), file_path.as_path());

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&file_path, r#"{"LastUpdated": 1}"#)?;

        let notification = tokio::time::timeout(Duration::from_secs(5), watcher.changed()).await;
        assert_eq!(notification.ok().flatten(), Some(()));
        Ok(())
    }
}
