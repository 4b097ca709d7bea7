//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Wait after a modify event before re-reading, so editors finish writing
const RELOAD_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Monitors the config file and yields each successfully validated reload
///
/// Invalid edits are logged and skipped; the previous config stays active.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the initial config and start watching `config_path`
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let (tx, rx) = mpsc::channel(10);

        let initial_config = Arc::new(
            AppConfig::load(&config_path)
                .await
                .context("Failed to load initial config")?,
        );

        // notify callbacks run on their own OS thread, outside the runtime
        let runtime_handle = tokio::runtime::Handle::current();
        let watched_path = config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Config watch error: {}", e);
                    return;
                }
            };

            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            debug!("Config file changed: {:?}", event.paths);

            let path = watched_path.clone();
            let tx = tx.clone();
            runtime_handle.spawn(async move {
                tokio::time::sleep(RELOAD_SETTLE_DELAY).await;

                match AppConfig::load(&path).await {
                    Ok(new_config) => {
                        if tx.send(new_config).await.is_err() {
                            debug!("Config receiver dropped, ignoring reload");
                        }
                    }
                    Err(e) => warn!("Ignoring invalid config edit (keeping old config): {:#}", e),
                }
            });
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("Watching {} for changes", config_path);

        Ok((Self { _watcher: watcher, rx }, initial_config))
    }

    /// Wait for the next valid config; `None` once the watcher is closed
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}
