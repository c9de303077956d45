//! CA key material lifecycle: load, atomic swap, file-watch reload.

use crate::config::{CaStoreConfig, ReloadConfig};
use crate::error::{CertmintError, Result};
use crate::keystore;
use arc_swap::ArcSwapOption;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::material::KeyMaterialSnapshot;

/// Owns the CA's signing identity.
///
/// The current snapshot lives behind a single atomic reference: `load`
/// replaces it wholesale on success and leaves it untouched on failure, so
/// readers either see the last fully-loaded identity or `None` when no load
/// has ever succeeded. A mix of old certificate and new key is not
/// representable.
pub struct CaMaterialManager {
    store: CaStoreConfig,
    reload: ReloadConfig,
    snapshot: ArcSwapOption<KeyMaterialSnapshot>,
    watcher_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CaMaterialManager {
    pub fn new(store: CaStoreConfig, reload: ReloadConfig) -> Self {
        Self {
            store,
            reload,
            snapshot: ArcSwapOption::from(None),
            watcher_task: parking_lot::Mutex::new(None),
        }
    }

    /// Read and decode the CA store, swapping in a fresh snapshot.
    ///
    /// The swap happens only after the entry decoded cleanly and passed the
    /// key/certificate correspondence check. On any failure the previous
    /// snapshot stays current and the error is returned for the caller to
    /// log or surface.
    pub async fn load(&self) -> Result<Arc<KeyMaterialSnapshot>> {
        let path = &self.store.path;
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| CertmintError::KeyStore {
                reason: format!("failed to read CA key store {}: {}", path.display(), e),
            })?;

        let document = keystore::decode_store(&data, &self.store.password)?;
        let entry = document.entries.get(&self.store.alias).ok_or_else(|| {
            CertmintError::MalformedKeyMaterial {
                reason: format!(
                    "alias '{}' not present in CA key store {}",
                    self.store.alias,
                    path.display()
                ),
            }
        })?;

        let snapshot = Arc::new(KeyMaterialSnapshot::from_store_entry(
            &self.store.alias,
            entry,
        )?);
        self.snapshot.store(Some(snapshot.clone()));
        info!(
            "CA key material loaded: subject '{}', fingerprint {}",
            snapshot.subject, snapshot.fingerprint
        );
        Ok(snapshot)
    }

    /// Latest fully-loaded snapshot, or `None` if no load ever succeeded.
    pub fn current(&self) -> Option<Arc<KeyMaterialSnapshot>> {
        self.snapshot.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.load().is_some()
    }

    /// Start the background watcher on the store file's parent directory.
    ///
    /// Each change event matching the store file name triggers a bounded
    /// reload cycle: sleep the configured delay, attempt `load`, stop on the
    /// first success or after `max_attempts`. The task holds only a weak
    /// reference back to the manager and exits once the manager is dropped.
    pub fn watch(self: Arc<Self>) -> Result<()> {
        let mut task_slot = self.watcher_task.lock();
        if task_slot.is_some() {
            debug!("CA key store watcher already running");
            return Ok(());
        }

        let path = self.store.path.clone();
        let file_name = path
            .file_name()
            .ok_or_else(|| CertmintError::FileWatch {
                reason: format!("CA key store path {} has no file name", path.display()),
            })?
            .to_os_string();
        let parent: PathBuf = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| CertmintError::FileWatch {
            reason: format!("failed to create file watcher: {}", e),
        })?;
        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| CertmintError::FileWatch {
                reason: format!("failed to watch {}: {}", parent.display(), e),
            })?;

        let weak: Weak<CaMaterialManager> = Arc::downgrade(&self);
        let max_attempts = self.reload.max_attempts;
        let delay = Duration::from_millis(self.reload.retry_delay_ms);

        let task = tokio::spawn(async move {
            // The watcher must outlive its event stream; it stops when this
            // task ends.
            let _watcher = watcher;
            while let Some(event) = rx.recv().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("CA key store watch error: {}", e);
                        continue;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }
                if !event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()))
                {
                    continue;
                }

                let Some(manager) = weak.upgrade() else {
                    break;
                };
                info!(
                    "CA key store file changed, reloading (up to {} attempts)",
                    max_attempts
                );
                for attempt in 1..=max_attempts {
                    tokio::time::sleep(delay).await;
                    match manager.load().await {
                        Ok(snapshot) => {
                            info!(
                                "CA key material reloaded on attempt {}: subject '{}'",
                                attempt, snapshot.subject
                            );
                            break;
                        }
                        Err(e) if attempt == max_attempts => {
                            error!(
                                "CA key store reload failed after {} attempts, keeping previous snapshot: {}",
                                max_attempts, e
                            );
                        }
                        Err(e) => {
                            warn!("CA key store reload attempt {} failed: {}", attempt, e);
                        }
                    }
                }
            }
            debug!("CA key store watcher task exited");
        });

        *task_slot = Some(task);
        info!("CA key store watcher started on {}", parent.display());
        Ok(())
    }
}

impl Drop for CaMaterialManager {
    fn drop(&mut self) {
        if let Some(task) = self.watcher_task.lock().take() {
            task.abort();
        }
    }
}
