//! Filesystem watcher keeping the registry in sync with config edits.
//!
//! Watches the repository root recursively and reacts only to events that
//! touch a `.deployer.yml`: creation registers the containing repository,
//! removal unregisters it, and modification re-registers so a changed
//! command or branch takes effect without a restart.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{Event, EventKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::config::CONFIG_FILENAME;
use crate::registry::RepositoryRegistry;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Owns the watcher thread; [`stop`](Self::stop) joins it.
pub struct ConfigWatcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Start watching `root` and applying config events to `registry`.
    pub fn start(root: &Path, registry: Arc<RepositoryRegistry>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())
            .context("Failed to create filesystem watcher")?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        info!(root = %root.display(), "Watching for config changes");

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let handle = std::thread::spawn(move || {
            // The watcher must live as long as the loop; dropping it closes
            // the channel.
            let _watcher = watcher;
            while thread_running.load(Ordering::Relaxed) {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(Ok(event)) => handle_event(&registry, &event),
                    Ok(Err(e)) => warn!(error = %e, "Filesystem watch error"),
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        error!("Filesystem watcher channel closed");
                        break;
                    }
                }
            }
            debug!("Config watcher thread exiting");
        });

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Signal the watcher thread to exit and wait for it.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Apply one filesystem event to the registry.
///
/// Only paths whose file name is the config filename are considered; the
/// affected repository is the parent directory. Modification is handled as
/// unregister-then-register so a config that became invalid drops out of
/// the registry instead of keeping its stale entry.
pub fn handle_event(registry: &RepositoryRegistry, event: &Event) {
    for path in &event.paths {
        let is_config = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == CONFIG_FILENAME);
        if !is_config {
            continue;
        }
        let Some(repo_dir) = path.parent() else {
            continue;
        };

        match event.kind {
            EventKind::Create(_) => {
                info!(path = %path.display(), "Config file created");
                registry.register(repo_dir);
            }
            EventKind::Remove(_) => {
                info!(path = %path.display(), "Config file removed");
                registry.unregister(repo_dir);
            }
            EventKind::Modify(_) => {
                info!(path = %path.display(), "Config file modified");
                registry.unregister(repo_dir);
                registry.register(repo_dir);
            }
            _ => {}
        }
    }
}
