//! Config directory change notifications.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
#[error("failed to watch {path}: {source}")]
pub struct WatchError {
    path: PathBuf,
    #[source]
    source: notify::Error,
}

/// Yields `()` once per burst of filesystem changes under a directory.
pub struct DirWatcher {
    _watcher: Option<RecommendedWatcher>,
    debouncer: Option<JoinHandle<()>>,
    changes: mpsc::Receiver<()>,
}

impl DirWatcher {
    /// Watch `dir` recursively. Changes closer together than `debounce` are
    /// reported once.
    pub fn watch(dir: &Path, debounce: Duration) -> Result<Self, WatchError> {
        let (raw_tx, raw_rx) = mpsc::channel::<()>(64);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        let _ = raw_tx.try_send(());
                    }
                }
                Err(err) => error!("config watcher error: {err}"),
            },
            notify::Config::default(),
        )
        .map_err(|source| WatchError {
            path: dir.to_path_buf(),
            source,
        })?;

        watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|source| WatchError {
                path: dir.to_path_buf(),
                source,
            })?;
        debug!("watching {} for changes", dir.display());

        let (tx, changes) = mpsc::channel(1);
        let debouncer = tokio::spawn(debounce_changes(raw_rx, tx, debounce));

        Ok(Self {
            _watcher: Some(watcher),
            debouncer: Some(debouncer),
            changes,
        })
    }

    /// Wrap an existing change stream.
    pub fn from_receiver(changes: mpsc::Receiver<()>) -> Self {
        Self {
            _watcher: None,
            debouncer: None,
            changes,
        }
    }

    /// Next change, or `None` once the watcher has shut down. Cancel-safe.
    pub async fn changed(&mut self) -> Option<()> {
        self.changes.recv().await
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.debouncer.take() {
            task.abort();
        }
    }
}

async fn debounce_changes(mut raw: mpsc::Receiver<()>, out: mpsc::Sender<()>, window: Duration) {
    while raw.recv().await.is_some() {
        tokio::time::sleep(window).await;
        while raw.try_recv().is_ok() {}
        // A change already waiting to be picked up covers this burst too.
        if let Err(mpsc::error::TrySendError::Closed(_)) = out.try_send(()) {
            break;
        }
    }
}
