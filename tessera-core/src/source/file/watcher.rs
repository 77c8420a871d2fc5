//! File system watching for the file source
//!
//! `notify` delivers events on its own thread; they are forwarded over a
//! channel to a tokio task which reloads the affected files and pushes the
//! resulting key changes to the manager.

use super::FileSourceInner;
use crate::error::{TesseraError, TesseraResult};
use crate::source::UpdateSender;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub(super) struct FileWatcher {
    watcher: RecommendedWatcher,
    watched_dirs: HashSet<PathBuf>,
    shutdown_tx: mpsc::Sender<()>,
    task_handle: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub(super) fn start(inner: Arc<FileSourceInner>, updates: UpdateSender) -> TesseraResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| TesseraError::Watcher {
            message: format!("file watching needs a tokio runtime: {}", e),
        })?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let watcher = notify::recommended_watcher(move |event: Result<Event, notify::Error>| {
            match event {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => warn!("file watcher error: {}", e),
            }
        })
        .map_err(|e| TesseraError::Watcher {
            message: format!("Failed to create file watcher: {}", e),
        })?;

        let task_handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = event_rx.recv() => {
                        if !is_config_change_event(&event) {
                            continue;
                        }
                        let mut changed = false;
                        for path in &event.paths {
                            if inner.is_tracked(path) {
                                inner.reload_path(path).await;
                                changed = true;
                            }
                        }
                        if !changed {
                            continue;
                        }
                        let events = inner.recompute();
                        if events.is_empty() {
                            continue;
                        }
                        debug!(count = events.len(), "file change produced events");
                        if !updates.send(events) {
                            info!("manager gone, file watcher exiting");
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("file watcher shutting down");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            watcher,
            watched_dirs: HashSet::new(),
            shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    /// Watch the directory holding `file`, so atomic replaces and
    /// re-creations are seen as well as in-place writes
    pub(super) fn watch_file(&mut self, file: &Path) -> TesseraResult<()> {
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| TesseraError::Watcher {
                message: format!("Invalid file path: {}", file.display()),
            })?;
        if self.watched_dirs.contains(&dir) {
            return Ok(());
        }
        self.watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| TesseraError::Watcher {
                message: format!("Failed to watch {}: {}", dir.display(), e),
            })?;
        debug!(dir = %dir.display(), "watching directory");
        self.watched_dirs.insert(dir);
        Ok(())
    }

    pub(super) async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

fn is_config_change_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}
