//! File-backed configuration source
//!
//! One source holds any number of files. Each file has its own priority
//! inside the source (lower wins, ties go to the file added last) and a
//! [`FileHandler`] deciding how its bytes become keys.

mod handler;
mod watcher;

pub use handler::FileHandler;

use super::{diff_snapshots, ConfigSource, UpdateSender, FILE_SOURCE_PRIORITY};
use crate::error::{TesseraError, TesseraResult};
use crate::event::Event;
use crate::ConfigMap;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use watcher::FileWatcher;

pub const FILE_SOURCE_NAME: &str = "FileSource";
pub const DEFAULT_FILE_PRIORITY: i32 = 0;

#[derive(Debug)]
struct TrackedFile {
    path: PathBuf,
    priority: i32,
    handler: FileHandler,
    seq: u64,
    values: ConfigMap,
}

pub(crate) struct FileSourceInner {
    name: String,
    files: RwLock<Vec<TrackedFile>>,
    merged: RwLock<ConfigMap>,
    next_seq: AtomicU64,
}

impl FileSourceInner {
    fn is_tracked(&self, path: &Path) -> bool {
        self.files.read().iter().any(|f| f.path == path)
    }

    /// Re-read one tracked file. A vanished file contributes nothing until
    /// it reappears; a file that no longer parses keeps its last good values.
    async fn reload_path(&self, path: &Path) {
        let handler = match self.files.read().iter().find(|f| f.path == path) {
            Some(f) => f.handler.clone(),
            None => return,
        };
        let values = match tokio::fs::read(path).await {
            Ok(bytes) => match handler.handle(path, &bytes) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = %path.display(), "keeping previous values: {}", e);
                    return;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "configuration file removed");
                ConfigMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), "failed to read configuration file: {}", e);
                return;
            }
        };
        if let Some(file) = self.files.write().iter_mut().find(|f| f.path == path) {
            file.values = values;
        }
    }

    fn upsert(&self, path: PathBuf, priority: i32, handler: FileHandler, values: ConfigMap) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut files = self.files.write();
        match files.iter_mut().find(|f| f.path == path) {
            Some(existing) => {
                existing.priority = priority;
                existing.handler = handler;
                existing.values = values;
                existing.seq = seq;
            }
            None => files.push(TrackedFile {
                path,
                priority,
                handler,
                seq,
                values,
            }),
        }
    }

    fn merge_files(&self) -> ConfigMap {
        let files = self.files.read();
        let mut ordered: Vec<&TrackedFile> = files.iter().collect();
        ordered.sort_by_key(|f| (f.priority, Reverse(f.seq)));

        let mut merged = ConfigMap::new();
        for file in ordered {
            for (key, value) in &file.values {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        merged
    }

    /// Rebuild the merged view and return what changed since the last one
    fn recompute(&self) -> Vec<Event> {
        let merged = self.merge_files();
        let mut current = self.merged.write();
        let events = diff_snapshots(&self.name, &current, &merged);
        *current = merged;
        events
    }
}

/// Configuration loaded from local files and directories
pub struct FileSource {
    priority: i32,
    inner: Arc<FileSourceInner>,
    watcher: Mutex<Option<FileWatcher>>,
    updates: Mutex<Option<UpdateSender>>,
}

impl FileSource {
    pub fn new() -> Self {
        Self {
            priority: FILE_SOURCE_PRIORITY,
            inner: Arc::new(FileSourceInner {
                name: FILE_SOURCE_NAME.to_string(),
                files: RwLock::new(Vec::new()),
                merged: RwLock::new(ConfigMap::new()),
                next_seq: AtomicU64::new(0),
            }),
            watcher: Mutex::new(None),
            updates: Mutex::new(None),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a file, or every regular file directly inside a directory.
    ///
    /// A missing path is an error. Adding an already tracked file replaces
    /// its priority and handler and reloads it. When the source is being
    /// watched the resulting changes are pushed immediately; otherwise call
    /// `ConfigManager::refresh`.
    pub async fn add_file(
        &self,
        path: impl AsRef<Path>,
        priority: i32,
        handler: FileHandler,
    ) -> TesseraResult<()> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TesseraError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => TesseraError::IoError(e),
        })?;

        let files = if metadata.is_dir() {
            let mut entries = tokio::fs::read_dir(path).await?;
            let mut files = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    files.push(entry.path());
                }
            }
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut loaded = Vec::with_capacity(files.len());
        for file in files {
            let canonical = tokio::fs::canonicalize(&file).await?;
            let bytes = tokio::fs::read(&canonical).await?;
            let values = handler.handle(&canonical, &bytes)?;
            debug!(path = %canonical.display(), keys = values.len(), "loaded configuration file");
            loaded.push((canonical, values));
        }

        for (canonical, values) in loaded {
            self.inner
                .upsert(canonical.clone(), priority, handler.clone(), values);
            if let Some(watcher) = self.watcher.lock().as_mut() {
                watcher.watch_file(&canonical)?;
            }
        }

        let events = self.inner.recompute();
        if let Some(updates) = self.updates.lock().as_ref() {
            updates.send(events);
        }
        Ok(())
    }

    /// Tracked files, in the order they were first added
    pub fn files(&self) -> Vec<PathBuf> {
        self.inner.files.read().iter().map(|f| f.path.clone()).collect()
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn configurations(&self) -> TesseraResult<ConfigMap> {
        Ok(self.inner.merged.read().clone())
    }

    fn watch(&self, updates: UpdateSender) -> TesseraResult<()> {
        let mut watcher = FileWatcher::start(self.inner.clone(), updates.clone())?;
        for path in self.files() {
            watcher.watch_file(&path)?;
        }
        *self.watcher.lock() = Some(watcher);
        *self.updates.lock() = Some(updates);
        Ok(())
    }

    async fn cleanup(&self) -> TesseraResult<()> {
        self.updates.lock().take();
        let watcher = self.watcher.lock().take();
        if let Some(mut watcher) = watcher {
            watcher.stop().await;
        }
        self.inner.files.write().clear();
        self.inner.merged.write().clear();
        Ok(())
    }
}
