//! The configuration manager
//!
//! [`ConfigManager`] owns the registered sources, the effective map and the
//! listener registry. Every change (a source added, removed or refreshed, a
//! pushed update, a `set`/`delete`) runs as one merge cycle under a single
//! async mutex, so cycles never interleave and each cycle's events are fully
//! dispatched before the next diff is computed. Readers only take the
//! effective map's read lock.
//!
//! Snapshot pulls happen outside the merge lock. Each pull is stamped with a
//! generation before it starts and a snapshot is only stored if nothing
//! newer has been stored for that source since. Pushed updates take a
//! generation too, so neither a concurrent refresh nor one that raced a push
//! can roll a source back.

mod merge;

pub use merge::SourcedValue;

use crate::error::{TesseraError, TesseraResult};
use crate::event::{Dispatcher, KeyMatcher, Listener, ModuleListener};
use crate::observability;
use crate::source::{ConfigSource, SourceUpdate, UpdateSender};
use crate::tree::{self, UnmarshalReport};
use crate::util::concurrent_try_map;
use crate::{ConfigMap, ConfigValue};
use merge::{EffectiveMap, SourceEntry};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Sources torn down in parallel during cleanup
const CLEANUP_CONCURRENCY: usize = 8;

struct MergeState {
    sources: Vec<SourceEntry>,
}

struct ManagerInner {
    merge: Mutex<MergeState>,
    effective: RwLock<EffectiveMap>,
    dispatcher: Dispatcher,
    closed: AtomicBool,
    next_seq: AtomicU64,
    next_pull: AtomicU64,
    updates_tx: mpsc::UnboundedSender<SourceUpdate>,
    updates_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SourceUpdate>>>,
    drain_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.drain_task.get_mut().take() {
            handle.abort();
        }
    }
}

impl ManagerInner {
    fn ensure_open(&self) -> TesseraResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TesseraError::ManagerClosed);
        }
        Ok(())
    }

    /// Resolve, diff against the previous effective map and dispatch.
    /// Callers hold the merge lock.
    fn merge_cycle(&self, state: &MergeState, trigger: &str) {
        let span = observability::merge_span(trigger);
        let _guard = span.enter();
        let resolved = merge::resolve(&state.sources);
        let events = {
            let mut effective = self.effective.write();
            let events = merge::diff(&effective, &resolved);
            *effective = resolved;
            events
        };
        span.record("events", events.len());
        if events.is_empty() {
            return;
        }
        debug!(count = events.len(), "merge cycle produced events");
        self.dispatcher.dispatch(&events);
    }

    async fn apply_update(&self, update: SourceUpdate) {
        let mut state = self.merge.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            debug!(source = %update.source, "discarding update after cleanup");
            return;
        }
        let Some(entry) = state.sources.iter_mut().find(|e| e.name == update.source) else {
            debug!(source = %update.source, "discarding update from unregistered source");
            return;
        };
        entry.apply(&update.events);
        // a pull that started before this push must not overwrite it
        entry.pulled_at = self.next_pull.fetch_add(1, Ordering::SeqCst) + 1;
        self.merge_cycle(&state, "push");
    }

    /// Pull `source` outside the merge lock
    async fn pull(&self, source: &dyn ConfigSource) -> TesseraResult<(u64, ConfigMap)> {
        let generation = self.next_pull.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = source
            .configurations()
            .instrument(observability::source_span("pull", source.name()))
            .await?;
        Ok((generation, snapshot))
    }
}

/// Merges prioritized configuration sources into one key space.
///
/// Lower priority numbers win; among equal priorities the source added
/// last wins.
pub struct ConfigManager {
    inner: Arc<ManagerInner>,
}

impl ConfigManager {
    pub fn new() -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ManagerInner {
                merge: Mutex::new(MergeState {
                    sources: Vec::new(),
                }),
                effective: RwLock::new(EffectiveMap::new()),
                dispatcher: Dispatcher::new(),
                closed: AtomicBool::new(false),
                next_seq: AtomicU64::new(0),
                next_pull: AtomicU64::new(0),
                updates_tx,
                updates_rx: parking_lot::Mutex::new(Some(updates_rx)),
                drain_task: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Start draining pushed updates; the first watching source triggers it
    fn ensure_drain_task(&self) {
        let Some(mut rx) = self.inner.updates_rx.lock().take() else {
            return;
        };
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.apply_update(update).await;
            }
            debug!("update drain task finished");
        });
        *self.inner.drain_task.lock() = Some(handle);
    }

    /// Register `source`, pull it and merge it in.
    ///
    /// Fails if a source with the same name is registered or the initial
    /// pull fails; in both cases nothing is registered. A source that can
    /// push gets its update channel once it is registered.
    pub async fn add_source(&self, source: Arc<dyn ConfigSource>) -> TesseraResult<()> {
        self.inner.ensure_open()?;
        let name = source.name().to_string();
        if self.has_source(&name).await {
            return Err(TesseraError::SourceAlreadyExists { name });
        }

        let (generation, snapshot) = self.inner.pull(source.as_ref()).await?;

        let mut state = self.inner.merge.lock().await;
        self.inner.ensure_open()?;
        if state.sources.iter().any(|e| e.name == name) {
            return Err(TesseraError::SourceAlreadyExists { name });
        }
        let keys = snapshot.len();
        state.sources.push(SourceEntry {
            source: source.clone(),
            name: name.clone(),
            priority: source.priority(),
            seq: self.inner.next_seq.fetch_add(1, Ordering::SeqCst),
            pulled_at: generation,
            snapshot,
        });
        self.inner.merge_cycle(&state, "add_source");

        match source.watch(UpdateSender::new(name.clone(), self.inner.updates_tx.clone())) {
            Ok(()) => {
                self.ensure_drain_task();
                debug!(source = %name, "source is watched");
            }
            Err(TesseraError::WatchUnsupported { .. }) => {}
            Err(e) => warn!(source = %name, "watch failed, source is pull-only: {}", e),
        }
        info!(source = %name, priority = source.priority(), keys, "added configuration source");
        Ok(())
    }

    /// Unregister a source; keys it won fall back to lower sources or are deleted.
    ///
    /// The source itself is left running; the caller owns its cleanup.
    pub async fn remove_source(&self, name: &str) -> TesseraResult<()> {
        self.inner.ensure_open()?;
        let mut state = self.inner.merge.lock().await;
        let index = state
            .sources
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| TesseraError::source_not_found(name))?;
        state.sources.remove(index);
        self.inner.merge_cycle(&state, "remove_source");
        info!(source = %name, "removed configuration source");
        Ok(())
    }

    /// Re-pull one source and merge the result
    pub async fn refresh(&self, name: &str) -> TesseraResult<()> {
        self.inner.ensure_open()?;
        let source = self
            .source(name)
            .await
            .ok_or_else(|| TesseraError::source_not_found(name))?;

        let (generation, snapshot) = self.inner.pull(source.as_ref()).await?;

        let mut state = self.inner.merge.lock().await;
        self.inner.ensure_open()?;
        let entry = state
            .sources
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| TesseraError::source_not_found(name))?;
        if generation < entry.pulled_at {
            debug!(source = %name, "dropping stale snapshot");
            return Ok(());
        }
        entry.pulled_at = generation;
        entry.snapshot = snapshot;
        self.inner.merge_cycle(&state, "refresh");
        Ok(())
    }

    pub async fn source(&self, name: &str) -> Option<Arc<dyn ConfigSource>> {
        let state = self.inner.merge.lock().await;
        state
            .sources
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.source.clone())
    }

    pub async fn has_source(&self, name: &str) -> bool {
        self.source(name).await.is_some()
    }

    /// Registered source names, highest precedence first
    pub async fn source_names(&self) -> Vec<String> {
        let state = self.inner.merge.lock().await;
        merge::by_precedence(&state.sources)
            .into_iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn get_config(&self, key: &str) -> Option<ConfigValue> {
        self.inner.effective.read().get(key).map(|v| v.value.clone())
    }

    pub fn is_key_exist(&self, key: &str) -> bool {
        self.inner.effective.read().contains_key(key)
    }

    pub fn configs(&self) -> ConfigMap {
        self.inner
            .effective
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    pub fn configs_with_source_names(&self) -> BTreeMap<String, SourcedValue> {
        self.inner.effective.read().clone()
    }

    /// Highest-precedence source that accepts writes
    async fn writable_source(&self) -> TesseraResult<Arc<dyn ConfigSource>> {
        let state = self.inner.merge.lock().await;
        merge::by_precedence(&state.sources)
            .into_iter()
            .find(|e| e.source.as_writable().is_some())
            .map(|e| e.source.clone())
            .ok_or(TesseraError::NoWritableSource)
    }

    /// Write `key` into the highest-precedence writable source and re-merge
    pub async fn set(&self, key: &str, value: ConfigValue) -> TesseraResult<()> {
        self.inner.ensure_open()?;
        let source = self.writable_source().await?;
        source
            .as_writable()
            .ok_or(TesseraError::NoWritableSource)?
            .set(key, value)?;
        self.refresh(source.name()).await
    }

    pub async fn delete(&self, key: &str) -> TesseraResult<()> {
        self.inner.ensure_open()?;
        let source = self.writable_source().await?;
        source
            .as_writable()
            .ok_or(TesseraError::NoWritableSource)?
            .delete(key)?;
        self.refresh(source.name()).await
    }

    /// Populate `target` from the effective configuration; see
    /// [`tree::unmarshal_into`] for how mismatches are reported
    pub fn unmarshal<T>(&self, target: &mut T) -> TesseraResult<UnmarshalReport>
    where
        T: Serialize + DeserializeOwned,
    {
        tree::unmarshal_into(target, &self.configs())
    }

    /// Write the effective configuration as a nested YAML document
    pub fn marshal<W: Write>(&self, writer: W) -> TesseraResult<()> {
        serde_yaml::to_writer(writer, &tree::nest(&self.configs()))
            .map_err(|e| TesseraError::serialization("marshal", e))
    }

    pub fn register_listener(&self, listener: Arc<dyn Listener>, keys: &[&str]) -> TesseraResult<()> {
        self.inner.ensure_open()?;
        self.inner.dispatcher.register_listener(listener, keys)
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn Listener>, keys: &[&str]) -> TesseraResult<()> {
        self.inner.dispatcher.unregister_listener(listener, keys)
    }

    /// Register with an explicit matcher, e.g. [`KeyMatcher::prefix`]
    pub fn register_matcher(&self, listener: Arc<dyn Listener>, matcher: KeyMatcher) -> TesseraResult<()> {
        self.inner.ensure_open()?;
        self.inner.dispatcher.register_matcher(listener, matcher);
        Ok(())
    }

    pub fn unregister_matcher(&self, listener: &Arc<dyn Listener>, matcher: &KeyMatcher) {
        self.inner.dispatcher.unregister_matcher(listener, matcher)
    }

    pub fn register_module_listener(
        &self,
        listener: Arc<dyn ModuleListener>,
        prefixes: &[&str],
    ) -> TesseraResult<()> {
        self.inner.ensure_open()?;
        self.inner.dispatcher.register_module_listener(listener, prefixes)
    }

    pub fn unregister_module_listener(&self, listener: &Arc<dyn ModuleListener>, prefixes: &[&str]) {
        self.inner.dispatcher.unregister_module_listener(listener, prefixes)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Tear everything down. Every source's cleanup runs even if some fail;
    /// the first failure is returned. Calling it again is a no-op.
    pub async fn cleanup(&self) -> TesseraResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sources: Vec<Arc<dyn ConfigSource>> = {
            let mut state = self.inner.merge.lock().await;
            let sources = state.sources.drain(..).map(|e| e.source).collect();
            self.inner.effective.write().clear();
            self.inner.dispatcher.clear();
            sources
        };
        if let Some(handle) = self.inner.drain_task.lock().take() {
            handle.abort();
        }

        let (_, errors) = concurrent_try_map(sources, CLEANUP_CONCURRENCY, |source| async move {
            let name = source.name().to_string();
            source.cleanup().await.map_err(|e| (name, e))
        })
        .await;

        info!(failed = errors.len(), "configuration manager cleaned up");
        let mut first = None;
        for (name, error) in errors {
            warn!(source = %name, "source cleanup failed: {}", error);
            first.get_or_insert(error);
        }
        first.map_or(Ok(()), Err)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
