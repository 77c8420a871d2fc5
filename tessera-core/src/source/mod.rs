//! Configuration source contract and the built-in sources
//!
//! A source is a named, prioritized provider of key/value pairs. The manager
//! pulls full snapshots from it and, when the source supports watching,
//! receives pushed change events through an [`UpdateSender`].
//!
//! Lower priority numbers win. The built-in defaults are:
//!
//! | Source | Priority |
//! |---|---|
//! | remote config center | 0 |
//! | memory | 1 |
//! | command line | 2 |
//! | environment | 3 |
//! | files | 4 |

pub mod cli;
pub mod env;
pub mod file;
pub mod memory;
pub mod remote;

pub use cli::CommandLineSource;
pub use env::EnvSource;
pub use file::{FileHandler, FileSource};
pub use memory::MemorySource;

use crate::error::{TesseraError, TesseraResult};
use crate::event::Event;
use crate::{ConfigMap, ConfigValue};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub const REMOTE_SOURCE_PRIORITY: i32 = 0;
pub const MEMORY_SOURCE_PRIORITY: i32 = 1;
pub const COMMAND_LINE_SOURCE_PRIORITY: i32 = 2;
pub const ENV_SOURCE_PRIORITY: i32 = 3;
pub const FILE_SOURCE_PRIORITY: i32 = 4;

/// Changes pushed by a watching source
#[derive(Debug, Clone)]
pub struct SourceUpdate {
    pub source: String,
    pub events: Vec<Event>,
}

/// Handle a source uses to push its own changes into the manager's merge loop
#[derive(Debug, Clone)]
pub struct UpdateSender {
    source: String,
    tx: mpsc::UnboundedSender<SourceUpdate>,
}

impl UpdateSender {
    pub fn new(source: impl Into<String>, tx: mpsc::UnboundedSender<SourceUpdate>) -> Self {
        Self {
            source: source.into(),
            tx,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source
    }

    /// Returns false once the receiving manager is gone
    pub fn send(&self, events: Vec<Event>) -> bool {
        if events.is_empty() {
            return true;
        }
        self.tx
            .send(SourceUpdate {
                source: self.source.clone(),
                events,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Capability implemented by every configuration provider
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Unique name within one manager
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    /// Full current snapshot
    async fn configurations(&self) -> TesseraResult<ConfigMap>;

    async fn configuration_by_key(&self, key: &str) -> TesseraResult<ConfigValue> {
        self.configurations()
            .await?
            .remove(key)
            .ok_or_else(|| TesseraError::key_not_found(key))
    }

    /// Install the push channel. Sources that never change on their own
    /// return [`TesseraError::WatchUnsupported`].
    fn watch(&self, updates: UpdateSender) -> TesseraResult<()> {
        let _ = updates;
        Err(TesseraError::watch_unsupported(self.name()))
    }

    async fn cleanup(&self) -> TesseraResult<()>;

    /// Writable override sources expose themselves here for `set`/`delete`
    fn as_writable(&self) -> Option<&dyn WritableSource> {
        None
    }
}

/// In-process mutable overrides
pub trait WritableSource: Send + Sync {
    fn set(&self, key: &str, value: ConfigValue) -> TesseraResult<()>;
    fn delete(&self, key: &str) -> TesseraResult<()>;
}

/// Diff two snapshots of the same source into change events
pub fn diff_snapshots(source: &str, old: &ConfigMap, new: &ConfigMap) -> Vec<Event> {
    let mut events = Vec::new();
    for (key, value) in new {
        match old.get(key) {
            None => events.push(Event::create(key.clone(), value.clone(), source)),
            Some(prev) if prev != value => {
                events.push(Event::update(key.clone(), value.clone(), source))
            }
            Some(_) => {}
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            events.push(Event::delete(key.clone(), source));
        }
    }
    events
}
