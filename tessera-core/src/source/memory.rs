//! In-memory override source

use super::{ConfigSource, WritableSource, MEMORY_SOURCE_PRIORITY};
use crate::error::{TesseraError, TesseraResult};
use crate::{ConfigMap, ConfigValue};
use async_trait::async_trait;
use parking_lot::RwLock;

pub const MEMORY_SOURCE_NAME: &str = "MemorySource";

/// Runtime overrides set through the manager's `set`/`delete`.
///
/// Mutating it directly does not notify anyone; call
/// `ConfigManager::refresh` afterwards.
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    priority: i32,
    values: RwLock<ConfigMap>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::with_values(ConfigMap::new())
    }

    pub fn with_values(values: ConfigMap) -> Self {
        Self {
            name: MEMORY_SOURCE_NAME.to_string(),
            priority: MEMORY_SOURCE_PRIORITY,
            values: RwLock::new(values),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn configurations(&self) -> TesseraResult<ConfigMap> {
        Ok(self.values.read().clone())
    }

    async fn configuration_by_key(&self, key: &str) -> TesseraResult<ConfigValue> {
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| TesseraError::key_not_found(key))
    }

    async fn cleanup(&self) -> TesseraResult<()> {
        self.values.write().clear();
        Ok(())
    }

    fn as_writable(&self) -> Option<&dyn WritableSource> {
        Some(self)
    }
}

impl WritableSource for MemorySource {
    fn set(&self, key: &str, value: ConfigValue) -> TesseraResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> TesseraResult<()> {
        self.values
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| TesseraError::key_not_found(key))
    }
}
