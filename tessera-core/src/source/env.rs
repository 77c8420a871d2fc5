//! Process environment source

use super::{ConfigSource, ENV_SOURCE_PRIORITY};
use crate::error::TesseraResult;
use crate::{ConfigMap, ConfigValue};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

pub const ENV_SOURCE_NAME: &str = "EnvironmentSource";

/// Snapshot of the process environment, taken at construction.
///
/// With [`EnvSource::translate_keys`] every `FOO_BAR` variable is also
/// exposed as `foo.bar`, so environment variables can shadow file keys.
#[derive(Debug)]
pub struct EnvSource {
    priority: i32,
    prefix: Option<String>,
    translate: bool,
    values: RwLock<ConfigMap>,
}

impl EnvSource {
    pub fn new() -> Self {
        let source = Self {
            priority: ENV_SOURCE_PRIORITY,
            prefix: None,
            translate: false,
            values: RwLock::new(ConfigMap::new()),
        };
        source.reload();
        source
    }

    /// Only keep variables starting with `prefix` followed by `_`; both are
    /// stripped. A prefix that already ends in `_` is used as is.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self.reload();
        self
    }

    pub fn translate_keys(mut self, translate: bool) -> Self {
        self.translate = translate;
        self.reload();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Re-read the environment; follow with `ConfigManager::refresh`
    pub fn reload(&self) {
        let values = collect(process_vars(), self.prefix.as_deref(), self.translate);
        *self.values.write() = values;
    }
}

/// Environment variables with UTF-8 names and values; others are skipped
fn process_vars() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                debug!(key = ?key, "skipping environment variable that is not valid UTF-8");
                None
            }
        })
        .collect()
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

fn translated(key: &str) -> String {
    key.to_lowercase().replace('_', ".")
}

fn strip_env_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    let rest = if prefix.ends_with('_') {
        rest
    } else {
        rest.strip_prefix('_')?
    };
    (!rest.is_empty()).then_some(rest)
}

fn collect<I>(vars: I, prefix: Option<&str>, translate: bool) -> ConfigMap
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut values = ConfigMap::new();
    for (key, value) in vars {
        let key = match prefix {
            Some(p) => match strip_env_prefix(&key, p) {
                Some(rest) => rest.to_string(),
                None => continue,
            },
            None => key,
        };
        if translate {
            let alias = translated(&key);
            if alias != key {
                values
                    .entry(alias)
                    .or_insert_with(|| ConfigValue::String(value.clone()));
            }
        }
        values.insert(key, ConfigValue::String(value));
    }
    values
}

#[async_trait]
impl ConfigSource for EnvSource {
    fn name(&self) -> &str {
        ENV_SOURCE_NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn configurations(&self) -> TesseraResult<ConfigMap> {
        Ok(self.values.read().clone())
    }

    async fn cleanup(&self) -> TesseraResult<()> {
        self.values.write().clear();
        Ok(())
    }
}
