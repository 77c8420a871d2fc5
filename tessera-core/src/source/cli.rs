//! Command-line argument source

use super::{ConfigSource, COMMAND_LINE_SOURCE_PRIORITY};
use crate::error::TesseraResult;
use crate::{ConfigMap, ConfigValue};
use async_trait::async_trait;
use parking_lot::RwLock;

pub const COMMAND_LINE_SOURCE_NAME: &str = "CommandlineSource";

/// Key/value pairs taken from process arguments.
///
/// Accepted shapes: `--key=value`, `-k=value`, `--key value` and a bare
/// `--flag`, which is recorded as `true`. Positional arguments are ignored.
#[derive(Debug)]
pub struct CommandLineSource {
    priority: i32,
    values: RwLock<ConfigMap>,
}

impl CommandLineSource {
    /// Parse the current process arguments, skipping the program name
    pub fn new() -> Self {
        Self::from_args(std::env::args().skip(1))
    }

    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            priority: COMMAND_LINE_SOURCE_PRIORITY,
            values: RwLock::new(parse_args(args)),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for CommandLineSource {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_dashes(arg: &str) -> Option<&str> {
    let stripped = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))?;
    if stripped.is_empty() || stripped.starts_with('-') {
        None
    } else {
        Some(stripped)
    }
}

pub(crate) fn parse_args<I, S>(args: I) -> ConfigMap
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let mut values = ConfigMap::new();
    let mut i = 0;
    while i < args.len() {
        let Some(flag) = strip_dashes(&args[i]) else {
            i += 1;
            continue;
        };
        if let Some((key, value)) = flag.split_once('=') {
            values.insert(key.to_string(), ConfigValue::String(value.to_string()));
            i += 1;
            continue;
        }
        match args.get(i + 1) {
            Some(next) if strip_dashes(next).is_none() => {
                values.insert(flag.to_string(), ConfigValue::String(next.clone()));
                i += 2;
            }
            _ => {
                values.insert(flag.to_string(), ConfigValue::Bool(true));
                i += 1;
            }
        }
    }
    values
}

#[async_trait]
impl ConfigSource for CommandLineSource {
    fn name(&self) -> &str {
        COMMAND_LINE_SOURCE_NAME
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
