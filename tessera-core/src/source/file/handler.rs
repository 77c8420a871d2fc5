//! Turning file bytes into key/value pairs

use crate::error::{TesseraError, TesseraResult};
use crate::{tree, ConfigMap, ConfigValue};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

type CustomHandler = dyn Fn(&Path, &[u8]) -> TesseraResult<ConfigMap> + Send + Sync;

/// How a file's content becomes configuration
#[derive(Clone, Default)]
pub enum FileHandler {
    /// Parse by extension (yaml, yml, json, toml; anything else as yaml)
    /// and flatten nested objects into dot keys
    #[default]
    Flatten,
    /// The file name is the key, the whole content the value
    FileNameAsKey,
    Custom(Arc<CustomHandler>),
}

impl FileHandler {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Path, &[u8]) -> TesseraResult<ConfigMap> + Send + Sync + 'static,
    {
        FileHandler::Custom(Arc::new(f))
    }

    pub fn handle(&self, path: &Path, content: &[u8]) -> TesseraResult<ConfigMap> {
        match self {
            FileHandler::Flatten => flatten_by_extension(path, content),
            FileHandler::FileNameAsKey => file_name_as_key(path, content),
            FileHandler::Custom(f) => f(path, content),
        }
    }
}

impl fmt::Debug for FileHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileHandler::Flatten => f.write_str("Flatten"),
            FileHandler::FileNameAsKey => f.write_str("FileNameAsKey"),
            FileHandler::Custom(_) => f.write_str("Custom"),
        }
    }
}

fn flatten_by_extension(path: &Path, content: &[u8]) -> TesseraResult<ConfigMap> {
    let display = path.display().to_string();
    let text = std::str::from_utf8(content).map_err(|e| TesseraError::parse(&display, e))?;
    if text.trim().is_empty() {
        return Ok(ConfigMap::new());
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let document: ConfigValue = match extension.as_deref() {
        Some("json") => serde_json::from_str(text).map_err(|e| TesseraError::parse(&display, e))?,
        Some("toml") => toml::from_str(text).map_err(|e| TesseraError::parse(&display, e))?,
        _ => serde_yaml::from_str(text).map_err(|e| TesseraError::parse(&display, e))?,
    };

    match document {
        ConfigValue::Object(_) => Ok(tree::flatten(&document)),
        ConfigValue::Null => Ok(ConfigMap::new()),
        _ => Err(TesseraError::parse(display, "top level must be a mapping")),
    }
}

fn file_name_as_key(path: &Path, content: &[u8]) -> TesseraResult<ConfigMap> {
    let key = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TesseraError::parse(path.display().to_string(), "file name is not valid UTF-8"))?;
    let mut values = ConfigMap::new();
    values.insert(
        key.to_string(),
        ConfigValue::String(String::from_utf8_lossy(content).into_owned()),
    );
    Ok(values)
}
