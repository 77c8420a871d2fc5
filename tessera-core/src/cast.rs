//! Lenient conversions from configuration values to Rust scalars
//!
//! Sources such as the environment or the command line only ever produce
//! strings, so numeric and boolean getters accept their textual forms.

use crate::error::{TesseraError, TesseraResult};
use crate::ConfigValue;

/// `strconv.ParseBool`-style boolean parsing
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Best-effort typed reading of a textual value: bool, integer, then float
pub fn infer_scalar(s: &str) -> Option<ConfigValue> {
    let trimmed = s.trim();
    match trimmed {
        "true" | "TRUE" | "True" => return Some(ConfigValue::Bool(true)),
        "false" | "FALSE" | "False" => return Some(ConfigValue::Bool(false)),
        _ => {}
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(ConfigValue::from(i));
    }
    if let Ok(u) = trimmed.parse::<u64>() {
        return Some(ConfigValue::from(u));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(|f| serde_json::Number::from_f64(f).map(ConfigValue::Number))
}

/// A looked-up value that may be absent
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    key: String,
    value: Option<ConfigValue>,
}

impl Value {
    pub fn new(key: impl Into<String>, value: Option<ConfigValue>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn raw(&self) -> Option<&ConfigValue> {
        self.value.as_ref()
    }

    fn present(&self) -> TesseraResult<&ConfigValue> {
        self.value
            .as_ref()
            .ok_or_else(|| TesseraError::key_not_found(self.key.clone()))
    }

    fn cast_error(&self, value: &ConfigValue, target: &'static str) -> TesseraError {
        TesseraError::Cast {
            value: value.to_string(),
            target,
        }
    }

    pub fn to_bool(&self) -> TesseraResult<bool> {
        let value = self.present()?;
        match value {
            ConfigValue::Bool(b) => Ok(*b),
            ConfigValue::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
            ConfigValue::String(s) => parse_bool(s).ok_or_else(|| self.cast_error(value, "bool")),
            ConfigValue::Null => Ok(false),
            _ => Err(self.cast_error(value, "bool")),
        }
    }

    pub fn to_i64(&self) -> TesseraResult<i64> {
        let value = self.present()?;
        match value {
            ConfigValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .ok_or_else(|| self.cast_error(value, "i64")),
            ConfigValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| self.cast_error(value, "i64")),
            ConfigValue::Bool(b) => Ok(i64::from(*b)),
            ConfigValue::Null => Ok(0),
            _ => Err(self.cast_error(value, "i64")),
        }
    }

    pub fn to_i32(&self) -> TesseraResult<i32> {
        let v = self.to_i64()?;
        i32::try_from(v).map_err(|_| TesseraError::Cast {
            value: v.to_string(),
            target: "i32",
        })
    }

    pub fn to_u64(&self) -> TesseraResult<u64> {
        let value = self.present()?;
        match value {
            ConfigValue::Number(n) => n.as_u64().ok_or_else(|| self.cast_error(value, "u64")),
            ConfigValue::String(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| self.cast_error(value, "u64")),
            ConfigValue::Bool(b) => Ok(u64::from(*b)),
            ConfigValue::Null => Ok(0),
            _ => Err(self.cast_error(value, "u64")),
        }
    }

    pub fn to_f64(&self) -> TesseraResult<f64> {
        let value = self.present()?;
        match value {
            ConfigValue::Number(n) => n.as_f64().ok_or_else(|| self.cast_error(value, "f64")),
            ConfigValue::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| self.cast_error(value, "f64")),
            ConfigValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            ConfigValue::Null => Ok(0.0),
            _ => Err(self.cast_error(value, "f64")),
        }
    }

    pub fn to_string(&self) -> TesseraResult<String> {
        let value = self.present()?;
        match value {
            ConfigValue::String(s) => Ok(s.clone()),
            ConfigValue::Number(n) => Ok(n.to_string()),
            ConfigValue::Bool(b) => Ok(b.to_string()),
            ConfigValue::Null => Ok(String::new()),
            _ => Err(self.cast_error(value, "string")),
        }
    }

    /// Arrays convert element-wise; strings split on whitespace
    pub fn to_string_vec(&self) -> TesseraResult<Vec<String>> {
        let value = self.present()?;
        match value {
            ConfigValue::Array(items) => items
                .iter()
                .map(|item| Value::new(self.key.clone(), Some(item.clone())).to_string())
                .collect(),
            ConfigValue::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
            _ => Err(self.cast_error(value, "Vec<String>")),
        }
    }
}
