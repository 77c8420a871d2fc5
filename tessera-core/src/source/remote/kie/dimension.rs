//! Dimension labels and precedence merging
//!
//! The config center stores a separate key/value set per dimension. Each
//! dimension is selected by a label set derived from the client's labels,
//! and the per-dimension results are flattened into one map where narrower
//! dimensions override broader ones.

use crate::error::{TesseraError, TesseraResult};
use crate::source::remote::{LABEL_APP, LABEL_ENVIRONMENT, LABEL_SERVICE};
use crate::{ConfigMap, ConfigValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const STATUS_ENABLED: &str = "enabled";

/// Label scopes, broadest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionName {
    App,
    Environment,
    Service,
    Version,
}

/// Fixed merge order; later entries override earlier ones
pub const DIMENSION_PRECEDENCE: [DimensionName; 4] = [
    DimensionName::App,
    DimensionName::Environment,
    DimensionName::Service,
    DimensionName::Version,
];

impl DimensionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionName::App => "app",
            DimensionName::Environment => "environment",
            DimensionName::Service => "service",
            DimensionName::Version => "version",
        }
    }
}

impl fmt::Display for DimensionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DimensionName {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "app" | "application" => Ok(DimensionName::App),
            "environment" | "env" => Ok(DimensionName::Environment),
            "service" => Ok(DimensionName::Service),
            "version" => Ok(DimensionName::Version),
            _ => Err(TesseraError::UnsupportedDimension {
                dimension: s.to_string(),
            }),
        }
    }
}

/// Label set selecting `dimension`'s documents.
///
/// `App` needs `app` and `environment`; `Service` additionally needs
/// `service`. Other dimensions cannot be queried.
pub fn generate_labels(
    dimension: DimensionName,
    options_labels: Option<&HashMap<String, String>>,
) -> TesseraResult<HashMap<String, String>> {
    let labels = options_labels.ok_or(TesseraError::LabelsNil)?;
    let label = |name: &str| labels.get(name).cloned().unwrap_or_default();

    let app = label(LABEL_APP);
    if app.is_empty() {
        return Err(TesseraError::AppEmpty);
    }
    let mut dimension_labels = HashMap::new();
    dimension_labels.insert(LABEL_APP.to_string(), app);
    dimension_labels.insert(LABEL_ENVIRONMENT.to_string(), label(LABEL_ENVIRONMENT));
    if dimension == DimensionName::App {
        return Ok(dimension_labels);
    }
    dimension_labels.insert(LABEL_SERVICE.to_string(), label(LABEL_SERVICE));
    if dimension == DimensionName::Service {
        return Ok(dimension_labels);
    }
    Err(TesseraError::UnsupportedDimension {
        dimension: dimension.to_string(),
    })
}

/// One key/value document as served by the config center
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvDoc {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl KvDoc {
    pub fn enabled(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            status: STATUS_ENABLED.to_string(),
            labels: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvResponse {
    #[serde(default)]
    pub data: Vec<KvDoc>,
    #[serde(default)]
    pub total: u64,
}

/// Holds the latest snapshot per dimension and flattens them by rank
#[derive(Debug, Clone)]
pub struct DimensionMerger {
    precedence: Vec<DimensionName>,
    snapshots: HashMap<DimensionName, ConfigMap>,
}

impl DimensionMerger {
    pub fn new() -> Self {
        Self::with_precedence(DIMENSION_PRECEDENCE.to_vec())
    }

    /// Duplicates in `precedence` keep their first position
    pub fn with_precedence(precedence: Vec<DimensionName>) -> Self {
        let mut ordered = Vec::with_capacity(precedence.len());
        for dimension in precedence {
            if !ordered.contains(&dimension) {
                ordered.push(dimension);
            }
        }
        Self {
            precedence: ordered,
            snapshots: HashMap::new(),
        }
    }

    pub fn precedence(&self) -> &[DimensionName] {
        &self.precedence
    }

    /// Replace `dimension`'s snapshot with the enabled documents of `response`
    pub fn set_dimension_configs(
        &mut self,
        response: &KvResponse,
        dimension: DimensionName,
    ) -> TesseraResult<()> {
        if !self.precedence.contains(&dimension) {
            return Err(TesseraError::UnsupportedDimension {
                dimension: dimension.to_string(),
            });
        }
        let snapshot: ConfigMap = response
            .data
            .iter()
            .filter(|doc| doc.is_enabled())
            .map(|doc| (doc.key.clone(), ConfigValue::String(doc.value.clone())))
            .collect();
        self.snapshots.insert(dimension, snapshot);
        Ok(())
    }

    pub fn merge(&self) -> ConfigMap {
        let mut result = ConfigMap::new();
        for dimension in &self.precedence {
            if let Some(snapshot) = self.snapshots.get(dimension) {
                for (key, value) in snapshot {
                    result.insert(key.clone(), value.clone());
                }
            }
        }
        result
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

impl Default for DimensionMerger {
    fn default() -> Self {
        Self::new()
    }
}
