//! Conversions between flat dot-separated keys and nested value trees
//!
//! Files are flattened on load; `marshal` and `unmarshal` re-nest the flat
//! effective map. The two directions round-trip the flat key set, including
//! keys that are both a leaf and a branch (`a` and `a.b`): such a dotted key
//! is kept verbatim inside the deepest object that could hold it.

use crate::cast;
use crate::error::{TesseraError, TesseraResult};
use crate::{ConfigMap, ConfigValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Map;

/// Flatten nested objects into dot keys. Arrays and scalars are leaves.
pub fn flatten(value: &ConfigValue) -> ConfigMap {
    let mut out = ConfigMap::new();
    match value {
        ConfigValue::Object(map) => {
            for (k, v) in map {
                flatten_into(k.clone(), v, &mut out);
            }
        }
        ConfigValue::Null => {}
        other => {
            out.insert(String::new(), other.clone());
        }
    }
    out
}

fn flatten_into(prefix: String, value: &ConfigValue, out: &mut ConfigMap) {
    match value {
        ConfigValue::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                flatten_into(format!("{}.{}", prefix, k), v, out);
            }
        }
        other => {
            out.insert(prefix, other.clone());
        }
    }
}

/// Re-nest a flat map into an object tree
pub fn nest(flat: &ConfigMap) -> ConfigValue {
    let mut root = Map::new();
    // BTreeMap order puts `a` before `a.b`, so a collision is always found
    // while walking intermediate segments, never at the final one.
    for (key, value) in flat {
        insert_nested(&mut root, key, value.clone());
    }
    ConfigValue::Object(root)
}

fn insert_nested(root: &mut Map<String, ConfigValue>, key: &str, value: ConfigValue) {
    let segments: Vec<&str> = key.split('.').collect();
    let mut node = root;
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if i == last {
            node.insert((*segment).to_string(), value);
            return;
        }
        let is_branch = matches!(node.get(*segment), None | Some(ConfigValue::Object(_)));
        if !is_branch {
            node.insert(segments[i..].join("."), value);
            return;
        }
        let next = node
            .entry((*segment).to_string())
            .or_insert_with(|| ConfigValue::Object(Map::new()));
        node = match next {
            ConfigValue::Object(map) => map,
            _ => return,
        };
    }
}

/// A field that could not be populated during [`unmarshal_into`]
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

/// Outcome of populating a structure from the effective configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnmarshalReport {
    pub applied: usize,
    pub errors: Vec<FieldError>,
}

impl UnmarshalReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn lookup<'a>(tree: &'a ConfigValue, segments: &[&str]) -> Option<&'a ConfigValue> {
    let mut node = tree;
    for segment in segments {
        node = node.as_object()?.get(*segment)?;
    }
    Some(node)
}

fn set_path(tree: &mut ConfigValue, segments: &[&str], value: ConfigValue) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let mut node = tree;
    for segment in parents {
        let Some(map) = node.as_object_mut() else {
            return false;
        };
        node = map
            .entry((*segment).to_string())
            .or_insert_with(|| ConfigValue::Object(Map::new()));
    }
    match node.as_object_mut() {
        Some(map) => {
            map.insert((*last).to_string(), value);
            true
        }
        None => false,
    }
}

/// Candidate representations of `value` for a slot currently holding `expected`
fn candidates(value: &ConfigValue, expected: Option<&ConfigValue>) -> Vec<ConfigValue> {
    let mut out = vec![value.clone()];
    if let ConfigValue::String(s) = value {
        let coerced = match expected {
            Some(ConfigValue::Bool(_)) => cast::parse_bool(s).map(ConfigValue::Bool),
            Some(ConfigValue::Number(_)) => cast::infer_scalar(s).filter(|v| v.is_number()),
            Some(ConfigValue::Array(_)) => Some(ConfigValue::Array(
                s.split(',')
                    .map(|item| ConfigValue::String(item.trim().to_string()))
                    .collect(),
            )),
            _ => cast::infer_scalar(s),
        };
        if let Some(coerced) = coerced {
            if expected.is_some_and(|e| !e.is_null() && !e.is_string()) {
                out.insert(0, coerced);
            } else {
                out.push(coerced);
            }
        }
    }
    out
}

/// Populate `target` from a flat map, one leaf at a time.
///
/// The target's current value is the starting tree. A leaf that cannot be
/// applied is recorded in the report and skipped; the rest still apply.
pub fn unmarshal_into<T>(target: &mut T, flat: &ConfigMap) -> TesseraResult<UnmarshalReport>
where
    T: Serialize + DeserializeOwned,
{
    let mut base = serde_json::to_value(&*target)?;
    let mut report = UnmarshalReport::default();

    for (key, value) in flat {
        let segments: Vec<&str> = key.split('.').collect();
        let expected = lookup(&base, &segments).cloned();
        let mut last_error = None;
        let mut applied = false;

        for candidate_value in candidates(value, expected.as_ref()) {
            let mut candidate = base.clone();
            if !set_path(&mut candidate, &segments, candidate_value) {
                last_error = Some("path conflicts with a scalar field".to_string());
                break;
            }
            match serde_json::from_value::<T>(candidate.clone()) {
                Ok(_) => {
                    base = candidate;
                    applied = true;
                    break;
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        if applied {
            report.applied += 1;
        } else if let Some(message) = last_error {
            report.errors.push(FieldError {
                path: key.clone(),
                message,
            });
        }
    }

    *target = serde_json::from_value(base)
        .map_err(|e| TesseraError::serialization("unmarshal", e))?;
    Ok(report)
}
