//! Change events and listener contracts
//!
//! A merge cycle produces [`Event`]s only for keys whose effective value
//! actually changed. The [`Dispatcher`] routes them to key listeners one by
//! one and to module listeners as one batch per prefix.

mod dispatcher;
mod matcher;

pub use dispatcher::Dispatcher;
pub use matcher::{KeyMatcher, ModulePrefix};

use crate::ConfigValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of change observed for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Create => "CREATE",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A single key change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    pub event_type: EventType,
    /// New value; `None` for deletes
    pub value: Option<ConfigValue>,
    /// Source that owns the key after the change (or owned it, for deletes)
    pub source_name: String,
}

impl Event {
    pub fn create(key: impl Into<String>, value: ConfigValue, source_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Create,
            value: Some(value),
            source_name: source_name.into(),
        }
    }

    pub fn update(key: impl Into<String>, value: ConfigValue, source_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Update,
            value: Some(value),
            source_name: source_name.into(),
        }
    }

    pub fn delete(key: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Delete,
            value: None,
            source_name: source_name.into(),
        }
    }
}

/// Receives changes for keys matching a registered pattern, one event at a time
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Receives all changes under a registered prefix as one batch per merge cycle
pub trait ModuleListener: Send + Sync {
    fn on_module_event(&self, events: &[Event]);
}
