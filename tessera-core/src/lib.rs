//! Runtime configuration aggregation
//!
//! Sources (files, environment, command line, in-memory overrides and a
//! remote config center) are merged by priority into one key space by a
//! [`ConfigManager`]; listeners are told about every effective change.

pub mod cast;
pub mod error;
pub mod event;
pub mod facade;
pub mod manager;
pub mod observability;
pub mod source;
pub mod tree;
pub mod util;

use std::collections::BTreeMap;

/// A configuration value of any shape
pub type ConfigValue = serde_json::Value;

/// Flat, dot-keyed configuration, ordered by key
pub type ConfigMap = BTreeMap<String, ConfigValue>;

pub use error::{TesseraError, TesseraResult};
pub use event::{Event, EventType, KeyMatcher, Listener, ModuleListener};
pub use facade::{Options, Tessera};
pub use manager::{ConfigManager, SourcedValue};
pub use source::{ConfigSource, UpdateSender, WritableSource};
