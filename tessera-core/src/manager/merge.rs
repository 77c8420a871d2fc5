//! Priority resolution across sources
//!
//! Pure functions: the manager feeds them its registered snapshots under
//! the merge lock and dispatches whatever events come back.

use crate::event::Event;
use crate::source::ConfigSource;
use crate::{ConfigMap, ConfigValue};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Effective value together with the source that won it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedValue {
    pub value: ConfigValue,
    pub source_name: String,
}

pub(crate) type EffectiveMap = BTreeMap<String, SourcedValue>;

/// One registered source and the last snapshot taken from it
pub(crate) struct SourceEntry {
    pub source: Arc<dyn ConfigSource>,
    pub name: String,
    pub priority: i32,
    /// Registration order; later registrations win priority ties
    pub seq: u64,
    /// Pull generation the snapshot came from
    pub pulled_at: u64,
    pub snapshot: ConfigMap,
}

impl SourceEntry {
    fn rank(&self) -> (i32, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }

    /// Fold pushed changes into the stored snapshot
    pub fn apply(&mut self, events: &[Event]) {
        for event in events {
            match &event.value {
                Some(value) => {
                    self.snapshot.insert(event.key.clone(), value.clone());
                }
                None => {
                    self.snapshot.remove(&event.key);
                }
            }
        }
    }
}

/// Sources ordered from highest to lowest precedence
pub(crate) fn by_precedence(entries: &[SourceEntry]) -> Vec<&SourceEntry> {
    let mut ordered: Vec<&SourceEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.rank());
    ordered
}

/// For every key, the value of the highest-precedence source defining it
pub(crate) fn resolve(entries: &[SourceEntry]) -> EffectiveMap {
    let mut effective = EffectiveMap::new();
    for entry in by_precedence(entries) {
        for (key, value) in &entry.snapshot {
            effective.entry(key.clone()).or_insert_with(|| SourcedValue {
                value: value.clone(),
                source_name: entry.name.clone(),
            });
        }
    }
    effective
}

/// Events for keys whose effective value changed.
///
/// Only values are compared: a key moving to another source with an equal
/// value is not a change.
pub(crate) fn diff(old: &EffectiveMap, new: &EffectiveMap) -> Vec<Event> {
    let mut events = Vec::new();
    for (key, current) in new {
        match old.get(key) {
            None => events.push(Event::create(
                key.clone(),
                current.value.clone(),
                current.source_name.clone(),
            )),
            Some(previous) if previous.value != current.value => events.push(Event::update(
                key.clone(),
                current.value.clone(),
                current.source_name.clone(),
            )),
            Some(_) => {}
        }
    }
    for (key, previous) in old {
        if !new.contains_key(key) {
            events.push(Event::delete(key.clone(), previous.source_name.clone()));
        }
    }
    events
}
