use super::{Event, KeyMatcher, Listener, ModuleListener, ModulePrefix};
use crate::error::{TesseraError, TesseraResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

type KeyEntry = (KeyMatcher, Arc<dyn Listener>);
type ModuleEntry = (ModulePrefix, Arc<dyn ModuleListener>);

/// Listener registry shared by one manager.
///
/// Dispatch always iterates a cloned snapshot of the registry, so a
/// listener may unregister itself from inside its own callback.
#[derive(Default)]
pub struct Dispatcher {
    key_listeners: RwLock<Vec<KeyEntry>>,
    module_listeners: RwLock<Vec<ModuleEntry>>,
}

fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for every key pattern. Patterns are validated
    /// first; nothing is registered if any of them is invalid.
    pub fn register_listener(&self, listener: Arc<dyn Listener>, keys: &[&str]) -> TesseraResult<()> {
        if keys.is_empty() {
            return Err(TesseraError::invalid_configuration(
                "at least one key pattern is required",
            ));
        }
        let matchers = keys
            .iter()
            .map(|k| KeyMatcher::parse(k))
            .collect::<TesseraResult<Vec<_>>>()?;
        for matcher in matchers {
            self.register_matcher(listener.clone(), matcher);
        }
        Ok(())
    }

    /// Register with an explicit matcher; a (listener, matcher) pair is stored once
    pub fn register_matcher(&self, listener: Arc<dyn Listener>, matcher: KeyMatcher) {
        let mut entries = self.key_listeners.write();
        let exists = entries
            .iter()
            .any(|(m, l)| *m == matcher && same_listener(l, &listener));
        if !exists {
            debug!(matcher = ?matcher, "registered key listener");
            entries.push((matcher, listener));
        }
    }

    pub fn unregister_matcher(&self, listener: &Arc<dyn Listener>, matcher: &KeyMatcher) {
        let mut entries = self.key_listeners.write();
        entries.retain(|(m, l)| !(same_listener(l, listener) && m == matcher));
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn Listener>, keys: &[&str]) -> TesseraResult<()> {
        let matchers = keys
            .iter()
            .map(|k| KeyMatcher::parse(k))
            .collect::<TesseraResult<Vec<_>>>()?;
        let mut entries = self.key_listeners.write();
        entries.retain(|(m, l)| !(same_listener(l, listener) && matchers.contains(m)));
        Ok(())
    }

    pub fn register_module_listener(
        &self,
        listener: Arc<dyn ModuleListener>,
        prefixes: &[&str],
    ) -> TesseraResult<()> {
        if prefixes.is_empty() {
            return Err(TesseraError::invalid_configuration(
                "at least one module prefix is required",
            ));
        }
        let mut entries = self.module_listeners.write();
        for prefix in prefixes.iter().map(|p| ModulePrefix::new(*p)) {
            let exists = entries
                .iter()
                .any(|(p, l)| *p == prefix && same_listener(l, &listener));
            if !exists {
                debug!(prefix = prefix.as_str(), "registered module listener");
                entries.push((prefix, listener.clone()));
            }
        }
        Ok(())
    }

    pub fn unregister_module_listener(&self, listener: &Arc<dyn ModuleListener>, prefixes: &[&str]) {
        let prefixes: Vec<ModulePrefix> = prefixes.iter().map(|p| ModulePrefix::new(*p)).collect();
        let mut entries = self.module_listeners.write();
        entries.retain(|(p, l)| !(same_listener(l, listener) && prefixes.contains(p)));
    }

    /// Deliver one merge cycle's events
    pub fn dispatch(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }

        let key_listeners: Vec<KeyEntry> = self.key_listeners.read().clone();
        for event in events {
            for (matcher, listener) in &key_listeners {
                if matcher.matches(&event.key) {
                    trace!(key = %event.key, event_type = %event.event_type, "dispatching event");
                    listener.on_event(event);
                }
            }
        }

        let module_listeners: Vec<ModuleEntry> = self.module_listeners.read().clone();
        for (prefix, listener) in &module_listeners {
            let batch: Vec<Event> = events
                .iter()
                .filter(|e| prefix.matches(&e.key))
                .cloned()
                .collect();
            if !batch.is_empty() {
                trace!(prefix = prefix.as_str(), count = batch.len(), "dispatching module events");
                listener.on_module_event(&batch);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.key_listeners.read().len() + self.module_listeners.read().len()
    }

    pub fn clear(&self) {
        self.key_listeners.write().clear();
        self.module_listeners.write().clear();
    }
}
