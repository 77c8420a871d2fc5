// Shared helpers for the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::env;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::source::MemorySource;
use tessera_core::tree;
use tessera_core::{Event, Listener, ModuleListener};
use tokio::time::{sleep, Instant};

/// CI machines get more time before a wait gives up
pub fn timeout_multiplier() -> u32 {
    if env::var("CI").is_ok() || env::var("GITHUB_ACTIONS").is_ok() {
        return 3;
    }
    env::var("TEST_TIMEOUT_MULTIPLIER")
        .ok()
        .and_then(|m| m.parse().ok())
        .unwrap_or(1)
}

/// Poll `condition` with exponential backoff until it holds or time runs out
pub async fn wait_for_condition<F, Fut>(mut condition: F, max_wait: Duration) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = max_wait * timeout_multiplier();
    let start = Instant::now();
    let mut interval = Duration::from_millis(10);
    while start.elapsed() < deadline {
        if condition().await {
            return Ok(());
        }
        sleep(interval).await;
        interval = (interval * 2).min(Duration::from_millis(250));
    }
    Err(format!("Condition not met within {:?}", deadline))
}

/// Key listener that keeps every event it sees
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Listener for RecordingListener {
    fn on_event(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Module listener that keeps each batch separately
#[derive(Default)]
pub struct RecordingModuleListener {
    batches: Mutex<Vec<Vec<Event>>>,
}

impl RecordingModuleListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().clone()
    }
}

impl ModuleListener for RecordingModuleListener {
    fn on_module_event(&self, events: &[Event]) {
        self.batches.lock().push(events.to_vec());
    }
}

/// Memory source with flattened `values`
pub fn memory_source(name: &str, priority: i32, values: serde_json::Value) -> Arc<MemorySource> {
    Arc::new(
        MemorySource::with_values(tree::flatten(&values))
            .with_name(name)
            .with_priority(priority),
    )
}
