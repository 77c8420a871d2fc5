//! End-to-end behaviour of the configuration manager

mod common;

use common::{memory_source, wait_for_condition, RecordingListener, RecordingModuleListener};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tessera_core::source::file::{FileHandler, FileSource, DEFAULT_FILE_PRIORITY};
use tessera_core::source::ConfigSource;
use tessera_core::{ConfigManager, Event, EventType, Listener, TesseraError};

async fn file_source(dir: &TempDir, name: &str, content: &str, priority: i32) -> Arc<FileSource> {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    let source = FileSource::new().with_priority(priority);
    source
        .add_file(&path, DEFAULT_FILE_PRIORITY, FileHandler::Flatten)
        .await
        .unwrap();
    Arc::new(source)
}

#[tokio::test]
async fn test_memory_over_file_scenario() {
    let dir = TempDir::new().unwrap();
    let manager = ConfigManager::new();
    manager.add_source(memory_source("memory", 0, json!({"a": 1}))).await.unwrap();
    manager
        .add_source(file_source(&dir, "app.yaml", "a: 2\nb: 3\n", 10).await)
        .await
        .unwrap();

    assert_eq!(manager.get_config("a"), Some(json!(1)));
    assert_eq!(manager.get_config("b"), Some(json!(3)));

    let listener = RecordingListener::new();
    manager.register_listener(listener.clone(), &["a"]).unwrap();
    manager.set("a", json!(9)).await.unwrap();

    assert_eq!(manager.get_config("a"), Some(json!(9)));
    assert_eq!(
        listener.events(),
        vec![Event::update("a", json!(9), "memory")]
    );
    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_priority_independent_of_registration_order() {
    for reversed in [false, true] {
        let manager = ConfigManager::new();
        let mut sources = vec![
            memory_source("A", 1, json!({"k": "from-a"})),
            memory_source("B", 2, json!({"k": "from-b", "only_b": true})),
        ];
        if reversed {
            sources.reverse();
        }
        for source in sources {
            manager.add_source(source).await.unwrap();
        }
        assert_eq!(manager.get_config("k"), Some(json!("from-a")));
        assert_eq!(manager.get_config("only_b"), Some(json!(true)));
        assert_eq!(manager.source_names().await, vec!["A", "B"]);
    }
}

#[tokio::test]
async fn test_shadowed_file_change_is_silent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.yaml");
    fs::write(&path, "a: 1\nb: 1\n").unwrap();
    let files = FileSource::new();
    files.add_file(&path, 0, FileHandler::Flatten).await.unwrap();

    let manager = ConfigManager::new();
    manager.add_source(memory_source("memory", 0, json!({"a": "pinned"}))).await.unwrap();
    manager.add_source(Arc::new(files)).await.unwrap();

    let listener = RecordingListener::new();
    manager.register_listener(listener.clone(), &["a", "b"]).unwrap();

    fs::write(&path, "a: 2\nb: 2\n").unwrap();
    wait_for_condition(
        || async { manager.get_config("b") == Some(json!(2)) },
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let events = listener.events();
    assert!(events.iter().all(|e| e.key == "b"), "unexpected events: {:?}", events);
    // a truncating write may surface as delete + create instead of one update
    let last = events.last().unwrap();
    assert_ne!(last.event_type, EventType::Delete);
    assert_eq!(last.value, Some(json!(2)));
    assert_eq!(manager.get_config("a"), Some(json!("pinned")));
    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_module_listener_gets_one_batch_per_cycle() {
    let manager = ConfigManager::new();
    let listener = RecordingModuleListener::new();
    manager.register_module_listener(listener.clone(), &["db"]).unwrap();

    manager
        .add_source(memory_source(
            "memory",
            1,
            json!({"db": {"host": "h", "port": 5432}, "dbx": 1, "cache": {"ttl": 5}}),
        ))
        .await
        .unwrap();

    let batches = listener.batches();
    assert_eq!(batches.len(), 1);
    let keys: Vec<&str> = batches[0].iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["db.host", "db.port"]);
}

#[tokio::test]
async fn test_regex_listener_and_self_unregister() {
    struct OneShot {
        manager: Arc<ConfigManager>,
        seen: parking_lot::Mutex<Vec<String>>,
        me: parking_lot::Mutex<Option<Arc<dyn Listener>>>,
    }

    impl Listener for OneShot {
        fn on_event(&self, event: &Event) {
            self.seen.lock().push(event.key.clone());
            if let Some(me) = self.me.lock().take() {
                self.manager.unregister_listener(&me, &["server\\..*"]).unwrap();
            }
        }
    }

    let manager = Arc::new(ConfigManager::new());
    let listener = Arc::new(OneShot {
        manager: manager.clone(),
        seen: parking_lot::Mutex::new(Vec::new()),
        me: parking_lot::Mutex::new(None),
    });
    let as_dyn: Arc<dyn Listener> = listener.clone();
    *listener.me.lock() = Some(as_dyn.clone());
    manager.register_listener(as_dyn, &["server\\..*"]).unwrap();

    manager
        .add_source(memory_source("memory", 1, json!({"server": {"host": "h", "port": 1}, "other": 1})))
        .await
        .unwrap();
    // both keys belong to one cycle, dispatched from a snapshot of the registry
    assert_eq!(*listener.seen.lock(), vec!["server.host", "server.port"]);

    manager.set("server.port", json!(2)).await.unwrap();
    assert_eq!(listener.seen.lock().len(), 2);
}

#[tokio::test]
async fn test_refresh_unknown_source() {
    let manager = ConfigManager::new();
    assert!(matches!(
        manager.refresh("ghost").await,
        Err(TesseraError::SourceNotFound { .. })
    ));
}

#[tokio::test]
async fn test_cleanup_with_live_watchers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.json");
    fs::write(&path, r#"{"n": 0}"#).unwrap();
    let files = Arc::new(FileSource::new());
    files.add_file(&path, 0, FileHandler::Flatten).await.unwrap();

    let manager = Arc::new(ConfigManager::new());
    manager.add_source(files.clone()).await.unwrap();
    manager.add_source(memory_source("memory", 1, json!({"m": 1}))).await.unwrap();

    let writer = tokio::spawn({
        let path = path.clone();
        async move {
            for i in 1..20 {
                fs::write(&path, format!(r#"{{"n": {}}}"#, i)).unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
    });

    manager.cleanup().await.unwrap();
    writer.await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.get_config("n"), None);
    assert_eq!(manager.get_config("m"), None);
    assert!(manager.configs().is_empty());
    assert!(files.configurations().await.unwrap().is_empty());
    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_marshal_round_trip_through_file_source() {
    let manager = ConfigManager::new();
    manager
        .add_source(memory_source(
            "memory",
            1,
            json!({"server": {"port": 8080, "tls": false}, "tags": ["a", "b"], "name": "svc"}),
        ))
        .await
        .unwrap();
    let mut mixed = tessera_core::ConfigMap::new();
    mixed.insert("level".to_string(), json!("info"));
    mixed.insert("level.detail".to_string(), json!("full"));
    manager
        .add_source(Arc::new(
            tessera_core::source::MemorySource::with_values(mixed).with_name("mixed"),
        ))
        .await
        .unwrap();

    let dir = TempDir::new().unwrap();
    let dump = dir.path().join("dump.yaml");
    let mut out = Vec::new();
    manager.marshal(&mut out).unwrap();
    fs::write(&dump, &out).unwrap();

    let reloaded = FileSource::new();
    reloaded.add_file(&dump, 0, FileHandler::Flatten).await.unwrap();
    assert_eq!(reloaded.configurations().await.unwrap(), manager.configs());
}

#[tokio::test]
async fn test_unmarshal_reports_bad_fields() {
    #[derive(Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Settings {
        port: u16,
        verbose: bool,
        name: String,
    }

    let manager = ConfigManager::new();
    manager
        .add_source(memory_source(
            "memory",
            1,
            json!({"port": "not-a-port", "verbose": "true", "name": "svc"}),
        ))
        .await
        .unwrap();

    let mut settings = Settings::default();
    let report = manager.unmarshal(&mut settings).unwrap();
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, "port");
    assert_eq!(
        settings,
        Settings {
            port: 0,
            verbose: true,
            name: "svc".to_string(),
        }
    );
}

/// Source whose later pulls block until released and return a fixed,
/// already outdated snapshot
struct GatedSource {
    held: std::sync::atomic::AtomicBool,
    entered: tokio::sync::Notify,
    release: tokio::sync::Notify,
    updates: parking_lot::Mutex<Option<tessera_core::UpdateSender>>,
}

#[async_trait::async_trait]
impl ConfigSource for GatedSource {
    fn name(&self) -> &str {
        "gated"
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn configurations(&self) -> tessera_core::TesseraResult<tessera_core::ConfigMap> {
        if self.held.load(std::sync::atomic::Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok([("a".to_string(), json!(1))].into_iter().collect())
    }

    fn watch(&self, updates: tessera_core::UpdateSender) -> tessera_core::TesseraResult<()> {
        *self.updates.lock() = Some(updates);
        Ok(())
    }

    async fn cleanup(&self) -> tessera_core::TesseraResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_refresh_started_before_push_does_not_roll_back() {
    let source = Arc::new(GatedSource {
        held: std::sync::atomic::AtomicBool::new(false),
        entered: tokio::sync::Notify::new(),
        release: tokio::sync::Notify::new(),
        updates: parking_lot::Mutex::new(None),
    });
    let manager = Arc::new(ConfigManager::new());
    manager.add_source(source.clone()).await.unwrap();
    assert_eq!(manager.get_config("a"), Some(json!(1)));

    source.held.store(true, std::sync::atomic::Ordering::SeqCst);
    let refresh = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.refresh("gated").await })
    };
    source.entered.notified().await;

    let sender = source.updates.lock().clone().unwrap();
    assert!(sender.send(vec![Event::update("a", json!(2), "gated")]));
    wait_for_condition(
        || async { manager.get_config("a") == Some(json!(2)) },
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    source.release.notify_one();
    refresh.await.unwrap().unwrap();
    assert_eq!(manager.get_config("a"), Some(json!(2)));
    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_prefix_matcher_registration() {
    let manager = ConfigManager::new();
    let listener = RecordingListener::new();
    manager
        .register_matcher(listener.clone(), tessera_core::KeyMatcher::prefix("log"))
        .unwrap();
    manager
        .add_source(memory_source("memory", 1, json!({"log": {"level": "info"}, "catalog": 1})))
        .await
        .unwrap();

    let keys: Vec<String> = listener.events().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["log.level"]);

    let as_dyn: Arc<dyn Listener> = listener.clone();
    manager.unregister_matcher(&as_dyn, &tessera_core::KeyMatcher::prefix("log"));
    manager.set("log.level", json!("debug")).await.unwrap();
    assert_eq!(listener.events().len(), 1);
}
