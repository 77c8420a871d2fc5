//! Facade wiring across built-in sources

mod common;

use common::RecordingModuleListener;
use pretty_assertions::assert_eq;
use serde_json::json;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;
use tessera_core::source::file::FileHandler;
use tessera_core::{Options, Tessera, TesseraError};

#[tokio::test]
#[serial]
async fn test_source_precedence_across_builtins() {
    let dir = TempDir::new().unwrap();
    let app = dir.path().join("app.yaml");
    fs::write(&app, "log:\n  level: info\n  format: text\nport: 80\n").unwrap();
    std::env::set_var("TESSERA_IT_port", "8080");

    let tessera = Tessera::init(
        Options::new()
            .with_required_file(&app)
            .with_env_prefix("TESSERA_IT_")
            .with_command_line_args(["--log.level=debug"])
            .with_memory_source(),
    )
    .await
    .unwrap();

    assert_eq!(tessera.get_string("log.level", ""), "debug");
    assert_eq!(tessera.get_string("log.format", ""), "text");
    assert_eq!(tessera.get_int("port", 0), 8080);

    tessera.set("log.format", "json").await.unwrap();
    assert_eq!(tessera.get_string("log.format", ""), "json");

    std::env::remove_var("TESSERA_IT_port");
    tessera.clean().await.unwrap();
    assert!(!tessera.exist("log.level"));
}

#[tokio::test]
async fn test_runtime_file_notifies_module_listener() {
    let dir = TempDir::new().unwrap();
    let tessera = Tessera::init(Options::new().with_memory_source()).await.unwrap();
    let listener = RecordingModuleListener::new();
    tessera.register_module_listener(listener.clone(), &["db"]).unwrap();

    let extra = dir.path().join("db.json");
    fs::write(&extra, r#"{"db": {"host": "h", "pool": 4}, "other": 1}"#).unwrap();
    tessera.add_file(&extra, FileHandler::Flatten).await.unwrap();

    assert_eq!(tessera.get_i64("db.pool", 0), 4);
    let delivered: Vec<String> = listener
        .batches()
        .into_iter()
        .flatten()
        .map(|e| e.key)
        .collect();
    assert!(delivered.contains(&"db.host".to_string()));
    assert!(delivered.contains(&"db.pool".to_string()));
    assert!(!delivered.contains(&"other".to_string()));
    tessera.clean().await.unwrap();
}

#[tokio::test]
async fn test_file_name_as_key_handler() {
    let dir = TempDir::new().unwrap();
    let cert = dir.path().join("ca.pem");
    fs::write(&cert, "-----BEGIN-----").unwrap();

    let tessera = Tessera::init(
        Options::new()
            .with_required_file(&cert)
            .with_file_handler(FileHandler::FileNameAsKey),
    )
    .await
    .unwrap();
    assert_eq!(tessera.get("ca.pem"), Some(json!("-----BEGIN-----")));
    tessera.clean().await.unwrap();
}

#[tokio::test]
async fn test_unparsable_required_file_aborts() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("bad.json");
    fs::write(&bad, "{ not json").unwrap();
    let result = Tessera::init(Options::new().with_required_file(&bad)).await;
    assert!(matches!(result, Err(TesseraError::Parse { .. })));
}
