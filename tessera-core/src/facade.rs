//! Application-facing entry point
//!
//! [`Tessera`] bundles a [`ConfigManager`] with the built-in sources chosen
//! through [`Options`] and adds typed getters that fall back to a default
//! instead of failing. Build one per application and share it; there is no
//! process-wide instance.

use crate::cast;
use crate::error::{TesseraError, TesseraResult};
use crate::event::{KeyMatcher, Listener, ModuleListener};
use crate::manager::{ConfigManager, SourcedValue};
use crate::source::file::{FileHandler, FileSource, DEFAULT_FILE_PRIORITY};
use crate::source::remote::{new_remote_source, RemoteInfo};
use crate::source::{CommandLineSource, ConfigSource, EnvSource, MemorySource};
use crate::tree::UnmarshalReport;
use crate::util::concurrent;
use crate::{ConfigMap, ConfigValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Files checked in parallel at startup
const FILE_LOAD_CONCURRENCY: usize = 16;

/// What [`Tessera::init`] wires up
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub required_files: Vec<PathBuf>,
    pub optional_files: Vec<PathBuf>,
    pub file_handler: FileHandler,
    pub use_memory_source: bool,
    pub use_command_line_source: bool,
    /// Arguments for the command-line source; the process arguments when unset
    pub command_line_args: Option<Vec<String>>,
    pub use_env_source: bool,
    pub env_prefix: Option<String>,
    pub remote_source: Option<(String, RemoteInfo)>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must exist; a missing one fails [`Tessera::init`]
    pub fn with_required_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.required_files.push(path.into());
        self
    }

    /// Skipped with a log line when missing
    pub fn with_optional_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.optional_files.push(path.into());
        self
    }

    pub fn with_file_handler(mut self, handler: FileHandler) -> Self {
        self.file_handler = handler;
        self
    }

    pub fn with_memory_source(mut self) -> Self {
        self.use_memory_source = true;
        self
    }

    pub fn with_command_line_source(mut self) -> Self {
        self.use_command_line_source = true;
        self
    }

    pub fn with_command_line_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.use_command_line_source = true;
        self.command_line_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_env_source(mut self) -> Self {
        self.use_env_source = true;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.use_env_source = true;
        self.env_prefix = Some(prefix.into());
        self
    }

    pub fn with_remote_source(mut self, kind: impl Into<String>, info: RemoteInfo) -> Self {
        self.remote_source = Some((kind.into(), info));
        self
    }
}

/// A configured manager plus the file source it was initialised with
pub struct Tessera {
    manager: ConfigManager,
    files: Arc<FileSource>,
}

impl Tessera {
    /// Load files, register the selected sources and start watching.
    ///
    /// Any failure here (a missing required file, an unparsable file, an
    /// unknown remote kind, bad remote labels) aborts initialisation.
    pub async fn init(options: Options) -> TesseraResult<Self> {
        let files = Arc::new(FileSource::new());
        let present = existing_files(&options).await?;
        for path in &present {
            files
                .add_file(path, DEFAULT_FILE_PRIORITY, options.file_handler.clone())
                .await?;
            info!(path = %path.display(), "loaded configuration file");
        }

        let manager = ConfigManager::new();
        manager.add_source(files.clone()).await?;

        if let Some((kind, info)) = &options.remote_source {
            enable_remote(&manager, kind, info).await?;
        }
        if options.use_memory_source {
            manager.add_source(Arc::new(MemorySource::new())).await?;
        }
        if options.use_command_line_source {
            let cli = match &options.command_line_args {
                Some(args) => CommandLineSource::from_args(args.iter().cloned()),
                None => CommandLineSource::new(),
            };
            manager.add_source(Arc::new(cli)).await?;
        }
        if options.use_env_source {
            let env = match &options.env_prefix {
                Some(prefix) => EnvSource::new().with_prefix(prefix.clone()),
                None => EnvSource::new(),
            };
            manager.add_source(Arc::new(env)).await?;
        }

        info!(sources = ?manager.source_names().await, "tessera initialised");
        Ok(Self { manager, files })
    }

    pub fn manager(&self) -> &ConfigManager {
        &self.manager
    }

    /// Register a remote config center after initialisation; only one
    /// source per kind may be enabled
    pub async fn enable_remote_source(&self, kind: &str, info: &RemoteInfo) -> TesseraResult<()> {
        enable_remote(&self.manager, kind, info).await
    }

    pub async fn add_source(&self, source: Arc<dyn ConfigSource>) -> TesseraResult<()> {
        self.manager.add_source(source).await
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.manager.get_config(key)
    }

    pub fn get_value(&self, key: &str) -> cast::Value {
        cast::Value::new(key, self.manager.get_config(key))
    }

    pub fn exist(&self, key: &str) -> bool {
        self.manager.is_key_exist(key)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_value(key).to_bool().unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get_value(key).to_i32().unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get_value(key).to_i64().unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get_value(key).to_f64().unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get_value(key)
            .to_string()
            .unwrap_or_else(|_| default.to_string())
    }

    pub fn get_configs(&self) -> ConfigMap {
        self.manager.configs()
    }

    pub fn get_configs_with_source_names(&self) -> BTreeMap<String, SourcedValue> {
        self.manager.configs_with_source_names()
    }

    pub fn unmarshal_config<T>(&self, target: &mut T) -> TesseraResult<UnmarshalReport>
    where
        T: Serialize + DeserializeOwned,
    {
        self.manager.unmarshal(target)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> TesseraResult<()> {
        self.manager.marshal(writer)
    }

    pub async fn set(&self, key: &str, value: impl Into<ConfigValue>) -> TesseraResult<()> {
        self.manager.set(key, value.into()).await
    }

    pub async fn delete(&self, key: &str) -> TesseraResult<()> {
        self.manager.delete(key).await
    }

    /// Add a file at runtime and merge it in
    pub async fn add_file(&self, path: impl AsRef<Path>, handler: FileHandler) -> TesseraResult<()> {
        self.files
            .add_file(path, DEFAULT_FILE_PRIORITY, handler)
            .await?;
        self.manager.refresh(self.files.name()).await
    }

    pub fn register_listener(&self, listener: Arc<dyn Listener>, keys: &[&str]) -> TesseraResult<()> {
        self.manager.register_listener(listener, keys)
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn Listener>, keys: &[&str]) -> TesseraResult<()> {
        self.manager.unregister_listener(listener, keys)
    }

    pub fn register_matcher(&self, listener: Arc<dyn Listener>, matcher: KeyMatcher) -> TesseraResult<()> {
        self.manager.register_matcher(listener, matcher)
    }

    pub fn unregister_matcher(&self, listener: &Arc<dyn Listener>, matcher: &KeyMatcher) {
        self.manager.unregister_matcher(listener, matcher)
    }

    pub fn register_module_listener(
        &self,
        listener: Arc<dyn ModuleListener>,
        prefixes: &[&str],
    ) -> TesseraResult<()> {
        self.manager.register_module_listener(listener, prefixes)
    }

    pub fn unregister_module_listener(&self, listener: &Arc<dyn ModuleListener>, prefixes: &[&str]) {
        self.manager.unregister_module_listener(listener, prefixes)
    }

    /// Tear down every source; build a new instance to start over
    pub async fn clean(&self) -> TesseraResult<()> {
        self.manager.cleanup().await
    }
}

async fn enable_remote(manager: &ConfigManager, kind: &str, info: &RemoteInfo) -> TesseraResult<()> {
    let source = new_remote_source(kind, info)?;
    if manager.has_source(source.name()).await {
        return Err(TesseraError::AlreadyInitialized {
            component: format!("remote source '{}'", kind),
        });
    }
    manager.add_source(source).await
}

/// Required files in order, then the optional files that exist.
///
/// Existence is checked concurrently; files are still added in the order
/// given so equal-priority ties stay deterministic.
async fn existing_files(options: &Options) -> TesseraResult<Vec<PathBuf>> {
    let required = &options.required_files;
    let optional = &options.optional_files;
    let candidates: Vec<(&PathBuf, bool)> = required
        .iter()
        .map(|p| (p, true))
        .chain(optional.iter().map(|p| (p, false)))
        .collect();

    let checked = concurrent(candidates.len(), FILE_LOAD_CONCURRENCY, |i| {
        let (path, is_required) = candidates[i];
        async move {
            match tokio::fs::metadata(path).await {
                Ok(_) => Ok(Some(path.clone())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if is_required {
                        Err(TesseraError::FileNotFound {
                            path: path.display().to_string(),
                        })
                    } else {
                        info!(path = %path.display(), "optional configuration file not found");
                        Ok(None)
                    }
                }
                Err(e) => Err(TesseraError::IoError(e)),
            }
        }
    })
    .await?;

    Ok(checked.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::remote::LABEL_APP;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_required_file_must_exist() {
        let dir = TempDir::new().unwrap();
        let result = Tessera::init(Options::new().with_required_file(dir.path().join("nope.yaml"))).await;
        assert!(matches!(result, Err(TesseraError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_optional_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app.yaml");
        fs::write(&app, "server:\n  port: 8080\n  debug: \"true\"\n").unwrap();

        let tessera = Tessera::init(
            Options::new()
                .with_required_file(&app)
                .with_optional_file(dir.path().join("missing.yaml")),
        )
        .await
        .unwrap();

        assert_eq!(tessera.get_int("server.port", 0), 8080);
        assert!(tessera.get_bool("server.debug", false));
        assert_eq!(tessera.get_string("server.name", "fallback"), "fallback");
        assert_eq!(tessera.get_i64("server.debug", -1), -1);
        tessera.clean().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_overrides_files() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app.json");
        fs::write(&app, r#"{"level": "info"}"#).unwrap();

        let tessera = Tessera::init(
            Options::new()
                .with_required_file(&app)
                .with_memory_source()
                .with_command_line_args(["--level=warn"]),
        )
        .await
        .unwrap();
        assert_eq!(tessera.get_string("level", ""), "warn");

        tessera.set("level", "debug").await.unwrap();
        assert_eq!(tessera.get("level"), Some(json!("debug")));
        assert_eq!(
            tessera.get_configs_with_source_names()["level"].source_name,
            crate::source::memory::MEMORY_SOURCE_NAME
        );

        tessera.delete("level").await.unwrap();
        assert_eq!(tessera.get_string("level", ""), "warn");
        tessera.clean().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_file_and_unmarshal() {
        #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
        struct Server {
            port: u16,
            host: String,
        }

        let dir = TempDir::new().unwrap();
        let tessera = Tessera::init(Options::new()).await.unwrap();
        assert!(!tessera.exist("port"));

        let extra = dir.path().join("server.toml");
        fs::write(&extra, "port = 9090\nhost = \"example\"\n").unwrap();
        tessera.add_file(&extra, FileHandler::Flatten).await.unwrap();

        let mut server = Server::default();
        let report = tessera.unmarshal_config(&mut server).unwrap();
        assert!(report.is_clean());
        assert_eq!(
            server,
            Server {
                port: 9090,
                host: "example".to_string(),
            }
        );
        tessera.clean().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_remote_source_aborts_init() {
        let info = RemoteInfo {
            labels: Some(HashMap::from([(LABEL_APP.to_string(), "shop".to_string())])),
            ..RemoteInfo::default()
        };
        let result = Tessera::init(Options::new().with_remote_source("etcd", info)).await;
        assert!(matches!(result, Err(TesseraError::UnsupportedRemoteSource { .. })));
    }
}
