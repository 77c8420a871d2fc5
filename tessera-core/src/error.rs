use thiserror::Error;

#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("Source already exists: {name}")]
    SourceAlreadyExists { name: String },

    #[error("Source not found: {name}")]
    SourceNotFound { name: String },

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("No writable memory source registered")]
    NoWritableSource,

    #[error("Source {source_name} does not support watching")]
    WatchUnsupported { source_name: String },

    #[error("Configuration manager has been cleaned up")]
    ManagerClosed,

    #[error("Already initialized: {component}")]
    AlreadyInitialized { component: String },

    #[error("labels can not be nil")]
    LabelsNil,

    #[error("app can not be empty")]
    AppEmpty,

    #[error("do not support dimension {dimension}")]
    UnsupportedDimension { dimension: String },

    #[error("do not support remote source: {kind}")]
    UnsupportedRemoteSource { kind: String },

    #[error("Invalid key pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Cannot cast {value} to {target}")]
    Cast { value: String, target: &'static str },

    #[error("Remote operation '{operation}' failed")]
    Remote {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Watcher error: {message}")]
    Watcher { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, TesseraError>;
pub type TesseraResult<T> = std::result::Result<T, TesseraError>;

impl TesseraError {
    pub fn key_not_found(key: impl Into<String>) -> Self {
        TesseraError::KeyNotFound { key: key.into() }
    }

    pub fn source_not_found(name: impl Into<String>) -> Self {
        TesseraError::SourceNotFound { name: name.into() }
    }

    pub fn watch_unsupported(source_name: impl Into<String>) -> Self {
        TesseraError::WatchUnsupported {
            source_name: source_name.into(),
        }
    }

    pub fn parse(path: impl Into<String>, message: impl ToString) -> Self {
        TesseraError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a Remote error with a boxed source
    pub fn remote<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        TesseraError::Remote {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a Serialization error with a boxed source
    pub fn serialization<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        TesseraError::Serialization {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        TesseraError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Absence is not a failure for typed getters; they substitute defaults.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TesseraError::KeyNotFound { .. })
    }
}
