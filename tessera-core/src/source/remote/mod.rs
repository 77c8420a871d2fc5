//! Remote configuration-center sources

pub mod kie;

use super::ConfigSource;
use crate::error::{TesseraError, TesseraResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const LABEL_APP: &str = "app";
pub const LABEL_ENVIRONMENT: &str = "environment";
pub const LABEL_SERVICE: &str = "service";
pub const LABEL_VERSION: &str = "version";

pub const KIE_REMOTE_KIND: &str = "kie";

/// Connection settings for a remote configuration center
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteInfo {
    /// Base URL of the config center
    pub url: String,

    /// Client labels, `app` is mandatory
    pub labels: Option<HashMap<String, String>>,

    /// Project the documents live under
    pub tenant_name: String,

    /// Poll period while watched
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RemoteInfo {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:30110".to_string(),
            labels: None,
            tenant_name: "default".to_string(),
            refresh_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Build the remote source registered under `kind`
pub fn new_remote_source(kind: &str, info: &RemoteInfo) -> TesseraResult<Arc<dyn ConfigSource>> {
    match kind {
        KIE_REMOTE_KIND => Ok(Arc::new(kie::KieSource::new(info)?)),
        other => Err(TesseraError::UnsupportedRemoteSource {
            kind: other.to_string(),
        }),
    }
}
