//! Config-center HTTP client

use super::dimension::KvResponse;
use crate::error::{TesseraError, TesseraResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::trace;

/// Transport used by the remote source to list documents for one label set
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn list(&self, labels: &HashMap<String, String>) -> TesseraResult<KvResponse>;
}

/// Lists key/value documents from a kie-compatible config center
#[derive(Debug, Clone)]
pub struct KieClient {
    http: reqwest::Client,
    endpoint: String,
}

impl KieClient {
    pub fn new(server_uri: &str, project: &str, timeout: Duration) -> TesseraResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TesseraError::remote("build http client", e))?;
        let project = if project.is_empty() { "default" } else { project };
        Ok(Self {
            http,
            endpoint: format!("{}/v1/{}/kie/kv", server_uri.trim_end_matches('/'), project),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `label=k:v` query pairs, sorted for stable requests
pub(crate) fn label_query(labels: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut query: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| ("label".to_string(), format!("{}:{}", k, v)))
        .collect();
    query.sort();
    query.push(("match".to_string(), "exact".to_string()));
    query
}

#[async_trait]
impl RemoteClient for KieClient {
    async fn list(&self, labels: &HashMap<String, String>) -> TesseraResult<KvResponse> {
        trace!(endpoint = %self.endpoint, ?labels, "listing remote documents");
        let response = self
            .http
            .get(&self.endpoint)
            .query(&label_query(labels))
            .send()
            .await
            .map_err(|e| TesseraError::remote("list kv", e))?
            .error_for_status()
            .map_err(|e| TesseraError::remote("list kv", e))?;
        response
            .json::<KvResponse>()
            .await
            .map_err(|e| TesseraError::remote("decode kv response", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_and_query() {
        let client = KieClient::new("http://127.0.0.1:30110/", "", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:30110/v1/default/kie/kv");

        let labels = HashMap::from([
            ("environment".to_string(), "prod".to_string()),
            ("app".to_string(), "shop".to_string()),
        ]);
        assert_eq!(
            label_query(&labels),
            vec![
                ("label".to_string(), "app:shop".to_string()),
                ("label".to_string(), "environment:prod".to_string()),
                ("match".to_string(), "exact".to_string()),
            ]
        );
    }

    #[test]
    fn test_decode_response_shape() {
        let body = r#"{"data":[{"key":"foo","value":"1","status":"enabled","labels":{"app":"shop"}}],"total":1}"#;
        let response: KvResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.total, 1);
        assert!(response.data[0].is_enabled());
    }
}
