use super::client::{KieClient, RemoteClient};
use super::dimension::{generate_labels, DimensionMerger, DimensionName};
use crate::error::{TesseraError, TesseraResult};
use crate::source::remote::RemoteInfo;
use crate::source::{diff_snapshots, ConfigSource, UpdateSender, REMOTE_SOURCE_PRIORITY};
use crate::util::concurrent;
use crate::ConfigMap;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const KIE_SOURCE_NAME: &str = "KieSource";

/// Dimensions the source queries, broadest first
const QUERIED_DIMENSIONS: [DimensionName; 2] = [DimensionName::App, DimensionName::Service];

struct KieState {
    client: Arc<dyn RemoteClient>,
    dimensions: Vec<(DimensionName, HashMap<String, String>)>,
    current: RwLock<ConfigMap>,
}

impl KieState {
    /// Fetch every queried dimension and flatten them by precedence
    async fn pull(&self) -> TesseraResult<ConfigMap> {
        let responses = concurrent(self.dimensions.len(), self.dimensions.len(), |i| {
            let client = self.client.clone();
            let labels = self.dimensions[i].1.clone();
            async move { client.list(&labels).await }
        })
        .await?;

        let mut merger =
            DimensionMerger::with_precedence(self.dimensions.iter().map(|(d, _)| *d).collect());
        for ((dimension, _), response) in self.dimensions.iter().zip(responses.iter()) {
            merger.set_dimension_configs(response, *dimension)?;
        }
        Ok(merger.merge())
    }
}

struct Poller {
    shutdown_tx: mpsc::Sender<()>,
    task_handle: JoinHandle<()>,
}

/// Remote source backed by a kie-style config center.
///
/// Every pull queries the App and Service dimensions and merges them so
/// that service-scoped values override application-wide ones. When watched,
/// a background task polls on `refresh_interval` and pushes differences;
/// failed polls are logged and retried on the next tick.
pub struct KieSource {
    priority: i32,
    refresh_interval: Duration,
    state: Arc<KieState>,
    poller: Mutex<Option<Poller>>,
}

impl KieSource {
    pub fn new(info: &RemoteInfo) -> TesseraResult<Self> {
        let client = KieClient::new(&info.url, &info.tenant_name, info.request_timeout)?;
        Self::with_client(info, Arc::new(client))
    }

    /// Build with any transport; labels and the refresh interval are
    /// validated up front
    pub fn with_client(info: &RemoteInfo, client: Arc<dyn RemoteClient>) -> TesseraResult<Self> {
        if info.refresh_interval.is_zero() {
            return Err(TesseraError::invalid_configuration(
                "remote refresh_interval must be greater than zero",
            ));
        }
        let dimensions = QUERIED_DIMENSIONS
            .iter()
            .map(|d| generate_labels(*d, info.labels.as_ref()).map(|labels| (*d, labels)))
            .collect::<TesseraResult<Vec<_>>>()?;
        Ok(Self {
            priority: REMOTE_SOURCE_PRIORITY,
            refresh_interval: info.refresh_interval,
            state: Arc::new(KieState {
                client,
                dimensions,
                current: RwLock::new(ConfigMap::new()),
            }),
            poller: Mutex::new(None),
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn labels(&self, dimension: DimensionName) -> Option<&HashMap<String, String>> {
        self.state
            .dimensions
            .iter()
            .find(|(d, _)| *d == dimension)
            .map(|(_, labels)| labels)
    }
}

async fn poll_loop(
    state: Arc<KieState>,
    updates: UpdateSender,
    interval: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; the initial pull already happened
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let latest = match state.pull().await {
                    Ok(latest) => latest,
                    Err(e) => {
                        warn!("remote config poll failed: {}", e);
                        continue;
                    }
                };
                let events = {
                    let mut current = state.current.write();
                    let events = diff_snapshots(updates.source_name(), &current, &latest);
                    *current = latest;
                    events
                };
                if events.is_empty() {
                    continue;
                }
                debug!(count = events.len(), "remote config changed");
                if !updates.send(events) {
                    info!("manager gone, remote poller exiting");
                    break;
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("remote poller shutting down");
                break;
            }
        }
    }
}

#[async_trait]
impl ConfigSource for KieSource {
    fn name(&self) -> &str {
        KIE_SOURCE_NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn configurations(&self) -> TesseraResult<ConfigMap> {
        let latest = self.state.pull().await?;
        *self.state.current.write() = latest.clone();
        Ok(latest)
    }

    fn watch(&self, updates: UpdateSender) -> TesseraResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            crate::error::TesseraError::Watcher {
                message: format!("remote polling needs a tokio runtime: {}", e),
            }
        })?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task_handle = runtime.spawn(poll_loop(
            self.state.clone(),
            updates,
            self.refresh_interval,
            shutdown_rx,
        ));
        if let Some(previous) = self.poller.lock().replace(Poller {
            shutdown_tx,
            task_handle,
        }) {
            previous.task_handle.abort();
        }
        info!(interval = ?self.refresh_interval, "remote config polling started");
        Ok(())
    }

    async fn cleanup(&self) -> TesseraResult<()> {
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            let _ = poller.shutdown_tx.send(()).await;
            let _ = poller.task_handle.await;
        }
        self.state.current.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TesseraError;
    use crate::source::remote::kie::dimension::{KvDoc, KvResponse};
    use crate::source::remote::{LABEL_APP, LABEL_SERVICE};
    use serde_json::json;

    /// Serves documents keyed by whether the label set carries a service
    struct StaticClient {
        app: Mutex<Vec<KvDoc>>,
        service: Mutex<Vec<KvDoc>>,
    }

    #[async_trait]
    impl RemoteClient for StaticClient {
        async fn list(&self, labels: &HashMap<String, String>) -> TesseraResult<KvResponse> {
            let data = if labels.contains_key(LABEL_SERVICE) {
                self.service.lock().clone()
            } else {
                self.app.lock().clone()
            };
            Ok(KvResponse {
                total: data.len() as u64,
                data,
            })
        }
    }

    fn info() -> RemoteInfo {
        RemoteInfo {
            labels: Some(HashMap::from([
                (LABEL_APP.to_string(), "shop".to_string()),
                (LABEL_SERVICE.to_string(), "cart".to_string()),
            ])),
            refresh_interval: Duration::from_millis(20),
            ..RemoteInfo::default()
        }
    }

    #[tokio::test]
    async fn test_service_overrides_app() {
        let client = Arc::new(StaticClient {
            app: Mutex::new(vec![KvDoc::enabled("foo", "app"), KvDoc::enabled("bar", "app")]),
            service: Mutex::new(vec![KvDoc::enabled("foo", "service")]),
        });
        let source = KieSource::with_client(&info(), client).unwrap();
        let configs = source.configurations().await.unwrap();
        assert_eq!(configs["foo"], json!("service"));
        assert_eq!(configs["bar"], json!("app"));
        assert_eq!(source.labels(DimensionName::Service).unwrap()[LABEL_SERVICE], "cart");
    }

    #[tokio::test]
    async fn test_missing_app_label_fails_construction() {
        let client = Arc::new(StaticClient {
            app: Mutex::new(Vec::new()),
            service: Mutex::new(Vec::new()),
        });
        let mut bad = info();
        bad.labels = None;
        assert!(matches!(
            KieSource::with_client(&bad, client.clone()),
            Err(TesseraError::LabelsNil)
        ));
        bad.labels = Some(HashMap::new());
        assert!(matches!(
            KieSource::with_client(&bad, client),
            Err(TesseraError::AppEmpty)
        ));
    }

    #[tokio::test]
    async fn test_zero_refresh_interval_is_rejected() {
        let client = Arc::new(StaticClient {
            app: Mutex::new(Vec::new()),
            service: Mutex::new(Vec::new()),
        });
        let mut bad = info();
        bad.refresh_interval = Duration::ZERO;
        assert!(matches!(
            KieSource::with_client(&bad, client),
            Err(TesseraError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_polling_pushes_changes() {
        let client = Arc::new(StaticClient {
            app: Mutex::new(vec![KvDoc::enabled("foo", "1")]),
            service: Mutex::new(Vec::new()),
        });
        let source = KieSource::with_client(&info(), client.clone()).unwrap();
        source.configurations().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        source.watch(UpdateSender::new(KIE_SOURCE_NAME, tx)).unwrap();
        *client.app.lock() = vec![KvDoc::enabled("foo", "2")];

        let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.events.len(), 1);
        assert_eq!(update.events[0].value, Some(json!("2")));

        source.cleanup().await.unwrap();
    }
}
