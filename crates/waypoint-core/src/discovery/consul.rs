//! Reference [`ServiceDiscovery`] implementation backed by a Consul-compatible
//! catalog API, addressed by a `consul://host:port` URI (only `host` is used
//! for client configuration, per the discovery contract).

use super::{ServiceDiscovery, ServiceRegistrationRequest, Snapshot, Watcher, GATEWAY_TAG};
use crate::error::DiscoveryError;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const LONG_POLL_WAIT: &str = "15s";
const ERROR_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: HealthService,
}

#[derive(Debug, Deserialize)]
struct HealthService {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

/// Consul-backed [`ServiceDiscovery`]. Holds a `reqwest::Client` and the
/// resolved `scheme://host:port` base address of the agent's HTTP API.
#[derive(Clone)]
pub struct ConsulServiceDiscovery {
    client: Client,
    base: Url,
    closed: Arc<AtomicBool>,
}

impl ConsulServiceDiscovery {
    /// Creates a client for the registry addressed by `uri`
    /// (`consul://host:port`). Only the host portion is used; the HTTP API is
    /// always addressed over plain HTTP on the given port.
    pub fn new(uri: &str) -> Result<Self, DiscoveryError> {
        let parsed = Url::parse(uri).map_err(|e| DiscoveryError::InvalidUri(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| DiscoveryError::InvalidUri("missing host".to_string()))?;
        let port = parsed.port().unwrap_or(8500);
        let base = Url::parse(&format!("http://{}:{}", host, port))
            .map_err(|e| DiscoveryError::InvalidUri(e.to_string()))?;

        info!("connecting to consul at {}", base);
        Ok(Self {
            client: Client::builder()
                .build()
                .expect("failed to build discovery http client"),
            base,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn agent_url(&self, path: &str) -> Url {
        self.base.join(path).expect("static path always joins")
    }

    async fn catalog_services(&self, wait_index: u64) -> Result<(u64, Vec<String>), DiscoveryError> {
        let url = self.agent_url(&format!(
            "/v1/catalog/services?index={}&wait={}",
            wait_index, LONG_POLL_WAIT
        ));
        let response = self.client.get(url).send().await?;
        let index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(wait_index);
        let body: HashMap<String, Vec<String>> = response.json().await?;
        // The catalog reports every service regardless of tag; only the ones
        // carrying the gateway tag are ever candidates for a route.
        let services = body
            .into_iter()
            .filter(|(_, tags)| tags.iter().any(|t| t == GATEWAY_TAG))
            .map(|(name, _)| name)
            .collect();
        Ok((index, services))
    }

    async fn resolve_backends(&self, service: &str) -> Result<Vec<Url>, DiscoveryError> {
        let url = self.agent_url(&format!(
            "/v1/health/service/{}?tag={}&passing=true",
            service, GATEWAY_TAG
        ));
        let entries: Vec<HealthEntry> = self.client.get(url).send().await?.json().await?;
        entries
            .into_iter()
            .map(|entry| {
                Url::parse(&format!("http://{}:{}", entry.service.address, entry.service.port))
                    .map_err(|e| DiscoveryError::MalformedResponse(e.to_string()))
            })
            .collect()
    }

    async fn build_snapshot(&self, services: &[String]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for name in services {
            match self.resolve_backends(name).await {
                Ok(backends) => {
                    snapshot.insert(name.clone(), backends);
                }
                Err(e) => {
                    warn!("could not retrieve backends for {}: {}", name, e);
                }
            }
        }
        snapshot
    }

    /// Passes the TTL check of a service registered with a TTL (not part of
    /// the discovery contract; only meaningful for TTL-mode registrations,
    /// called by the registry client's heartbeat task).
    pub async fn heartbeat(&self, id: &str) -> Result<(), DiscoveryError> {
        let url = self.agent_url(&format!("/v1/agent/check/pass/service:{}", id));
        self.client.put(url).send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ServiceDiscovery for ConsulServiceDiscovery {
    async fn register(&self, request: ServiceRegistrationRequest) -> Result<String, DiscoveryError> {
        let id = if request.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            request.id.clone()
        };

        let mut check = serde_json::json!({});
        if let Some(path) = &request.health_check_path {
            check["HTTP"] = serde_json::json!(format!("http://{}:{}{}", request.address, request.port, path));
            check["Interval"] = serde_json::json!("30s");
        } else if request.ttl > 0 {
            check["TTL"] = serde_json::json!(format!("{}s", request.ttl + 2));
        }

        let body = serde_json::json!({
            "ID": id,
            "Name": request.name,
            "Address": request.address,
            "Port": request.port,
            "Tags": [GATEWAY_TAG],
            "Check": check,
        });

        let url = self.agent_url("/v1/agent/service/register");
        self.client.put(url).json(&body).send().await?.error_for_status()?;
        debug!("registered service {} ({})", request.name, id);
        Ok(id)
    }

    async fn unregister(&self, id: &str) -> Result<(), DiscoveryError> {
        let url = self.agent_url(&format!("/v1/agent/service/deregister/{}", id));
        self.client.put(url).send().await?.error_for_status()?;
        Ok(())
    }

    fn watch(&self, watcher: Watcher) {
        let discovery = self.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let mut wait_index: u64 = 0;
            while !closed.load(Ordering::Relaxed) {
                match discovery.catalog_services(wait_index).await {
                    Ok((new_index, services)) => {
                        if new_index == wait_index {
                            // Wait timed out, no change.
                            continue;
                        }
                        let snapshot = discovery.build_snapshot(&services).await;
                        watcher(snapshot);
                        wait_index = new_index;
                    }
                    Err(e) => {
                        warn!("failed to list services from registry: {}", e);
                        tokio::time::sleep(ERROR_RETRY_DELAY).await;
                    }
                }
            }
        });
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use wiremock::matchers::{method as wm_method, path as wm_path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn discovery_for(server: &MockServer) -> ConsulServiceDiscovery {
        ConsulServiceDiscovery::new(&server.uri().replace("http://", "consul://")).unwrap()
    }

    #[tokio::test]
    async fn catalog_services_filters_to_gateway_tagged_names_and_reads_the_index_header() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(wm_path("/v1/catalog/services"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Consul-Index", "42")
                    .set_body_json(serde_json::json!({ "api": ["mag"], "consul": [] })),
            )
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        let (index, services) = discovery.catalog_services(0).await.unwrap();
        assert_eq!(index, 42);
        // "consul" carries no tags and is never a candidate route.
        assert_eq!(services, vec!["api".to_string()]);
    }

    #[tokio::test]
    async fn resolve_backends_filters_to_passing_instances_with_the_gateway_tag() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(wm_path("/v1/health/service/api"))
            .and(query_param("tag", GATEWAY_TAG))
            .and(query_param("passing", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "Service": { "Address": "10.0.0.1", "Port": 9000 } }
            ])))
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        let backends = discovery.resolve_backends("api").await.unwrap();
        assert_eq!(backends, vec![Url::parse("http://10.0.0.1:9000").unwrap()]);
    }

    #[tokio::test]
    async fn heartbeat_passes_the_ttl_check() {
        let server = MockServer::start().await;
        Mock::given(wm_method("PUT"))
            .and(wm_path("/v1/agent/check/pass/service:svc-1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        discovery.heartbeat("svc-1").await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_surfaces_a_non_2xx_response_as_an_error() {
        let server = MockServer::start().await;
        Mock::given(wm_method("PUT"))
            .and(wm_path("/v1/agent/check/pass/service:missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        assert!(discovery.heartbeat("missing").await.is_err());
    }

    #[tokio::test]
    async fn register_sends_ttl_check_when_no_health_check_path_is_given() {
        let server = MockServer::start().await;
        let seen_body: Arc<StdMutex<Option<serde_json::Value>>> = Arc::new(StdMutex::new(None));
        let captured = seen_body.clone();

        Mock::given(wm_method("PUT"))
            .and(wm_path("/v1/agent/service/register"))
            .respond_with(move |req: &wiremock::Request| {
                *captured.lock().unwrap() = serde_json::from_slice(&req.body).ok();
                ResponseTemplate::new(200)
            })
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        let id = discovery
            .register(ServiceRegistrationRequest {
                name: "api".to_string(),
                address: "10.0.0.5".to_string(),
                port: 9000,
                ttl: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(!id.is_empty());
        let body = seen_body.lock().unwrap().clone().expect("request body captured");
        assert_eq!(body["Check"]["TTL"], "12s");
        assert_eq!(body["Tags"], serde_json::json!([GATEWAY_TAG]));
    }

    // Scenario 6 from the design notes ("registry flap"): the catalog
    // endpoint errors a few times in a row, then recovers with the same
    // index it last reported. `watch` should retry through the errors and
    // must not invoke the watcher again once the index is unchanged.
    #[tokio::test]
    async fn watch_retries_through_transient_errors_and_skips_unchanged_snapshots() {
        let server = MockServer::start().await;

        Mock::given(wm_method("GET"))
            .and(wm_path("/v1/catalog/services"))
            .and(query_param("index", "0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Consul-Index", "7")
                    .set_body_json(serde_json::json!({ "api": ["mag"], "consul": [] })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(wm_method("GET"))
            .and(wm_path("/v1/catalog/services"))
            .and(query_param("index", "7"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(3)
            .mount(&server)
            .await;

        Mock::given(wm_method("GET"))
            .and(wm_path("/v1/health/service/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        let calls: Arc<StdMutex<Vec<Snapshot>>> = Arc::new(StdMutex::new(Vec::new()));
        let recorded = calls.clone();
        discovery.watch(Box::new(move |snapshot| {
            recorded.lock().unwrap().push(snapshot);
        }));

        // Long enough to observe the watcher come back after at least one
        // `ERROR_RETRY_DELAY` (2s) pause following the 500 responses.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        discovery.close();

        let requests = server.received_requests().await.unwrap();
        assert!(
            requests.len() >= 2,
            "expected the watcher to retry past the 500s, saw {} requests",
            requests.len()
        );
        // Only the first, index-changing response produced a callback; the
        // following errors were retried silently with no further callback.
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        // "consul" carries no gateway tag and never becomes a route.
        let snapshot = &calls[0];
        assert!(snapshot.contains_key("api"));
        assert!(!snapshot.contains_key("consul"));
    }
}
