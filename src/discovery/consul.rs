//! Consul-backed discovery

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::discovery::{
    normalize_path_slashes, DiscoveryError, DiscoveryOpts, Driver, ServiceDiscovery,
    TransportProtocol,
};
use crate::service::{BaseService, Service};

const DEFAULT_CONSUL_ENDPOINT: &str = "http://127.0.0.1:8500";
const CONSUL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery backed by the Consul health API.
///
/// Each sweep queries `/v1/health/service/<name>?passing=true` and wraps
/// every passing instance as a [`BaseService`] at
/// `<scheme>://<address>:<port>` with the registry's node name attached.
pub struct ConsulDiscovery {
    client: reqwest::Client,
    endpoint: String,
    transport: TransportProtocol,
    #[allow(dead_code)]
    opts: DiscoveryOpts,
}

#[derive(Debug, Deserialize)]
struct ConsulServiceEntry {
    #[serde(rename = "Node")]
    node: ConsulNode,
    #[serde(rename = "Service")]
    service: ConsulService,
}

#[derive(Debug, Deserialize)]
struct ConsulNode {
    #[serde(rename = "Node")]
    node: String,
}

#[derive(Debug, Deserialize)]
struct ConsulService {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

impl ConsulDiscovery {
    /// Create a Consul discovery against the given agent endpoint.
    ///
    /// Exactly one address is expected; an empty string selects the local
    /// agent default.
    pub fn new(
        transport: TransportProtocol,
        opts: DiscoveryOpts,
        addresses: &[String],
    ) -> Result<Self, DiscoveryError> {
        if addresses.len() != 1 {
            return Err(DiscoveryError::InvalidArgumentsLength {
                length: addresses.len(),
                driver: Driver::Consul,
            });
        }

        let endpoint = if addresses[0].is_empty() {
            normalize_path_slashes(DEFAULT_CONSUL_ENDPOINT)
        } else {
            normalize_path_slashes(&addresses[0])
        };

        let client = reqwest::Client::builder()
            .timeout(CONSUL_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| DiscoveryError::Failure {
                service: "consul".to_string(),
                source: err.into(),
            })?;

        Ok(Self {
            client,
            endpoint,
            transport,
            opts,
        })
    }

    fn service_from_entry(&self, entry: ConsulServiceEntry) -> Arc<dyn Service> {
        let address = self.transport.format_address(&entry.service.address);
        Arc::new(BaseService::new(
            format!("{address}:{}", entry.service.port),
            entry.node.node,
            HashSet::new(),
        ))
    }
}

#[async_trait]
impl ServiceDiscovery for ConsulDiscovery {
    async fn discover(&self, service: &str) -> Result<Vec<Arc<dyn Service>>, DiscoveryError> {
        let url = format!("{}v1/health/service/{service}", self.endpoint);

        let entries: Vec<ConsulServiceEntry> = self
            .client
            .get(&url)
            .query(&[("passing", "true")])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| DiscoveryError::Failure {
                service: service.to_string(),
                source: err.into(),
            })?
            .json()
            .await
            .map_err(|err| DiscoveryError::Failure {
                service: service.to_string(),
                source: err.into(),
            })?;

        if entries.is_empty() {
            return Err(DiscoveryError::ServiceNotFound(service.to_string()));
        }

        Ok(entries
            .into_iter()
            .map(|entry| self.service_from_entry(entry))
            .collect())
    }
}
