//! Static discovery over a fixed address list

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::discovery::{DiscoveryError, DiscoveryOpts, ServiceDiscovery, TransportProtocol};
use crate::service::{BaseService, Service};

/// Discovery over a fixed list of addresses.
///
/// Every sweep returns the same snapshot: each configured address wrapped
/// as a [`BaseService`] with the transport's scheme applied. An empty
/// address list yields an empty snapshot, not an error.
#[derive(Debug)]
pub struct StaticDiscovery {
    addresses: Vec<String>,
    transport: TransportProtocol,
    #[allow(dead_code)]
    opts: DiscoveryOpts,
}

impl StaticDiscovery {
    /// Create a static discovery over the given addresses.
    pub fn new(transport: TransportProtocol, opts: DiscoveryOpts, addresses: &[String]) -> Self {
        Self {
            addresses: addresses.to_vec(),
            transport,
            opts,
        }
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn discover(&self, _service: &str) -> Result<Vec<Arc<dyn Service>>, DiscoveryError> {
        Ok(self
            .addresses
            .iter()
            .map(|addr| {
                Arc::new(BaseService::new(
                    self.transport.format_address(addr),
                    "",
                    HashSet::new(),
                )) as Arc<dyn Service>
            })
            .collect())
    }
}
