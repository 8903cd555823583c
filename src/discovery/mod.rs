//! Service discovery
//!
//! This module provides:
//! - [`ServiceDiscovery`] - the snapshot interface the pool consumes
//! - [`StaticDiscovery`] - fixed address list
//! - [`ConsulDiscovery`] - Consul health API
//! - [`Driver`] / [`TransportProtocol`] - construction-time enums
//!
//! A discovery adapter answers one question: "which addresses currently
//! exist for this service name?". The pool reconciles its partitions
//! against that snapshot; how the snapshot is produced is the adapter's
//! business.

mod consul;
mod driver;
mod error;
mod static_list;
mod transport;

pub use consul::ConsulDiscovery;
pub use driver::Driver;
pub use error::DiscoveryError;
pub use static_list::StaticDiscovery;
pub use transport::{normalize_path_slashes, TransportProtocol};

use std::sync::Arc;

use async_trait::async_trait;

use crate::service::Service;

/// Snapshot interface the pool consumes.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Return the current set of workers for the given service name.
    ///
    /// Static adapters may return an empty snapshot with `Ok`; registry
    /// adapters signal empty as [`DiscoveryError::ServiceNotFound`].
    async fn discover(&self, service: &str) -> Result<Vec<Arc<dyn Service>>, DiscoveryError>;
}

/// Adapter construction options.
///
/// Reserved: no adapter currently consumes the optional path, but the field
/// travels through construction so callers keep a stable signature.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOpts {
    /// Optional probe path, reserved for future adapters.
    pub optional_path: Option<String>,
}

impl DiscoveryOpts {
    pub fn new(optional_path: Option<String>) -> Self {
        Self { optional_path }
    }
}

/// Construct the discovery adapter for the given driver.
pub fn new_discovery(
    driver: Driver,
    transport: TransportProtocol,
    opts: DiscoveryOpts,
    addresses: &[String],
) -> Result<Arc<dyn ServiceDiscovery>, DiscoveryError> {
    match driver {
        Driver::Consul => Ok(Arc::new(ConsulDiscovery::new(transport, opts, addresses)?)),
        Driver::Static => Ok(Arc::new(StaticDiscovery::new(transport, opts, addresses))),
    }
}
