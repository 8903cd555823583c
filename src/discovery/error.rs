//! Discovery errors

use thiserror::Error;

use crate::discovery::Driver;

/// Errors surfaced by discovery adapters and their construction.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The adapter could not reach its backing source. The discovery loop
    /// logs this and retries on the next tick.
    #[error("discover {service} services: {source}")]
    Failure {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    /// The registry is reachable but knows no passing instances of the
    /// service. Registry-backed adapters use this to distinguish "no
    /// workers" from a transport failure.
    #[error("service {0:?} not found")]
    ServiceNotFound(String),

    /// Unknown discovery driver name. Construction only.
    #[error("unsupported discovery driver {0:?}")]
    UnsupportedDriver(String),

    /// Unknown transport protocol name. Construction only.
    #[error("unsupported transport protocol {0:?}")]
    UnsupportedTransport(String),

    /// Wrong number of addresses for the chosen driver. Construction only.
    #[error("{length} is invalid arguments length to create new {driver} discovery")]
    InvalidArgumentsLength { length: usize, driver: Driver },
}
