//! # Prover Pool
//!
//! A liveness-tracking service pool for fleets of homogeneous backend
//! workers, the canonical case being remote provers tagged by the work
//! classes they accept.
//!
//! ## Features
//!
//! - **Curated inventory**: workers are partitioned into a healthy list
//!   and a jail map; periodic health checks move them between the two
//! - **Bounded recovery**: jailed workers are retried on an interval and
//!   dropped once the try-up budget is exhausted
//! - **Discovery reconciliation**: the pool converges on the latest
//!   snapshot from a static list or a Consul registry
//! - **Four selection policies**: round-robin, any-by-tag, least loaded
//!   by scalar, least loaded by structured prover load
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ServicesPool                          │
//! │  (discovery loop, reconciliation, user callbacks)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ServicesList                          │
//! │  (healthy + jail partitions, health checks, try-up,         │
//! │   selection policies)                                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service (workers)                       │
//! │  (BaseService from discovery, Prover over HTTP)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use prover_pool::prelude::*;
//!
//! let pool = ServicesPool::new(
//!     ServicesPoolOpts::new("example").with_list_opts(
//!         ServicesListOpts::new()
//!             .with_try_up_tries(5)
//!             .with_try_up_interval(Duration::from_secs(5))
//!             .with_checks_interval(Duration::from_secs(5)),
//!     ),
//! )?;
//!
//! pool.start(true);
//!
//! // When a prover registers with the pool service:
//! let prover = Prover::new(ProverOpts {
//!     name: "example-prover-1".to_string(),
//!     addr: "127.0.0.1:8080".to_string(),
//!     healthcheck: prover_mock_healthcheck(Duration::from_secs(10)),
//!     tags: ["fork1".to_string(), "public".to_string()].into_iter().collect(),
//! })?;
//!
//! pool.add_service(Arc::new(prover)).await;
//!
//! // When work arrives:
//! let srv = pool.next_least_loaded("fork1").expect("no prover available");
//! ```

pub mod discovery;
pub mod pool;
pub mod prover;
pub mod service;

/// Prelude for common imports
pub mod prelude {
    pub use crate::discovery::{
        Driver, DiscoveryError, DiscoveryOpts, ServiceDiscovery, StaticDiscovery,
        TransportProtocol,
    };
    pub use crate::pool::{
        healthcheck_with_retry, PoolError, ProbeError, ServicesList, ServicesListOpts,
        ServicesPool, ServicesPoolOpts,
    };
    pub use crate::prover::{prover_mock_healthcheck, Prover, ProverOpts};
    pub use crate::service::{
        BaseService, HealthCheckError, ProverLoad, ProverStatus, Service, ServiceStatus,
    };
}

// Re-export key types at crate root
pub use discovery::{Driver, DiscoveryError, ServiceDiscovery, TransportProtocol};
pub use pool::{PoolError, ServicesList, ServicesListOpts, ServicesPool, ServicesPoolOpts};
pub use prover::{Prover, ProverOpts};
pub use service::{ProverLoad, ProverStatus, Service, ServiceStatus};
