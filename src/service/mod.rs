//! Worker model for the pool
//!
//! This module provides:
//! - [`Service`] - the capability set every pooled worker exposes
//! - [`BaseService`] - the baseline worker produced by discovery adapters
//! - [`ServiceStatus`] - the two-state health flag
//! - [`ProverLoad`] / [`ProverStatus`] - the structured load descriptor
//!
//! A worker's identity is the hex SHA-256 of its address: two workers with
//! the same address are the same worker. Concrete worker types (see the
//! `prover` module) are produced from a [`BaseService`] by the pool's
//! mutation function and extend the base by composition.

mod base;
mod error;
mod load;
mod status;

pub use base::{service_id, BaseService};
pub use error::{HealthCheckError, ServiceError};
pub use load::{AtomicLoad, ProverLoad, ProverStatus};
pub use status::{AtomicServiceStatus, ServiceStatus};

use std::collections::HashSet;

use async_trait::async_trait;

/// Capability set of a pooled worker.
///
/// The pool only ever holds workers as `Arc<dyn Service>`; everything the
/// selection engine needs goes through this trait. Status and scalar load
/// must be readable outside the pool's own lock, so implementations keep
/// them in atomics ([`AtomicServiceStatus`], [`AtomicLoad`]). Tag sets are
/// immutable after construction.
#[async_trait]
pub trait Service: Send + Sync {
    /// Probe the worker.
    ///
    /// On success the implementation must set its status to
    /// [`ServiceStatus::Healthy`]; on failure it sets
    /// [`ServiceStatus::Unhealthy`] and returns the error.
    async fn health_check(&self) -> Result<(), HealthCheckError>;

    /// Current status.
    fn status(&self) -> ServiceStatus;

    /// Overwrite the status.
    fn set_status(&self, status: ServiceStatus);

    /// Stable id: hex SHA-256 of the address.
    fn id(&self) -> &str;

    /// Transport endpoint.
    fn address(&self) -> &str;

    /// Node label reported by discovery.
    fn node_name(&self) -> &str;

    /// Work classes this worker accepts.
    fn tags(&self) -> &HashSet<String>;

    /// Scalar load in `[0.0, 1.0]`; lower is less loaded.
    fn load(&self) -> f32;

    /// Overwrite the scalar load.
    fn set_load(&self, load: f32);

    /// Structured load descriptor; `None` means unknown and the
    /// prover-specific selection policy skips the worker.
    fn prover_load(&self) -> Option<ProverLoad>;

    /// Overwrite the structured load descriptor.
    fn set_prover_load(&self, load: ProverLoad);

    /// Release transport resources. Must be idempotent; callers log
    /// errors and never propagate them.
    async fn close(&self) -> Result<(), ServiceError>;
}
