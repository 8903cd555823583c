//! Concrete prover worker

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::pool::{healthcheck_with_retry, mock_probe};
use crate::prover::client::{NodeClient, ProverClientError};
use crate::service::{
    service_id, AtomicLoad, AtomicServiceStatus, HealthCheckError, ProverLoad, Service,
    ServiceError, ServiceStatus,
};

/// Probe strategy injected into a [`Prover`].
///
/// Receives the prover as a [`Service`] so it can flip status and load as
/// it learns them; see [`crate::pool::healthcheck_with_retry`] for the
/// usual wrapper.
pub type ProverHealthcheck =
    Box<dyn for<'a> Fn(&'a dyn Service) -> BoxFuture<'a, Result<(), HealthCheckError>> + Send + Sync>;

/// Prover construction errors.
#[derive(Debug, Error)]
pub enum ProverError {
    /// Transport client construction or request failure.
    #[error(transparent)]
    Client(#[from] ProverClientError),
}

/// Configuration for a [`Prover`].
pub struct ProverOpts {
    /// Node name from discovery.
    pub name: String,
    /// Prover address.
    pub addr: String,
    /// Probe strategy.
    pub healthcheck: ProverHealthcheck,
    /// Work classes this prover accepts.
    pub tags: HashSet<String>,
}

/// A remote prover enrolled in the pool.
///
/// Extends the baseline worker shape with a real HTTP transport and an
/// injected probe strategy. Normally produced from a discovered baseline
/// worker by the pool's mutation function via [`Prover::from_service`].
pub struct Prover {
    id: String,
    addr: String,
    name: String,
    tags: HashSet<String>,

    status: AtomicServiceStatus,
    load: AtomicLoad,
    prover_load: RwLock<Option<ProverLoad>>,

    healthcheck: ProverHealthcheck,
    client: NodeClient,
}

impl Prover {
    /// Create a new prover from options.
    pub fn new(opts: ProverOpts) -> Result<Self, ProverError> {
        let client = NodeClient::new(&opts.addr)?;

        Ok(Self {
            id: service_id(&opts.addr),
            addr: opts.addr,
            name: opts.name,
            tags: opts.tags,
            status: AtomicServiceStatus::new(ServiceStatus::Unhealthy),
            load: AtomicLoad::new(0.0),
            prover_load: RwLock::new(None),
            healthcheck: opts.healthcheck,
            client,
        })
    }

    /// Build a prover from a discovered baseline worker, keeping its
    /// address, node name and tags. The usual mutation function body.
    pub fn from_service(
        srv: &dyn Service,
        healthcheck: ProverHealthcheck,
    ) -> Result<Self, ProverError> {
        Self::new(ProverOpts {
            name: srv.node_name().to_string(),
            addr: srv.address().to_string(),
            healthcheck,
            tags: srv.tags().clone(),
        })
    }

    /// Send a request body to the prover and return the response bytes.
    pub async fn do_request(&self, body: Vec<u8>) -> Result<Vec<u8>, ProverError> {
        Ok(self.client.do_request(body).await?)
    }
}

#[async_trait]
impl Service for Prover {
    async fn health_check(&self) -> Result<(), HealthCheckError> {
        (self.healthcheck)(self).await
    }

    fn status(&self) -> ServiceStatus {
        self.status.load()
    }

    fn set_status(&self, status: ServiceStatus) {
        self.status.store(status);
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> &str {
        &self.addr
    }

    fn node_name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    fn load(&self) -> f32 {
        self.load.get()
    }

    fn set_load(&self, load: f32) {
        self.load.set(load);
    }

    fn prover_load(&self) -> Option<ProverLoad> {
        *self.prover_load.read().unwrap()
    }

    fn set_prover_load(&self, load: ProverLoad) {
        *self.prover_load.write().unwrap() = Some(load);
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.client.close();
        Ok(())
    }
}

/// Probe strategy that always reports the prover healthy with a random
/// load. For tests and examples.
pub fn prover_mock_healthcheck(timeout: Duration) -> ProverHealthcheck {
    Box::new(move |srv| mock_healthcheck_boxed(timeout, srv))
}

fn mock_healthcheck_boxed(
    timeout: Duration,
    srv: &dyn Service,
) -> BoxFuture<'_, Result<(), HealthCheckError>> {
    Box::pin(async move { healthcheck_with_retry(timeout, srv, mock_probe).await })
}
