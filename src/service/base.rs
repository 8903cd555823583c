//! Baseline worker implementation

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::service::{
    AtomicLoad, AtomicServiceStatus, HealthCheckError, ProverLoad, Service, ServiceError,
    ServiceStatus,
};

/// Derive a worker id from its address.
///
/// The id is the hex SHA-256 of the address string. It is a pure function
/// of the address: collisions are treated as identity.
pub fn service_id(address: &str) -> String {
    let digest = Sha256::digest(address.as_bytes());
    hex::encode(digest)
}

/// Baseline worker produced by discovery adapters.
///
/// Carries identity and discovery metadata but no real transport: its probe
/// trivially succeeds and its close is a no-op. The pool's mutation function
/// turns it into a concrete worker type (see [`crate::prover::Prover`])
/// before enrollment.
#[derive(Debug)]
pub struct BaseService {
    id: String,
    address: String,
    node_name: String,
    tags: HashSet<String>,
    status: AtomicServiceStatus,
    load: AtomicLoad,
    prover_load: RwLock<Option<ProverLoad>>,
}

impl BaseService {
    /// Create a baseline worker for the given address.
    ///
    /// Workers start out [`ServiceStatus::Unhealthy`]; the first probe
    /// decides their initial partition.
    pub fn new(
        address: impl Into<String>,
        node_name: impl Into<String>,
        tags: HashSet<String>,
    ) -> Self {
        let address = address.into();
        Self {
            id: service_id(&address),
            address,
            node_name: node_name.into(),
            tags,
            status: AtomicServiceStatus::new(ServiceStatus::Unhealthy),
            load: AtomicLoad::new(0.0),
            prover_load: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Service for BaseService {
    async fn health_check(&self) -> Result<(), HealthCheckError> {
        // No transport to probe; the baseline worker is reachable by
        // construction.
        self.set_status(ServiceStatus::Healthy);
        Ok(())
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
        &self.address
    }

    fn node_name(&self) -> &str {
        &self.node_name
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ProverStatus;

    #[test]
    fn test_service_id_is_pure() {
        let a = BaseService::new("https://prover-1.example", "node-1", HashSet::new());
        let b = BaseService::new("https://prover-1.example", "node-2", HashSet::new());
        assert_eq!(a.id(), b.id());

        let c = BaseService::new("https://prover-2.example", "node-1", HashSet::new());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_service_id_is_hex_sha256() {
        assert_eq!(
            service_id("https://prover-1.example"),
            hex::encode(Sha256::digest(b"https://prover-1.example"))
        );
    }

    #[tokio::test]
    async fn test_health_check_marks_healthy() {
        let srv = BaseService::new("https://prover-1.example", "", HashSet::new());
        assert_eq!(srv.status(), ServiceStatus::Unhealthy);

        srv.health_check().await.unwrap();
        assert_eq!(srv.status(), ServiceStatus::Healthy);
    }

    #[test]
    fn test_prover_load_starts_unknown() {
        let srv = BaseService::new("https://prover-1.example", "", HashSet::new());
        assert!(srv.prover_load().is_none());

        srv.set_prover_load(ProverLoad {
            prover_status: ProverStatus::Idle,
            tasks_queue: 0,
            number_cores: 8,
            current_computing_start_time: 0,
        });
        assert_eq!(
            srv.prover_load().unwrap().prover_status,
            ProverStatus::Idle
        );
    }
}
