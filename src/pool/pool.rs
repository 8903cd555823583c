//! Services pool coordinator
//!
//! [`ServicesPool`] owns one [`ServicesList`] and keeps it reconciled
//! against a discovery adapter: workers that vanish from the snapshot are
//! removed, newly discovered workers are passed through the mutation
//! function and enrolled. Selection calls delegate straight to the list.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::discovery::{DiscoveryError, ServiceDiscovery};
use crate::pool::list::{ServicesList, ServicesListOpts};
use crate::pool::util::sleep_cancellable;
use crate::service::{ProverLoad, Service};

/// Transform a discovered baseline worker into the concrete worker type
/// the pool will enroll.
pub type MutationFnc =
    Arc<dyn Fn(Arc<dyn Service>) -> anyhow::Result<Arc<dyn Service>> + Send + Sync>;

/// Fallible callback fired for each newly enrolled discovery; errors are
/// logged and do not affect enrollment.
pub type OnDiscCallbackE = Arc<dyn Fn(Arc<dyn Service>) -> anyhow::Result<()> + Send + Sync>;

/// Callback fired for each worker removed by reconciliation.
pub type OnDiscCallback = Arc<dyn Fn(Arc<dyn Service>) + Send + Sync>;

/// Callback fired once, after the first discovery sweep.
pub type OnDiscCompletedCallback = Arc<dyn Fn() + Send + Sync>;

/// How reconciliation removes workers missing from the latest snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileRemoval {
    /// Remove at most one missing worker per partition per cycle; the
    /// pool converges over consecutive sweeps.
    #[default]
    Stepwise,
    /// Remove every missing worker in the same cycle.
    Full,
}

/// Pool construction and steady-state errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A discovery adapter was configured without a mutation function.
    #[error("mutation function is required when a discovery adapter is configured")]
    MutationFncRequired,

    /// [`ServicesPool::discover_services`] was called on a pool built
    /// without a discovery adapter.
    #[error("no discovery adapter is configured for pool {0:?}")]
    DiscoveryNotConfigured(String),

    /// The discovery adapter failed; the loop logs this and retries on
    /// the next tick.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Configuration for a [`ServicesPool`].
#[derive(Clone)]
pub struct ServicesPoolOpts {
    /// Service name used for discovery lookups and logging.
    pub name: String,

    /// Discovery adapter; without one the pool only holds manually added
    /// workers.
    pub discovery: Option<Arc<dyn ServiceDiscovery>>,

    /// Period between discovery sweeps.
    pub discovery_interval: Duration,

    /// List configuration.
    pub list_opts: ServicesListOpts,

    /// Transform applied to each discovered worker before enrollment.
    /// Required when `discovery` is set; identity otherwise.
    pub mutation_fnc: Option<MutationFnc>,

    /// Pre-built list to adopt instead of constructing one.
    pub custom_list: Option<Arc<ServicesList>>,

    /// Removal policy for reconciliation.
    pub reconcile_removal: ReconcileRemoval,
}

impl ServicesPoolOpts {
    /// Create options for the given pool name with the defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discovery: None,
            discovery_interval: Duration::from_secs(10),
            list_opts: ServicesListOpts::default(),
            mutation_fnc: None,
            custom_list: None,
            reconcile_removal: ReconcileRemoval::default(),
        }
    }

    /// Set the discovery adapter.
    pub fn with_discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Set the discovery sweep period.
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    /// Set the list configuration.
    pub fn with_list_opts(mut self, opts: ServicesListOpts) -> Self {
        self.list_opts = opts;
        self
    }

    /// Set the mutation function.
    pub fn with_mutation_fnc(mut self, mutation: MutationFnc) -> Self {
        self.mutation_fnc = Some(mutation);
        self
    }

    /// Adopt a pre-built list.
    pub fn with_custom_list(mut self, list: Arc<ServicesList>) -> Self {
        self.custom_list = Some(list);
        self
    }

    /// Set the reconciliation removal policy.
    pub fn with_reconcile_removal(mut self, policy: ReconcileRemoval) -> Self {
        self.reconcile_removal = policy;
        self
    }
}

/// Pool of reachable workers: discovery, reconciliation, selection.
pub struct ServicesPool {
    name: String,

    discovery: Option<Arc<dyn ServiceDiscovery>>,
    discovery_interval: Duration,
    reconcile_removal: ReconcileRemoval,

    list: Arc<ServicesList>,

    mutation_fnc: MutationFnc,

    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,

    on_new_disc: RwLock<Option<OnDiscCallbackE>>,
    on_disc_remove: RwLock<Option<OnDiscCallback>>,
    on_disc_completed: RwLock<Option<OnDiscCompletedCallback>>,

    weak_self: Weak<ServicesPool>,
}

impl ServicesPool {
    /// Create a new pool from the given options.
    ///
    /// Fails when a discovery adapter is configured without a mutation
    /// function; a pool without discovery defaults to the identity
    /// mutation.
    pub fn new(opts: ServicesPoolOpts) -> Result<Arc<Self>, PoolError> {
        if opts.discovery.is_some() && opts.mutation_fnc.is_none() {
            return Err(PoolError::MutationFncRequired);
        }

        let mutation_fnc = opts
            .mutation_fnc
            .unwrap_or_else(|| Arc::new(|srv| Ok(srv)));

        let list = opts
            .custom_list
            .unwrap_or_else(|| ServicesList::new(opts.name.clone(), &opts.list_opts));

        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Arc::new_cyclic(|weak| Self {
            name: opts.name,
            discovery: opts.discovery,
            discovery_interval: opts.discovery_interval,
            reconcile_removal: opts.reconcile_removal,
            list,
            mutation_fnc,
            stop_tx,
            stop_rx,
            on_new_disc: RwLock::new(None),
            on_disc_remove: RwLock::new(None),
            on_disc_completed: RwLock::new(None),
            weak_self: weak.clone(),
        }))
    }

    /// Spawn the discovery loop, and the health-check loop when asked.
    pub fn start(&self, healthchecks: bool) {
        if let Some(pool) = self.weak_self.upgrade() {
            tokio::spawn(async move {
                pool.discover_services_loop().await;
            });
        }

        if healthchecks {
            let list = Arc::clone(&self.list);
            tokio::spawn(async move {
                list.health_checks_loop().await;
            });
        }
    }

    /// Run one discovery sweep and reconcile the list against it.
    ///
    /// Workers absent from the snapshot are removed (one per partition
    /// per cycle under [`ReconcileRemoval::Stepwise`]); new workers run
    /// through the mutation function and are enrolled.
    pub async fn discover_services(&self) -> Result<(), PoolError> {
        let Some(discovery) = self.discovery.clone() else {
            return Err(PoolError::DiscoveryNotConfigured(self.name.clone()));
        };

        let snapshot = discovery.discover(&self.name).await?;

        let new_ids: HashSet<String> = snapshot.iter().map(|srv| srv.id().to_string()).collect();

        loop {
            let healthy = self.list.healthy();
            let Some((index, srv)) = healthy
                .iter()
                .enumerate()
                .find(|(_, srv)| !new_ids.contains(srv.id()))
            else {
                break;
            };

            let srv = Arc::clone(srv);
            self.list.remove_from_healthy_by_index(index).await;
            self.fire_on_disc_remove(srv);

            if self.reconcile_removal == ReconcileRemoval::Stepwise {
                break;
            }
        }

        loop {
            let jailed = self.list.jailed();
            let Some(srv) = jailed
                .values()
                .find(|srv| !new_ids.contains(srv.id()))
            else {
                break;
            };

            let srv = Arc::clone(srv);
            self.list.remove_from_jail(&srv).await;
            self.fire_on_disc_remove(srv);

            if self.reconcile_removal == ReconcileRemoval::Stepwise {
                break;
            }
        }

        for new_srv in snapshot {
            if self.list.contains_id(new_srv.id()) {
                continue;
            }

            let mutated = match (self.mutation_fnc)(new_srv) {
                Ok(srv) => srv,
                Err(err) => {
                    warn!(
                        pool = %self.name,
                        error = %err,
                        "mutate new discovered service"
                    );
                    continue;
                }
            };

            self.list.add(Arc::clone(&mutated)).await;

            let callback = self.on_new_disc.read().unwrap().clone();
            if let Some(callback) = callback {
                if let Err(err) = callback(mutated) {
                    warn!(
                        pool = %self.name,
                        error = %err,
                        "callback on new discovered service"
                    );
                }
            }
        }

        Ok(())
    }

    /// Next healthy worker, round-robin.
    pub fn next_service(&self) -> Option<Arc<dyn Service>> {
        self.list.next()
    }

    /// Tagged worker with the minimum scalar load.
    pub fn next_least_loaded(&self, tag: &str) -> Option<Arc<dyn Service>> {
        self.list.next_least_loaded(tag)
    }

    /// Tagged prover with the lightest structured load.
    pub fn next_least_loaded_prover(&self, tag: &str) -> Option<Arc<dyn Service>> {
        self.list.next_least_loaded_prover(tag)
    }

    /// Any healthy worker carrying the tag.
    pub fn any_by_tag(&self, tag: &str) -> Option<Arc<dyn Service>> {
        self.list.any_by_tag(tag)
    }

    /// Enroll a worker directly, bypassing discovery.
    pub async fn add_service(&self, srv: Arc<dyn Service>) {
        self.list.add(srv).await;
    }

    /// Number of healthy workers.
    pub fn count(&self) -> usize {
        self.list.healthy().len()
    }

    /// Look a worker up by id across both partitions.
    pub fn service_by_id(&self, id: &str) -> Option<Arc<dyn Service>> {
        self.list.service_by_id(id)
    }

    /// Push a structured-load reading onto a healthy worker.
    pub fn set_prover_load_by_id(&self, id: &str, load: ProverLoad) -> bool {
        self.list.set_prover_load_by_id(id, load)
    }

    /// The underlying list.
    pub fn list(&self) -> &Arc<ServicesList> {
        &self.list
    }

    /// Close the list, then stop the discovery loop.
    ///
    /// Fire-and-forget: loops exit at their next checkpoint.
    pub async fn close(&self) {
        self.list.close().await;
        let _ = self.stop_tx.send(true);
    }

    /// Install the new-discovery callback.
    pub fn set_on_new_disc_callback(&self, callback: OnDiscCallbackE) {
        *self.on_new_disc.write().unwrap() = Some(callback);
    }

    /// Install the discovery-removal callback.
    pub fn set_on_disc_remove_callback(&self, callback: OnDiscCallback) {
        *self.on_disc_remove.write().unwrap() = Some(callback);
    }

    /// Install the first-sweep-completed callback.
    pub fn set_on_disc_completed_callback(&self, callback: OnDiscCompletedCallback) {
        *self.on_disc_completed.write().unwrap() = Some(callback);
    }

    fn fire_on_disc_remove(&self, srv: Arc<dyn Service>) {
        let callback = self.on_disc_remove.read().unwrap().clone();
        if let Some(callback) = callback {
            callback(srv);
        }
    }

    /// Periodic discovery sweeps until the pool is closed.
    ///
    /// After the first sweep the healthy partition is shuffled exactly
    /// once and the completed callback fires; the flag is pool-lifetime
    /// local, so a pool is shuffled once per object, not once per start.
    #[instrument(skip(self), fields(pool = %self.name))]
    async fn discover_services_loop(&self) {
        info!("start discovery loop");

        let mut once_shuffled = false;
        loop {
            if *self.stop_rx.borrow() {
                warn!("stop discovery loop");
                return;
            }

            if self.discovery.is_some() {
                if let Err(err) = self.discover_services().await {
                    warn!(error = %err, "error discovering services");
                }
            }

            if !once_shuffled {
                self.list.shuffle();
                once_shuffled = true;

                let callback = self.on_disc_completed.read().unwrap().clone();
                if let Some(callback) = callback {
                    callback();
                }
            }

            if sleep_cancellable(self.discovery_interval, self.stop_rx.clone()).await {
                warn!("stop discovery loop");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::service::BaseService;

    struct NoopDiscovery;

    #[async_trait]
    impl ServiceDiscovery for NoopDiscovery {
        async fn discover(
            &self,
            _service: &str,
        ) -> Result<Vec<Arc<dyn Service>>, DiscoveryError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_new_requires_mutation_with_discovery() {
        let err = ServicesPool::new(
            ServicesPoolOpts::new("pool").with_discovery(Arc::new(NoopDiscovery)),
        )
        .err()
        .unwrap();
        assert!(matches!(err, PoolError::MutationFncRequired));
    }

    #[test]
    fn test_new_defaults_to_identity_mutation() {
        let pool = ServicesPool::new(ServicesPoolOpts::new("pool")).unwrap();
        assert_eq!(pool.count(), 0);
    }

    #[tokio::test]
    async fn test_discover_services_without_adapter_errors() {
        let pool = ServicesPool::new(ServicesPoolOpts::new("pool")).unwrap();
        let err = pool.discover_services().await.unwrap_err();
        assert!(matches!(err, PoolError::DiscoveryNotConfigured(name) if name == "pool"));
    }

    #[tokio::test]
    async fn test_custom_list_is_adopted() {
        let list = ServicesList::new("custom", &ServicesListOpts::default());
        list.add(Arc::new(BaseService::new(
            "https://prover-1.example",
            "",
            Default::default(),
        )))
        .await;

        let pool = ServicesPool::new(
            ServicesPoolOpts::new("pool").with_custom_list(Arc::clone(&list)),
        )
        .unwrap();

        assert_eq!(pool.count(), 1);
        assert!(pool.next_service().is_some());
        assert!(pool.list().unhealthy().is_empty());
    }
}
