//! End-to-end pool scenarios
//!
//! Run with: cargo test --test pool_test

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use prover_pool::discovery::{
    DiscoveryError, DiscoveryOpts, ServiceDiscovery, StaticDiscovery, TransportProtocol,
};
use prover_pool::pool::{
    ReconcileRemoval, ServicesList, ServicesListOpts, ServicesPool, ServicesPoolOpts,
};
use prover_pool::prover::{prover_mock_healthcheck, Prover};
use prover_pool::service::{
    BaseService, HealthCheckError, ProverLoad, Service, ServiceError, ServiceStatus,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("prover_pool=warn")
        .try_init();
}

/// Worker whose probe fails a configurable number of times before
/// succeeding. `u32::MAX` fails forever.
struct TestService {
    base: BaseService,
    fail_probes: AtomicU32,
    close_calls: AtomicU32,
}

impl TestService {
    fn new(addr: &str, fail_probes: u32) -> Arc<Self> {
        Arc::new(Self {
            base: BaseService::new(addr, "test-node", HashSet::new()),
            fail_probes: AtomicU32::new(fail_probes),
            close_calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Service for TestService {
    async fn health_check(&self) -> Result<(), HealthCheckError> {
        let remaining = self.fail_probes.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_probes.fetch_sub(1, Ordering::SeqCst);
            }
            self.base.set_status(ServiceStatus::Unhealthy);
            return Err(HealthCheckError::msg("probe refused"));
        }

        self.base.set_status(ServiceStatus::Healthy);
        Ok(())
    }

    fn status(&self) -> ServiceStatus {
        self.base.status()
    }

    fn set_status(&self, status: ServiceStatus) {
        self.base.set_status(status);
    }

    fn id(&self) -> &str {
        self.base.id()
    }

    fn address(&self) -> &str {
        self.base.address()
    }

    fn node_name(&self) -> &str {
        self.base.node_name()
    }

    fn tags(&self) -> &HashSet<String> {
        self.base.tags()
    }

    fn load(&self) -> f32 {
        self.base.load()
    }

    fn set_load(&self, load: f32) {
        self.base.set_load(load);
    }

    fn prover_load(&self) -> Option<ProverLoad> {
        self.base.prover_load()
    }

    fn set_prover_load(&self, load: ProverLoad) {
        self.base.set_prover_load(load);
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Discovery over a swappable in-memory snapshot.
struct TestDiscovery {
    snapshot: RwLock<Vec<Arc<dyn Service>>>,
    fail: AtomicBool,
    calls: AtomicU32,
}

impl TestDiscovery {
    fn new(snapshot: Vec<Arc<dyn Service>>) -> Arc<Self> {
        Arc::new(Self {
            snapshot: RwLock::new(snapshot),
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        })
    }

    fn set_snapshot(&self, snapshot: Vec<Arc<dyn Service>>) {
        *self.snapshot.write().unwrap() = snapshot;
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceDiscovery for TestDiscovery {
    async fn discover(&self, service: &str) -> Result<Vec<Arc<dyn Service>>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(DiscoveryError::ServiceNotFound(service.to_string()));
        }
        Ok(self.snapshot.read().unwrap().clone())
    }
}

fn healthy_base(addr: &str) -> Arc<dyn Service> {
    let srv = BaseService::new(addr, "", HashSet::new());
    srv.set_status(ServiceStatus::Healthy);
    Arc::new(srv)
}

fn identity_pool(
    name: &str,
    discovery: Arc<dyn ServiceDiscovery>,
    removal: ReconcileRemoval,
) -> Arc<ServicesPool> {
    ServicesPool::new(
        ServicesPoolOpts::new(name)
            .with_discovery(discovery)
            .with_discovery_interval(Duration::from_millis(50))
            .with_list_opts(
                ServicesListOpts::new()
                    .with_try_up_tries(3)
                    .with_try_up_interval(Duration::from_secs(60))
                    .with_checks_interval(Duration::from_secs(60)),
            )
            .with_mutation_fnc(Arc::new(|srv| Ok(srv)))
            .with_reconcile_removal(removal),
    )
    .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_round_robin_selection_is_uniform() {
    init_tracing();

    let opts = ServicesListOpts::new()
        .with_try_up_tries(5)
        .with_try_up_interval(Duration::from_secs(5))
        .with_checks_interval(Duration::from_secs(5));
    let list = ServicesList::new("shuffle-test", &opts);

    for i in 1..=19 {
        list.add(healthy_base(&format!("https://{i}gateway.fm"))).await;
    }

    let num_trials = 49_999;
    let picks_per_trial = 4;

    let mut frequency: HashMap<String, u64> = HashMap::new();
    for _ in 0..num_trials {
        list.shuffle();
        for _ in 0..picks_per_trial {
            let srv = list.next().expect("healthy service expected");
            *frequency.entry(srv.id().to_string()).or_default() += 1;
        }
    }

    assert_eq!(frequency.len(), 19);

    let mean = (num_trials * picks_per_trial) as f64 / 19.0;
    for (id, count) in frequency {
        let deviation = (count as f64 - mean).abs() / mean;
        assert!(
            deviation < 0.1,
            "service {id} selected {count} times, deviation {deviation:.3} from mean {mean:.0}"
        );
    }
}

#[tokio::test]
async fn test_reconciliation_converges_on_snapshot() {
    init_tracing();

    let a = healthy_base("https://a.example");
    let b = healthy_base("https://b.example");
    let c = healthy_base("https://c.example");
    let d = healthy_base("https://d.example");

    let discovery = TestDiscovery::new(vec![a.clone(), b.clone(), c.clone()]);
    let pool = identity_pool("reconcile", discovery.clone(), ReconcileRemoval::Stepwise);

    pool.discover_services().await.unwrap();
    assert_eq!(pool.count(), 3);

    let added: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let removed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = added.clone();
    pool.set_on_new_disc_callback(Arc::new(move |srv| {
        sink.lock().unwrap().push(srv.id().to_string());
        Ok(())
    }));
    let sink = removed.clone();
    pool.set_on_disc_remove_callback(Arc::new(move |srv| {
        sink.lock().unwrap().push(srv.id().to_string());
    }));

    discovery.set_snapshot(vec![a.clone(), c.clone(), d.clone()]);
    pool.discover_services().await.unwrap();

    let ids: HashSet<String> = pool
        .list()
        .healthy()
        .iter()
        .map(|srv| srv.id().to_string())
        .collect();
    assert!(ids.contains(a.id()));
    assert!(!ids.contains(b.id()));
    assert!(ids.contains(c.id()));
    assert!(ids.contains(d.id()));

    assert_eq!(*added.lock().unwrap(), vec![d.id().to_string()]);
    assert_eq!(*removed.lock().unwrap(), vec![b.id().to_string()]);
}

#[tokio::test]
async fn test_reconciliation_removal_policies() {
    let a = healthy_base("https://a.example");
    let b = healthy_base("https://b.example");
    let c = healthy_base("https://c.example");

    // Stepwise: one missing worker removed per cycle.
    let discovery = TestDiscovery::new(vec![a.clone(), b.clone(), c.clone()]);
    let pool = identity_pool("stepwise", discovery.clone(), ReconcileRemoval::Stepwise);
    pool.discover_services().await.unwrap();

    discovery.set_snapshot(vec![c.clone()]);
    pool.discover_services().await.unwrap();
    assert_eq!(pool.count(), 2);
    pool.discover_services().await.unwrap();
    assert_eq!(pool.count(), 1);

    // Full: every missing worker removed in the same cycle.
    let discovery = TestDiscovery::new(vec![a.clone(), b.clone(), c.clone()]);
    let pool = identity_pool("full", discovery.clone(), ReconcileRemoval::Full);
    pool.discover_services().await.unwrap();

    discovery.set_snapshot(vec![c.clone()]);
    pool.discover_services().await.unwrap();
    assert_eq!(pool.count(), 1);
    assert_eq!(pool.list().healthy()[0].id(), c.id());
}

#[tokio::test]
async fn test_discovery_error_is_surfaced() {
    let discovery = TestDiscovery::new(vec![]);
    discovery.fail.store(true, Ordering::SeqCst);

    let pool = identity_pool("failing", discovery.clone(), ReconcileRemoval::Stepwise);
    assert!(pool.discover_services().await.is_err());
}

#[tokio::test]
async fn test_discovery_loop_fires_callbacks_and_shuffles_once() {
    init_tracing();

    let discovery = TestDiscovery::new(vec![healthy_base("https://a.example")]);
    let pool = identity_pool("callbacks", discovery.clone(), ReconcileRemoval::Stepwise);

    let new_disc_fired = Arc::new(AtomicU32::new(0));
    let completed_fired = Arc::new(AtomicU32::new(0));

    let counter = new_disc_fired.clone();
    pool.set_on_new_disc_callback(Arc::new(move |_srv| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    let counter = completed_fired.clone();
    pool.set_on_disc_completed_callback(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    pool.start(true);

    let calls = discovery.clone();
    wait_until(move || calls.calls() >= 3).await;

    assert_eq!(new_disc_fired.load(Ordering::SeqCst), 1);
    // The one-time shuffle marker fires exactly once per pool lifetime.
    assert_eq!(completed_fired.load(Ordering::SeqCst), 1);

    pool.close().await;
}

#[tokio::test]
async fn test_close_stops_discovery_loop() {
    init_tracing();

    let discovery = TestDiscovery::new(vec![healthy_base("https://a.example")]);
    let pool = identity_pool("closing", discovery.clone(), ReconcileRemoval::Stepwise);

    pool.start(false);

    let calls = discovery.clone();
    wait_until(move || calls.calls() >= 2).await;
    assert!(pool.next_service().is_some());

    pool.close().await;
    let calls_at_close = discovery.calls();

    tokio::time::sleep(Duration::from_millis(300)).await;
    // At most the in-flight sweep completes after close.
    assert!(discovery.calls() <= calls_at_close + 1);
    assert!(pool.next_service().is_none());
}

#[tokio::test]
async fn test_flaky_worker_is_jailed_then_recovered() {
    let pool = ServicesPool::new(
        ServicesPoolOpts::new("recovery").with_list_opts(
            ServicesListOpts::new()
                .with_try_up_tries(5)
                .with_try_up_interval(Duration::from_millis(25)),
        ),
    )
    .unwrap();

    let srv = TestService::new("https://flaky.example", 1);
    pool.add_service(srv.clone()).await;

    assert_eq!(pool.count(), 0);
    assert_eq!(pool.list().unhealthy().len(), 1);

    let list = Arc::clone(pool.list());
    wait_until(move || list.healthy().len() == 1).await;
    assert!(pool.list().jailed().is_empty());
    assert_eq!(pool.next_service().unwrap().id(), srv.id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_next_with_churning_pool() {
    init_tracing();

    let pool = ServicesPool::new(
        ServicesPoolOpts::new("churn").with_list_opts(
            ServicesListOpts::new()
                .with_try_up_tries(0)
                .with_try_up_interval(Duration::from_millis(10))
                .with_checks_interval(Duration::from_millis(10)),
        ),
    )
    .unwrap();

    let stable = TestService::new("https://stable.example", 0);
    pool.add_service(stable.clone()).await;

    // Flapping workers: every other probe fails, so the sweep keeps
    // moving them between the partitions.
    for i in 1..=3 {
        let flaky = TestService::new(&format!("https://flaky-{i}.example"), 0);
        flaky.fail_probes.store(1, Ordering::SeqCst);
        pool.add_service(flaky.clone()).await;

        let respawn = flaky.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(15)).await;
                respawn.fail_probes.store(1, Ordering::SeqCst);
            }
        });
    }

    pool.start(true);

    let mut workers = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        workers.push(tokio::spawn(async move {
            for _ in 0..500 {
                assert!(
                    pool.next_service().is_some(),
                    "next returned none while a stable worker was enrolled"
                );
                tokio::task::yield_now().await;
            }
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }

    pool.close().await;
}

#[tokio::test]
async fn test_static_discovery_feeds_prover_mutation() {
    init_tracing();

    let discovery = Arc::new(StaticDiscovery::new(
        TransportProtocol::Https,
        DiscoveryOpts::default(),
        &[
            "prover-1.example".to_string(),
            "prover-2.example".to_string(),
        ],
    ));

    let pool = ServicesPool::new(
        ServicesPoolOpts::new("provers")
            .with_discovery(discovery)
            .with_discovery_interval(Duration::from_millis(50))
            .with_mutation_fnc(Arc::new(|srv| {
                let prover = Prover::from_service(
                    srv.as_ref(),
                    prover_mock_healthcheck(Duration::from_secs(1)),
                )?;
                Ok(Arc::new(prover) as Arc<dyn Service>)
            })),
    )
    .unwrap();

    pool.start(false);

    let watched = Arc::clone(&pool);
    wait_until(move || watched.count() == 2).await;

    let srv = pool.next_service().unwrap();
    assert!(srv.address().starts_with("https://prover-"));
    assert_eq!(srv.status(), ServiceStatus::Healthy);

    pool.close().await;
}
