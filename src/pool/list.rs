//! Liveness-tracking services list
//!
//! This module provides [`ServicesList`], the concurrent container at the
//! heart of the pool. Workers live in one of two partitions:
//!
//! - `healthy` - insertion-ordered, feeds all four selection policies
//! - `jail` - keyed by id, workers currently failing probes
//!
//! A worker moves to jail when a probe fails and climbs back out through
//! the bounded try-up protocol. At every observable moment no id is in
//! both partitions and each partition holds an id at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::pool::util::sleep_cancellable;
use crate::service::{ProverLoad, ProverStatus, Service, ServiceStatus};

/// Callback invoked after a worker is enrolled; errors are logged and do
/// not affect enrollment.
pub type OnServiceAddCallback = Arc<dyn Fn(Arc<dyn Service>) -> anyhow::Result<()> + Send + Sync>;

/// Configuration for a [`ServicesList`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServicesListOpts {
    /// Recovery attempts for a jailed worker before it is dropped;
    /// 0 retries forever.
    pub try_up_tries: u32,

    /// Delay between recovery attempts.
    #[serde(with = "duration_millis")]
    pub try_up_interval: Duration,

    /// Period between health-check sweeps.
    #[serde(with = "duration_millis")]
    pub checks_interval: Duration,
}

impl Default for ServicesListOpts {
    fn default() -> Self {
        Self {
            try_up_tries: 5,
            try_up_interval: Duration::from_secs(5),
            checks_interval: Duration::from_secs(5),
        }
    }
}

impl ServicesListOpts {
    /// Create options with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recovery attempt budget (0 retries forever).
    pub fn with_try_up_tries(mut self, tries: u32) -> Self {
        self.try_up_tries = tries;
        self
    }

    /// Set the delay between recovery attempts.
    pub fn with_try_up_interval(mut self, interval: Duration) -> Self {
        self.try_up_interval = interval;
        self
    }

    /// Set the health-check sweep period.
    pub fn with_checks_interval(mut self, interval: Duration) -> Self {
        self.checks_interval = interval;
        self
    }
}

#[derive(Default)]
struct ListInner {
    healthy: Vec<Arc<dyn Service>>,
    jail: HashMap<String, Arc<dyn Service>>,
}

impl ListInner {
    fn contains_id(&self, id: &str) -> bool {
        self.jail.contains_key(id) || self.healthy.iter().any(|srv| srv.id() == id)
    }
}

/// Concurrent container managing health checks, jail and try-up mechanics.
///
/// The list is shared behind an `Arc`: the health-check loop, the try-up
/// tasks it spawns and the owning pool all hold clones. One read-write
/// lock guards both partitions; it is never held across probes, closes,
/// user callbacks or sleeps.
pub struct ServicesList {
    service_name: String,

    inner: RwLock<ListInner>,

    /// Round-robin cursor. Advanced atomically so diagnostics reading it
    /// concurrently see monotone progression.
    cursor: AtomicU64,

    try_up_tries: u32,
    check_interval: Duration,
    try_up_interval: Duration,

    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,

    on_add: RwLock<Option<OnServiceAddCallback>>,

    /// Handle to the owning `Arc`, used when spawning try-up tasks. A
    /// failed upgrade means the list is gone and the task has nothing
    /// left to recover into.
    weak_self: Weak<ServicesList>,
}

impl ServicesList {
    /// Create a new list for the given service name.
    pub fn new(service_name: impl Into<String>, opts: &ServicesListOpts) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new_cyclic(|weak| Self {
            service_name: service_name.into(),
            inner: RwLock::new(ListInner::default()),
            cursor: AtomicU64::new(0),
            try_up_tries: opts.try_up_tries,
            check_interval: opts.checks_interval,
            try_up_interval: opts.try_up_interval,
            stop_tx,
            stop_rx,
            on_add: RwLock::new(None),
            weak_self: weak.clone(),
        })
    }

    /// Snapshot of the healthy partition.
    pub fn healthy(&self) -> Vec<Arc<dyn Service>> {
        self.inner.read().unwrap().healthy.clone()
    }

    /// Snapshot of the jailed workers.
    pub fn unhealthy(&self) -> Vec<Arc<dyn Service>> {
        self.inner.read().unwrap().jail.values().cloned().collect()
    }

    /// Snapshot of the jail keyed by id.
    pub fn jailed(&self) -> HashMap<String, Arc<dyn Service>> {
        self.inner.read().unwrap().jail.clone()
    }

    /// Total workers across both partitions.
    pub fn count_all(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.healthy.len() + inner.jail.len()
    }

    /// Whether a worker with this id is enrolled in either partition.
    pub fn contains_id(&self, id: &str) -> bool {
        self.inner.read().unwrap().contains_id(id)
    }

    /// Whether this worker is enrolled in either partition.
    pub fn contains(&self, srv: &dyn Service) -> bool {
        self.contains_id(srv.id())
    }

    /// Enroll a worker.
    ///
    /// Duplicates (by id) are ignored. The first probe decides the
    /// partition: failure sends the worker to jail and spawns its try-up
    /// task, success appends it to the healthy sequence.
    pub fn add<'a>(
        &'a self,
        srv: Arc<dyn Service>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(self.add_inner(srv))
    }

    async fn add_inner(&self, srv: Arc<dyn Service>) {
        if *self.stop_rx.borrow() {
            debug!(
                list = %self.service_name,
                service_id = %srv.id(),
                "list is closed, ignoring add"
            );
            return;
        }

        if self.contains(srv.as_ref()) {
            info!(
                list = %self.service_name,
                service_id = %srv.id(),
                node_name = %srv.node_name(),
                "service already exists during add"
            );
            return;
        }

        if let Err(err) = srv.health_check().await {
            let inserted = {
                let mut inner = self.inner.write().unwrap();
                if inner.contains_id(srv.id()) {
                    false
                } else {
                    inner.jail.insert(srv.id().to_string(), Arc::clone(&srv));
                    true
                }
            };

            if inserted {
                warn!(
                    list = %self.service_name,
                    service_id = %srv.id(),
                    node_name = %srv.node_name(),
                    error = %err,
                    "service can't be added to healthy due to healthcheck error"
                );

                if let Some(list) = self.weak_self.upgrade() {
                    let jailed = Arc::clone(&srv);
                    tokio::spawn(async move {
                        list.try_up_service(jailed, 0).await;
                    });
                }
            }
        } else {
            let inserted = {
                let mut inner = self.inner.write().unwrap();
                if inner.contains_id(srv.id()) {
                    false
                } else {
                    inner.healthy.push(Arc::clone(&srv));
                    true
                }
            };

            if inserted {
                info!(
                    list = %self.service_name,
                    service_id = %srv.id(),
                    node_name = %srv.node_name(),
                    address = %srv.address(),
                    "service added to list"
                );
            }
        }

        let callback = self.on_add.read().unwrap().clone();
        if let Some(callback) = callback {
            if let Err(err) = callback(Arc::clone(&srv)) {
                warn!(
                    list = %self.service_name,
                    service_id = %srv.id(),
                    error = %err,
                    "on-add callback failed"
                );
            }
        }
    }

    /// Next healthy worker, round-robin.
    ///
    /// Skips enrolled workers whose status has gone unhealthy since the
    /// last sweep. Returns `None` when the healthy partition is empty or
    /// nothing in it currently reports healthy.
    pub fn next(&self) -> Option<Arc<dyn Service>> {
        let inner = self.inner.write().unwrap();

        if inner.healthy.is_empty() {
            info!(
                list = %self.service_name,
                "no healthy services are present during next call"
            );
            return None;
        }

        let len = inner.healthy.len() as u64;
        let start = (self.cursor.fetch_add(1, Ordering::Relaxed) + 1) % len;

        for offset in 0..len {
            let idx = ((start + offset) % len) as usize;
            if inner.healthy[idx].status() == ServiceStatus::Healthy {
                if offset != 0 {
                    self.cursor.store(idx as u64, Ordering::Relaxed);
                }
                return Some(Arc::clone(&inner.healthy[idx]));
            }
        }

        info!(
            list = %self.service_name,
            "no services with healthy status found during next call"
        );
        None
    }

    /// Any healthy-partition worker carrying the tag, insertion order.
    pub fn any_by_tag(&self, tag: &str) -> Option<Arc<dyn Service>> {
        let inner = self.inner.read().unwrap();

        if inner.healthy.is_empty() {
            warn!(
                list = %self.service_name,
                tag,
                "no healthy services are present during tag lookup"
            );
            return None;
        }

        let found = inner
            .healthy
            .iter()
            .find(|srv| srv.tags().contains(tag))
            .cloned();
        if found.is_none() {
            warn!(list = %self.service_name, tag, "tag not found");
        }
        found
    }

    /// Tagged worker with the minimum scalar load.
    ///
    /// Ties resolve to the first in insertion order.
    pub fn next_least_loaded(&self, tag: &str) -> Option<Arc<dyn Service>> {
        let inner = self.inner.read().unwrap();

        if inner.healthy.is_empty() {
            info!(
                list = %self.service_name,
                tag,
                "no healthy services are present during least-loaded call"
            );
            return None;
        }

        let mut least_loaded: Option<Arc<dyn Service>> = None;
        let mut min_load = f32::INFINITY;

        for srv in &inner.healthy {
            if !srv.tags().contains(tag) {
                continue;
            }

            let load = srv.load();
            if load < min_load {
                least_loaded = Some(Arc::clone(srv));
                min_load = load;
            }
        }

        least_loaded
    }

    /// Tagged prover with the lightest structured load.
    ///
    /// Workers without a load reading or outside {computing, idle} are
    /// skipped. Preference is strictly lexicographic: idle over computing,
    /// then fewer queued tasks, then more cores. Exact ties flip a fair
    /// coin from the OS CSPRNG so indistinguishable provers share incoming
    /// load; a CSPRNG read failure keeps the current best.
    pub fn next_least_loaded_prover(&self, tag: &str) -> Option<Arc<dyn Service>> {
        let inner = self.inner.read().unwrap();

        if inner.healthy.is_empty() {
            return None;
        }

        let mut best: Option<(Arc<dyn Service>, ProverLoad)> = None;

        for srv in &inner.healthy {
            if !srv.tags().contains(tag) {
                continue;
            }

            let Some(load) = srv.prover_load() else {
                continue;
            };

            if !matches!(
                load.prover_status,
                ProverStatus::Computing | ProverStatus::Idle
            ) {
                debug!(
                    service_id = %srv.id(),
                    status = ?load.prover_status,
                    "service skipped: not accepting work"
                );
                continue;
            }

            let Some((_, min_load)) = &best else {
                best = Some((Arc::clone(srv), load));
                continue;
            };

            // Idle strictly beats computing.
            if load.prover_status == ProverStatus::Idle
                && min_load.prover_status == ProverStatus::Computing
            {
                best = Some((Arc::clone(srv), load));
                continue;
            }
            if load.prover_status == ProverStatus::Computing
                && min_load.prover_status == ProverStatus::Idle
            {
                continue;
            }

            // Same status: shorter queue wins.
            if min_load.tasks_queue < load.tasks_queue {
                continue;
            }
            if min_load.tasks_queue > load.tasks_queue {
                best = Some((Arc::clone(srv), load));
                continue;
            }

            // Same queue: more cores win.
            if min_load.number_cores > load.number_cores {
                continue;
            }
            if min_load.number_cores < load.number_cores {
                best = Some((Arc::clone(srv), load));
                continue;
            }

            // Exact tie: fair coin.
            let mut byte = [0u8; 1];
            if let Err(err) = rand::rngs::OsRng.try_fill_bytes(&mut byte) {
                tracing::error!(error = %err, "failed to read random byte for tie-break");
                continue;
            }
            if byte[0] % 2 == 1 {
                best = Some((Arc::clone(srv), load));
            }
        }

        best.map(|(srv, _)| srv)
    }

    /// Run one health-check sweep over a snapshot of the healthy
    /// partition.
    ///
    /// Probes run without the list lock. Each failure spawns a task that
    /// jails the worker and starts its try-up protocol; the worker stays
    /// visible in healthy for the bounded window until that task acquires
    /// the write lock.
    pub async fn health_checks(&self) {
        for srv in self.healthy() {
            if let Err(err) = srv.health_check().await {
                warn!(
                    list = %self.service_name,
                    service_id = %srv.id(),
                    node_name = %srv.node_name(),
                    error = %err,
                    "healthcheck error"
                );

                let Some(list) = self.weak_self.upgrade() else {
                    return;
                };
                tokio::spawn(async move {
                    list.from_healthy_to_jail(srv.id());
                    warn!(
                        list = %list.service_name,
                        service_id = %srv.id(),
                        "service added to jail"
                    );
                    list.try_up_service(srv, 0).await;
                });
            }
        }
    }

    /// Periodic health-check sweeps until the list is closed.
    #[instrument(skip(self), fields(list = %self.service_name))]
    pub async fn health_checks_loop(&self) {
        info!("start healthchecks loop");

        loop {
            if *self.stop_rx.borrow() {
                warn!("stop healthchecks loop");
                return;
            }

            self.health_checks().await;

            if sleep_cancellable(self.check_interval, self.stop_rx.clone()).await {
                warn!("stop healthchecks loop");
                return;
            }
        }
    }

    /// Recovery protocol for a jailed worker.
    ///
    /// Probes at `try_up_interval` spacing starting from `attempt`. A
    /// successful probe moves the worker back through [`Self::add`]; an
    /// exhausted budget (`try_up_tries > 0`) removes and closes it, after
    /// which its id is absent from both partitions. Closing the list ends
    /// the protocol at the next sleep.
    pub async fn try_up_service(&self, srv: Arc<dyn Service>, attempt: u32) {
        let mut attempt = attempt;

        loop {
            if self.try_up_tries != 0 && attempt >= self.try_up_tries {
                warn!(
                    list = %self.service_name,
                    service_id = %srv.id(),
                    node_name = %srv.node_name(),
                    max_tries = self.try_up_tries,
                    "maximum tries to up service reached, service will be removed from list"
                );
                self.remove_from_jail(&srv).await;
                return;
            }

            info!(
                list = %self.service_name,
                service_id = %srv.id(),
                address = %srv.address(),
                node_name = %srv.node_name(),
                attempt,
                "trying to up service"
            );

            match srv.health_check().await {
                Ok(()) => {
                    info!(
                        list = %self.service_name,
                        service_id = %srv.id(),
                        node_name = %srv.node_name(),
                        "service is alive"
                    );
                    self.from_jail_to_healthy(srv).await;
                    return;
                }
                Err(err) => {
                    warn!(
                        list = %self.service_name,
                        service_id = %srv.id(),
                        node_name = %srv.node_name(),
                        error = %err,
                        "try-up healthcheck error"
                    );

                    if sleep_cancellable(self.try_up_interval, self.stop_rx.clone()).await {
                        return;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Move a worker from healthy to jail by id. Order-preserving; a
    /// missing id is a logged no-op.
    pub fn from_healthy_to_jail(&self, id: &str) {
        let mut inner = self.inner.write().unwrap();

        let Some(index) = inner.healthy.iter().position(|srv| srv.id() == id) else {
            warn!(
                list = %self.service_name,
                service_id = %id,
                "service not found in healthy during move to jail"
            );
            return;
        };

        let srv = inner.healthy.remove(index);
        inner.jail.insert(srv.id().to_string(), srv);

        info!(
            list = %self.service_name,
            service_id = %id,
            "service moved from healthy to jail"
        );
    }

    /// Move a worker out of jail and re-enroll it.
    ///
    /// The lock is released between the jail removal and the nested
    /// [`Self::add`], which re-probes and picks the partition.
    pub async fn from_jail_to_healthy(&self, srv: Arc<dyn Service>) {
        {
            let mut inner = self.inner.write().unwrap();
            inner.jail.remove(srv.id());
        }

        info!(
            list = %self.service_name,
            service_id = %srv.id(),
            node_name = %srv.node_name(),
            "service moved from jail towards healthy"
        );

        self.add(srv).await;
    }

    /// Remove a worker from jail and close it. Close errors are logged,
    /// never surfaced.
    pub async fn remove_from_jail(&self, srv: &Arc<dyn Service>) {
        {
            let mut inner = self.inner.write().unwrap();
            inner.jail.remove(srv.id());
        }

        info!(
            list = %self.service_name,
            service_id = %srv.id(),
            node_name = %srv.node_name(),
            "service removed from jail"
        );

        if let Err(err) = srv.close().await {
            warn!(
                list = %self.service_name,
                service_id = %srv.id(),
                error = %err,
                "unexpected error during service close"
            );
        }
    }

    /// Remove a healthy worker by index and close it. Out-of-range is a
    /// logged no-op.
    pub async fn remove_from_healthy_by_index(&self, index: usize) {
        let srv = {
            let mut inner = self.inner.write().unwrap();
            if index >= inner.healthy.len() {
                warn!(
                    list = %self.service_name,
                    index,
                    len = inner.healthy.len(),
                    "healthy index out of range during remove"
                );
                return;
            }
            inner.healthy.remove(index)
        };

        info!(
            list = %self.service_name,
            service_id = %srv.id(),
            node_name = %srv.node_name(),
            "service removed from healthy by index"
        );

        if let Err(err) = srv.close().await {
            warn!(
                list = %self.service_name,
                service_id = %srv.id(),
                error = %err,
                "unexpected error during service close"
            );
        }
    }

    /// Fisher-Yates shuffle of the healthy partition; the cursor lands on
    /// a random in-range index. No-op when empty.
    pub fn shuffle(&self) {
        let mut inner = self.inner.write().unwrap();

        let len = inner.healthy.len();
        if len == 0 {
            return;
        }

        let mut rng = rand::thread_rng();
        inner.healthy.shuffle(&mut rng);
        self.cursor.store(rng.gen_range(0..len as u64), Ordering::SeqCst);
    }

    /// Apply a mutator to every healthy worker under the write lock.
    ///
    /// For pushing per-tick updates such as fresh structured-load
    /// readings; the mutator must not block.
    pub fn modify_healthy<F>(&self, mut modifier: F)
    where
        F: FnMut(&Arc<dyn Service>),
    {
        let inner = self.inner.write().unwrap();
        for srv in &inner.healthy {
            modifier(srv);
        }
    }

    /// Look a worker up by id across both partitions.
    pub fn service_by_id(&self, id: &str) -> Option<Arc<dyn Service>> {
        let inner = self.inner.read().unwrap();
        inner
            .healthy
            .iter()
            .find(|srv| srv.id() == id)
            .cloned()
            .or_else(|| inner.jail.get(id).cloned())
    }

    /// Push a structured-load reading onto a healthy worker. Returns
    /// whether the worker was found.
    pub fn set_prover_load_by_id(&self, id: &str, load: ProverLoad) -> bool {
        let inner = self.inner.read().unwrap();
        match inner.healthy.iter().find(|srv| srv.id() == id) {
            Some(srv) => {
                srv.set_prover_load(load);
                true
            }
            None => {
                debug!(
                    list = %self.service_name,
                    service_id = %id,
                    "service not found in healthy during load update"
                );
                false
            }
        }
    }

    /// Install the on-add callback.
    pub fn set_on_service_add_callback(&self, callback: OnServiceAddCallback) {
        *self.on_add.write().unwrap() = Some(callback);
    }

    /// Close the list: stop the loops and close every enrolled worker.
    ///
    /// Both partitions are drained first, so selection calls racing with
    /// close see an empty list rather than released workers.
    pub async fn close(&self) {
        let _ = self.stop_tx.send(true);

        let (healthy, jail) = {
            let mut inner = self.inner.write().unwrap();
            (
                std::mem::take(&mut inner.healthy),
                std::mem::take(&mut inner.jail),
            )
        };

        for srv in healthy.into_iter().chain(jail.into_values()) {
            if let Err(err) = srv.close().await {
                warn!(
                    list = %self.service_name,
                    service_id = %srv.id(),
                    error = %err,
                    "unexpected error during service close"
                );
            }
        }

        info!(list = %self.service_name, "services list closed");
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
