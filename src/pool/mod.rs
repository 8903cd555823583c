//! Liveness-tracking selection engine
//!
//! This module provides:
//! - [`ServicesList`] - healthy/jail partitions, health checks, try-up
//!   recovery and the four selection policies
//! - [`ServicesPool`] - discovery reconciliation on top of one list
//! - [`healthcheck_with_retry`] - bounded-retry probe wrapper for worker
//!   implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ServicesPool                          │
//! │  ┌────────────────┐                 ┌─────────────────────┐  │
//! │  │ Discovery loop │                 │  Health-check loop  │  │
//! │  │ (reconcile)    │                 │  (sweep healthy)    │  │
//! │  └───────┬────────┘                 └──────────┬──────────┘  │
//! │          ▼                                     ▼             │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │                     ServicesList                     │    │
//! │  │   healthy: [w1, w2, w3, ...]      jail: {id -> w}    │    │
//! │  │            ▲                             │           │    │
//! │  │            └───── try-up tasks ──────────┘           │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Selection (`next`, `any_by_tag`, `next_least_loaded`,
//! `next_least_loaded_prover`) only ever sees the healthy partition.

mod healthcheck;
mod list;
mod pool;
mod util;

pub use healthcheck::{
    healthcheck_with_retry, mock_probe, ProbeError, HC_RETRY_SLEEP_INTERVAL, MAX_HC_NUM_TRIES,
};
pub use list::{OnServiceAddCallback, ServicesList, ServicesListOpts};
pub use pool::{
    MutationFnc, OnDiscCallback, OnDiscCallbackE, OnDiscCompletedCallback, PoolError,
    ReconcileRemoval, ServicesPool, ServicesPoolOpts,
};
