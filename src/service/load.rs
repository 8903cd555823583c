//! Worker load descriptors
//!
//! Two notions of load coexist: a scalar in `[0.0, 1.0]` consumed by the
//! least-loaded policy, and the structured [`ProverLoad`] record consumed by
//! the prover-specific policy.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Operational state reported by a prover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProverStatus {
    Unspecified,
    Booting,
    Computing,
    Idle,
    Halt,
}

/// Structured load descriptor for a prover.
///
/// `None` at the worker level means the pool has not received a reading yet;
/// the prover-specific selection policy skips such workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverLoad {
    /// Reported operational state.
    pub prover_status: ProverStatus,
    /// Number of queued tasks; lower is better.
    pub tasks_queue: u32,
    /// Number of cores; higher is better.
    pub number_cores: u32,
    /// Unix timestamp of the current computation's start, if any.
    pub current_computing_start_time: i64,
}

/// Atomically mutable scalar load cell.
///
/// Stored as the `f32` bit pattern in an `AtomicU32` so selection policies
/// can read it without taking the pool lock.
#[derive(Debug)]
pub struct AtomicLoad(AtomicU32);

impl AtomicLoad {
    pub fn new(load: f32) -> Self {
        Self(AtomicU32::new(load.to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, load: f32) {
        self.0.store(load.to_bits(), Ordering::SeqCst);
    }
}
