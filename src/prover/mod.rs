//! Concrete prover worker
//!
//! This module provides:
//! - [`Prover`] - an HTTP-backed worker with an injected probe strategy
//! - [`NodeClient`] - the underlying transport with default JSON headers
//!
//! The pool core never depends on this module; it is the worker
//! implementation a mutation function typically produces from a
//! discovered baseline worker.

#[allow(clippy::module_inception)]
mod prover;

mod client;

pub use client::{NodeClient, ProverClientError};
pub use prover::{prover_mock_healthcheck, Prover, ProverError, ProverHealthcheck, ProverOpts};
