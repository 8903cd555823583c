//! Worker-level errors

use thiserror::Error;

/// Errors surfaced by worker implementations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A status string did not parse.
    #[error("unsupported service status {status:?}")]
    UnsupportedStatus { status: String },

    /// Releasing the worker's transport failed. Callers log this and
    /// carry on.
    #[error("close service transport: {0}")]
    Close(#[source] anyhow::Error),
}

/// A failed worker probe.
///
/// The carried error is whatever the probe implementation reported; the
/// pool only cares that the probe failed and drives state transitions
/// (enrollment into jail, the jail sweep, try-up retries) off that fact.
#[derive(Debug, Error)]
#[error("health check failed: {0}")]
pub struct HealthCheckError(#[from] anyhow::Error);

impl HealthCheckError {
    /// Build an error from a plain message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self(anyhow::Error::msg(msg.into()))
    }
}
