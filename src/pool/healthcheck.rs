//! Retrying health-check helper
//!
//! Worker implementations realize their `health_check` by wrapping a probe
//! in [`healthcheck_with_retry`]: up to [`MAX_HC_NUM_TRIES`] attempts with
//! [`HC_RETRY_SLEEP_INTERVAL`] between them. A probe can declare its
//! failure final to short-circuit the retries.

use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::service::{HealthCheckError, Service, ServiceStatus};

/// Maximum probe attempts per health check.
pub const MAX_HC_NUM_TRIES: u32 = 5;

/// Pause between probe attempts.
pub const HC_RETRY_SLEEP_INTERVAL: Duration = Duration::from_millis(200);

/// A failed probe attempt.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Worth another attempt.
    #[error("{0}")]
    Retryable(#[source] anyhow::Error),

    /// Final; retrying cannot help (bad credentials, protocol mismatch).
    #[error("{0}")]
    Fatal(#[source] anyhow::Error),
}

/// Probe a worker with bounded retries.
///
/// Success on any attempt returns `Ok`. A [`ProbeError::Fatal`] failure
/// short-circuits with its error. Exhausting the attempts marks the worker
/// [`ServiceStatus::Unhealthy`] and returns the last error.
pub async fn healthcheck_with_retry<P>(
    timeout: Duration,
    srv: &dyn Service,
    probe: P,
) -> Result<(), HealthCheckError>
where
    P: for<'a> Fn(Duration, &'a dyn Service) -> BoxFuture<'a, Result<(), ProbeError>>,
{
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 0..MAX_HC_NUM_TRIES {
        if attempt > 0 {
            tokio::time::sleep(HC_RETRY_SLEEP_INTERVAL).await;
            warn!(
                service_id = %srv.id(),
                node_name = %srv.node_name(),
                attempt = attempt + 1,
                max_attempts = MAX_HC_NUM_TRIES,
                last_error = %last_err.as_ref().map(ToString::to_string).unwrap_or_default(),
                "retrying healthcheck"
            );
        }

        match probe(timeout, srv).await {
            Ok(()) => {
                if attempt > 0 {
                    info!(
                        service_id = %srv.id(),
                        node_name = %srv.node_name(),
                        "healthcheck recovered after retry"
                    );
                }
                return Ok(());
            }
            Err(ProbeError::Fatal(err)) => return Err(HealthCheckError::from(err)),
            Err(ProbeError::Retryable(err)) => last_err = Some(err),
        }
    }

    srv.set_status(ServiceStatus::Unhealthy);
    Err(HealthCheckError::from(last_err.unwrap_or_else(|| {
        anyhow::anyhow!("healthcheck retries exhausted")
    })))
}

/// Probe that always succeeds, marking the worker healthy with a random
/// scalar load. For tests and examples.
pub fn mock_probe(_timeout: Duration, srv: &dyn Service) -> BoxFuture<'_, Result<(), ProbeError>> {
    Box::pin(async move {
        srv.set_status(ServiceStatus::Healthy);
        srv.set_load(rand::thread_rng().gen::<f32>());
        Ok(())
    })
}
