//! Worker health status

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::service::ServiceError;

/// Health flag of a pooled worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    /// Worker is active and ready for incoming requests.
    Healthy,
    /// Worker is inactive.
    Unhealthy,
}

impl ServiceStatus {
    fn as_u8(self) -> u8 {
        match self {
            ServiceStatus::Healthy => 0,
            ServiceStatus::Unhealthy => 1,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ServiceStatus::Healthy,
            _ => ServiceStatus::Unhealthy,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Healthy => write!(f, "healthy"),
            ServiceStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

impl FromStr for ServiceStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "healthy" => Ok(ServiceStatus::Healthy),
            "unhealthy" => Ok(ServiceStatus::Unhealthy),
            other => Err(ServiceError::UnsupportedStatus {
                status: other.to_string(),
            }),
        }
    }
}

/// Atomically mutable [`ServiceStatus`] cell.
///
/// Statuses are read by selection policies outside the pool lock, so every
/// worker implementation keeps its status in one of these.
#[derive(Debug)]
pub struct AtomicServiceStatus(AtomicU8);

impl AtomicServiceStatus {
    pub fn new(status: ServiceStatus) -> Self {
        Self(AtomicU8::new(status.as_u8()))
    }

    pub fn load(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, status: ServiceStatus) {
        self.0.store(status.as_u8(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ServiceStatus::Healthy.to_string(), "healthy");
        assert_eq!(ServiceStatus::Unhealthy.to_string(), "unhealthy");
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            "healthy".parse::<ServiceStatus>().unwrap(),
            ServiceStatus::Healthy
        );
        assert_eq!(
            "UnHealthy".parse::<ServiceStatus>().unwrap(),
            ServiceStatus::Unhealthy
        );
    }

    #[test]
    fn test_status_from_str_unsupported() {
        let err = "degraded".parse::<ServiceStatus>().unwrap_err();
        assert!(matches!(
            err,
            ServiceError::UnsupportedStatus { status } if status == "degraded"
        ));
    }

    #[test]
    fn test_atomic_status_round_trip() {
        let status = AtomicServiceStatus::new(ServiceStatus::Unhealthy);
        assert_eq!(status.load(), ServiceStatus::Unhealthy);

        status.store(ServiceStatus::Healthy);
        assert_eq!(status.load(), ServiceStatus::Healthy);
    }
}
