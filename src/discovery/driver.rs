//! Discovery driver selection

use std::fmt;
use std::str::FromStr;

use crate::discovery::DiscoveryError;

/// Available discovery drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// Consul-driven discovery.
    Consul,
    /// Static discovery over a fixed address list.
    Static,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Consul => write!(f, "consul"),
            Driver::Static => write!(f, "static"),
        }
    }
}

impl FromStr for Driver {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "consul" => Ok(Driver::Consul),
            "static" => Ok(Driver::Static),
            other => Err(DiscoveryError::UnsupportedDriver(other.to_string())),
        }
    }
}
