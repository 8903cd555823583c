//! Transport protocols and address formatting
//!
//! Discovery adapters report bare host addresses; the pool wants fully
//! schemed endpoints. [`TransportProtocol::format_address`] adds the scheme
//! prefix idempotently and repairs the malformed `https//` / `wss//`
//! (missing colon) spellings that show up in hand-maintained address lists.

use std::fmt;
use std::str::FromStr;

use crate::discovery::DiscoveryError;

/// Transport protocols recognized by discovery adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Http,
    Https,
    Ws,
    Wss,
    Grpc,
}

impl TransportProtocol {
    /// The `scheme://` prefix for this transport.
    pub fn scheme_prefix(&self) -> String {
        format!("{self}://")
    }

    /// Prefix the address with this transport's scheme.
    ///
    /// Already-schemed addresses pass through unchanged, as do grpc
    /// addresses (grpc endpoints are dialed bare). `https//` and `wss//`
    /// are normalized to the proper scheme first.
    pub fn format_address(&self, addr: &str) -> String {
        if let Some(rest) = addr.strip_prefix("https//") {
            return format!("https://{rest}");
        }
        if let Some(rest) = addr.strip_prefix("wss//") {
            return format!("wss://{rest}");
        }

        if matches!(self, TransportProtocol::Grpc)
            || addr.starts_with("https://")
            || addr.starts_with("wss://")
            || addr.starts_with(&self.scheme_prefix())
        {
            return addr.to_string();
        }

        format!("{}{addr}", self.scheme_prefix())
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self {
            TransportProtocol::Http => "http",
            TransportProtocol::Https => "https",
            TransportProtocol::Ws => "ws",
            TransportProtocol::Wss => "wss",
            TransportProtocol::Grpc => "grpc",
        };
        write!(f, "{scheme}")
    }
}

impl FromStr for TransportProtocol {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(TransportProtocol::Http),
            "https" => Ok(TransportProtocol::Https),
            "ws" => Ok(TransportProtocol::Ws),
            "wss" => Ok(TransportProtocol::Wss),
            "grpc" => Ok(TransportProtocol::Grpc),
            other => Err(DiscoveryError::UnsupportedTransport(other.to_string())),
        }
    }
}

/// Normalize an address path fragment for joining: strip one leading slash
/// and guarantee exactly one trailing slash. Empty input stays empty.
pub fn normalize_path_slashes(addr: &str) -> String {
    if addr.is_empty() {
        return String::new();
    }

    let addr = addr.strip_prefix('/').unwrap_or(addr);
    if addr.is_empty() {
        return String::new();
    }

    if addr.ends_with('/') {
        addr.to_string()
    } else {
        format!("{addr}/")
    }
}
