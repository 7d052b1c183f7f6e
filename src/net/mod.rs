//! Connectivity collaborator
//!
//! The engine consults [`Connectivity`] before any network-dependent
//! operation (asset download, remote fallback). No wire protocol lives
//! here; implementations only answer "is the network reachable".

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Answers whether the device currently has network access
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Best-effort reachability probe: a short TCP dial to a well-known host
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        // Public DNS resolver, dialed by address so the probe itself
        // needs no name resolution
        Self::new("1.1.1.1", 443, Duration::from_secs(1))
    }
}

impl Connectivity for TcpProbe {
    fn is_online(&self) -> bool {
        let target = format!("{}:{}", self.host, self.port);
        let Ok(mut addrs) = target.to_socket_addrs() else {
            return false;
        };
        let Some(addr) = addrs.next() else {
            return false;
        };
        match TcpStream::connect_timeout(&addr, self.timeout) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Connectivity probe to {target} failed: {e}");
                false
            }
        }
    }
}

/// Stub that always reports online; useful for tests and for callers that
/// want the transport layer itself to surface failures
pub struct AssumeOnline;

impl Connectivity for AssumeOnline {
    fn is_online(&self) -> bool {
        true
    }
}
