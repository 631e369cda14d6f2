//! Endpoint parsing and resolution
//!
//! [`AddrCache`] resolves textual `host:port` addresses to socket addresses
//! and remembers the answer. Each proxy or server owns its own cache, so two
//! components (or two tests) never observe each other's lookups.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Mutex;

use crate::error::{FakeRpcError, Result};

/// Instance-scoped cache of resolved endpoints
#[derive(Debug, Default)]
pub struct AddrCache {
    entries: Mutex<HashMap<String, SocketAddr>>,
}

impl AddrCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `addr` to a socket address, consulting the cache first
    ///
    /// Literal `ip:port` pairs are parsed without a lookup. Host names go
    /// through the system resolver and the first answer wins.
    pub fn resolve(&self, addr: &str) -> Result<SocketAddr> {
        if let Some(hit) = self.lock().get(addr) {
            return Ok(*hit);
        }

        let resolved = match addr.parse::<SocketAddr>() {
            Ok(sa) => sa,
            Err(_) => addr
                .to_socket_addrs()
                .map_err(|e| FakeRpcError::AddrResolution {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })?
                .next()
                .ok_or_else(|| FakeRpcError::AddrResolution {
                    addr: addr.to_string(),
                    reason: "no addresses returned".to_string(),
                })?,
        };

        self.lock().insert(addr.to_string(), resolved);
        Ok(resolved)
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SocketAddr>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Parse an endpoint as printed by ngrep or by `SocketAddr`'s `Display`
///
/// Accepts `1.2.3.4:80`, `[::1]:80` and ngrep's unbracketed `::1:80`.
pub fn parse_endpoint(s: &str) -> Result<SocketAddr> {
    if let Ok(sa) = s.parse::<SocketAddr>() {
        return Ok(sa);
    }

    let malformed = |reason: &str| FakeRpcError::MalformedAddress {
        addr: s.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = s.rsplit_once(':').ok_or_else(|| malformed("missing port"))?;
    let ip: IpAddr = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|_| malformed("invalid IP"))?;
    let port: u16 = port.parse().map_err(|_| malformed("invalid port"))?;

    Ok(SocketAddr::new(ip, port))
}
