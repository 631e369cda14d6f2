//! Transmission Log - the persisted record of a capture session
//!
//! A [`Log`] is an ordered sequence of [`Transmission`]s plus the metadata
//! needed to describe the capture: the observed network, an optional capture
//! filter, and the maximum coalescing interval used while recording.
//!
//! ## Lifecycle
//!
//! ```text
//! capture start          capture running              capture stop / load
//! ─────────────          ───────────────              ───────────────────
//! Log::new() ──────────► SharedLog::append() ───────► Log (frozen, read-only)
//!                        (one lock, append-only)
//! ```
//!
//! While recording, the log lives behind a [`SharedLog`] handle. Appends are
//! serialised by a single lock; nothing is ever rewritten in place.

mod shared;
mod transmission;

pub use shared::SharedLog;
pub use transmission::Transmission;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An observed network: address plus mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network address
    pub ip: IpAddr,
    /// Network mask, written as an address (`255.255.255.0`)
    pub mask: IpAddr,
}

impl Network {
    /// Create a network from an address and a mask
    pub fn new(ip: IpAddr, mask: IpAddr) -> Self {
        Self { ip, mask }
    }

    /// A network covering exactly one host
    pub fn host(ip: IpAddr) -> Self {
        let mask = match ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::BROADCAST),
            IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::from(u128::MAX)),
        };
        Self { ip, mask }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.mask)
    }
}

/// Ordered transmissions plus capture metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Network the capture was taken on
    pub network: Option<Network>,

    /// Interface name, as reported by the capture tool
    pub interface: Option<String>,

    /// Capture filter text
    pub filter: Option<String>,

    /// Maximum gap between same-direction writes that still coalesce into
    /// one transmission. `None` coalesces without limit.
    pub max_interval: Option<Duration>,

    /// Transmissions in capture order
    pub transmissions: Vec<Transmission>,
}

impl Log {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the observed network
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    /// Set the capture filter
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the coalescing interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }

    /// Append a transmission
    pub fn push(&mut self, t: Transmission) {
        self.transmissions.push(t);
    }

    /// Number of transmissions
    pub fn len(&self) -> usize {
        self.transmissions.len()
    }

    /// True if there are no transmissions
    pub fn is_empty(&self) -> bool {
        self.transmissions.is_empty()
    }

    /// Network address, or `0.0.0.0` when unknown
    pub fn net_ip(&self) -> IpAddr {
        self.network
            .map(|n| n.ip)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// Network mask, or `0.0.0.0` when unknown
    pub fn net_mask(&self) -> IpAddr {
        self.network
            .map(|n| n.mask)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// Capture filter description
    ///
    /// The explicit filter when set; otherwise derived from the first
    /// transmission's destination, or `(none)` for an empty log.
    pub fn net_filter(&self) -> String {
        if let Some(filter) = self.filter.as_deref().filter(|f| !f.is_empty()) {
            return filter.to_string();
        }
        match self.transmissions.first() {
            None => "(none)".to_string(),
            Some(t) => format!(
                "(ip or ipv6) and ( host {} and port {} )",
                t.dst.ip(),
                t.dst.port()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_defaults() {
        let log = Log::new();
        assert_eq!(log.net_ip().to_string(), "0.0.0.0");
        assert_eq!(log.net_mask().to_string(), "0.0.0.0");
        assert_eq!(log.net_filter(), "(none)");
    }

    #[test]
    fn test_net_filter_derived_from_first_destination() {
        let mut log = Log::new();
        log.push(Transmission::new(
            "192.168.14.108:46793".parse().unwrap(),
            "192.168.16.50:80".parse().unwrap(),
        ));
        assert_eq!(
            log.net_filter(),
            "(ip or ipv6) and ( host 192.168.16.50 and port 80 )"
        );

        let log = log.with_filter("tcp port 80");
        assert_eq!(log.net_filter(), "tcp port 80");
    }

    #[test]
    fn test_network_display() {
        let net = Network::new(
            "192.168.14.0".parse().unwrap(),
            "255.255.255.0".parse().unwrap(),
        );
        assert_eq!(net.to_string(), "192.168.14.0/255.255.255.0");

        let host = Network::host("127.0.0.1".parse().unwrap());
        assert_eq!(host.to_string(), "127.0.0.1/255.255.255.255");
    }
}
