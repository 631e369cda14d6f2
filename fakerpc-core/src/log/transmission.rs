//! A single directional burst of bytes

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One directional burst of bytes between two fixed endpoints
///
/// All bytes in `raw` flowed from `src` to `dst`. A change of direction or a
/// connection boundary always starts a new transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmission {
    /// Endpoint the bytes came from
    pub src: SocketAddr,

    /// Endpoint the bytes went to
    pub dst: SocketAddr,

    /// Payload, exactly as it crossed the wire
    pub raw: Vec<u8>,

    /// When the first byte was observed, if known
    pub start: Option<DateTime<Utc>>,
}

impl Transmission {
    /// Create an empty transmission from `src` to `dst`
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            src,
            dst,
            raw: Vec::new(),
            start: None,
        }
    }

    /// Set the payload
    pub fn with_raw(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.raw = raw.into();
        self
    }

    /// Set the start timestamp
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// True if `self` flows in the exact reverse direction of `other`
    pub fn is_reply_to(&self, other: &Transmission) -> bool {
        self.src == other.dst && self.dst == other.src
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True if no bytes were captured
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_reply_to() {
        let cli: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let srv: SocketAddr = "10.0.0.2:80".parse().unwrap();
        let other: SocketAddr = "10.0.0.3:5000".parse().unwrap();

        let req = Transmission::new(cli, srv).with_raw("GET / HTTP/1.1\r\n\r\n");
        let res = Transmission::new(srv, cli).with_raw("HTTP/1.1 200 OK\r\n\r\n");
        let stray = Transmission::new(srv, other);

        assert!(res.is_reply_to(&req));
        assert!(!req.is_reply_to(&req));
        assert!(!stray.is_reply_to(&req));
    }
}
