//! Connection Reconstructor
//!
//! Turns a flat, capture-ordered [`Log`] into per-client request/response
//! pairs.
//!
//! ```text
//! Log.transmissions                       Connections
//! ─────────────────                       ───────────
//! [0] cli0 → srv  POST /1   ─┐
//! [1] srv  → cli0 200 OK    ─┴──────────► group 0: [ (POST /1, 200 OK),
//! [2] cli0 → srv  POST /2   ─┐                       (POST /2, 200 OK) ]
//! [3] srv  → cli0 200 OK    ─┘
//! [4] cli1 → srv  POST /3   ────────────► group 1: [ (POST /3, <none>) ]
//! ```
//!
//! Groups follow the first appearance of each client address. Reconstruction
//! is all-or-nothing: one malformed request fails the whole log.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::{FakeRpcError, Result};
use crate::log::Log;
use crate::request::{split_header_body, RequestHead};

/// One recorded request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Parsed request head
    pub request: RequestHead,
    /// Request body, cut to the declared length
    pub request_body: Bytes,
    /// Raw response bytes, replayed verbatim. Empty when no reply was
    /// captured.
    pub response: Bytes,
}

/// Reconstructed connections, one group per client address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connections(Vec<Vec<Connection>>);

impl Connections {
    /// Reconstruct request/response pairs from a log
    ///
    /// # Errors
    ///
    /// - [`FakeRpcError::EmptyCapture`] for a log without transmissions
    /// - [`FakeRpcError::MalformedRequest`] when a request head is missing or
    ///   does not parse
    /// - [`FakeRpcError::TruncatedBody`] when fewer body bytes were captured
    ///   than the request declares
    pub fn from_log(log: &Log) -> Result<Self> {
        let ts = &log.transmissions;
        if ts.is_empty() {
            return Err(FakeRpcError::EmptyCapture);
        }

        let mut groups: Vec<Vec<Connection>> = Vec::new();
        let mut index: HashMap<SocketAddr, usize> = HashMap::new();

        let mut i = 0;
        while i < ts.len() {
            let t = &ts[i];
            let n = *index.entry(t.src).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });

            let (head, body) =
                split_header_body(&t.raw).ok_or_else(|| FakeRpcError::MalformedRequest {
                    index: i,
                    reason: "missing end of request head".to_string(),
                })?;
            let request = RequestHead::parse(head).map_err(|e| FakeRpcError::MalformedRequest {
                index: i,
                reason: e.to_string(),
            })?;

            let observed = body.len() as u64;
            let declared = request.content_length.unwrap_or(observed);
            if observed < declared {
                return Err(FakeRpcError::TruncatedBody {
                    index: i,
                    declared,
                    observed,
                });
            }
            // declared <= observed, which is a usize
            let request_body = Bytes::copy_from_slice(&body[..declared as usize]);

            let mut response = Bytes::new();
            if let Some(next) = ts.get(i + 1).filter(|next| next.is_reply_to(t)) {
                response = Bytes::copy_from_slice(&next.raw);
                i += 1;
            }
            i += 1;

            groups[n].push(Connection {
                request,
                request_body,
                response,
            });
        }

        tracing::debug!(
            groups = groups.len(),
            transmissions = ts.len(),
            "Reconstructed connections"
        );
        Ok(Connections(groups))
    }

    /// Number of client groups
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no groups
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Group at position `i`
    pub fn get(&self, i: usize) -> Option<&[Connection]> {
        self.0.get(i).map(Vec::as_slice)
    }

    /// Iterate over groups in first-appearance order
    pub fn iter(&self) -> std::slice::Iter<'_, Vec<Connection>> {
        self.0.iter()
    }

    /// Total number of connections across all groups
    pub fn total(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    /// Unwrap into the raw group list
    pub fn into_inner(self) -> Vec<Vec<Connection>> {
        self.0
    }
}

impl From<Vec<Vec<Connection>>> for Connections {
    fn from(groups: Vec<Vec<Connection>>) -> Self {
        Connections(groups)
    }
}

impl IntoIterator for Connections {
    type Item = Vec<Connection>;
    type IntoIter = std::vec::IntoIter<Vec<Connection>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Connections {
    type Item = &'a Vec<Connection>;
    type IntoIter = std::slice::Iter<'a, Vec<Connection>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
