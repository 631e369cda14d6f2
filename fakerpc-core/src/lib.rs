//! # fakerpc core - capture logs, codecs and reconstruction
//!
//! fakerpc records the bytes flowing through a reverse HTTP proxy and later
//! replays them to clients without the real backend. This crate holds the
//! parts that need no network:
//!
//! - **Log**: directional [`Transmission`]s plus capture metadata
//! - **Codecs**: a gzip+bincode binary form and a line-oriented ngrep text
//!   form, with a loader that accepts either
//! - **Reconstructor**: turns a flat log into per-client request/response
//!   [`Connections`]
//!
//! ## Pipeline
//!
//! ```text
//! RecordingProxy ──► Log ──► write_log ──► file ──► read_log ──► Log
//!                                                                 │
//!                     ReplayServer ◄── Connections::from_log ◄────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use fakerpc_core::{codec::ngrep, Connections};
//!
//! let text = "\
//! interface: lo (127.0.0.0/255.0.0.0)
//! filter: tcp port 80
//!
//! T 127.0.0.1:40000 -> 127.0.0.1:80 [AP]
//! POST /1 HTTP/1.1.
//! .
//! HAI
//!
//! T 127.0.0.1:80 -> 127.0.0.1:40000 [AP]
//! HTTP/1.1 200 OK.
//! Content-Length: 4.
//! .
//! HAAI";
//!
//! let log = ngrep::from_str(text).unwrap();
//! let conns = Connections::from_log(&log).unwrap();
//! assert_eq!(conns.len(), 1);
//! // Payload lines keep their terminator, so the body is `HAI` plus newline
//! assert_eq!(&conns.get(0).unwrap()[0].request_body[..], b"HAI\n");
//! ```

pub mod addr;
pub mod codec;
pub mod connection;
pub mod error;
pub mod log;
pub mod request;

pub use addr::{parse_endpoint, AddrCache};
pub use codec::{read_log, write_log};
pub use connection::{Connection, Connections};
pub use error::{ErrorCategory, FakeRpcError, Result};
pub use log::{Log, Network, SharedLog, Transmission};
pub use request::{split_header_body, RequestHead};

/// Extension used for stored capture logs
pub const LOG_EXTENSION: &str = "gzob";
