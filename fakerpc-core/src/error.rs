//! Error types for fakerpc operations
//!
//! Every crate in the workspace reports failures through [`FakeRpcError`].
//! Variants are grouped into categories that mirror how callers are expected
//! to react to them:
//!
//! - **Configuration**: bad target URL or listen address, fatal to the call
//! - **Lifecycle**: start while running, stop while idle, retry later
//! - **Parse**: reconstruction or codec failures, no partial result
//! - **Transport**: socket and file I/O failures
//!
//! # Example
//!
//! ```rust
//! use fakerpc_core::error::{ErrorCategory, FakeRpcError};
//!
//! let err = FakeRpcError::AlreadyRunning;
//! assert_eq!(err.category(), ErrorCategory::Lifecycle);
//! assert_eq!(err.error_code(), "ALREADY_RUNNING");
//! assert!(err.is_recoverable());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for fakerpc operations
pub type Result<T> = std::result::Result<T, FakeRpcError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid construction input (target URL, listen address)
    Configuration,
    /// Start/stop called in the wrong state
    Lifecycle,
    /// Malformed capture data
    Parse,
    /// Socket or file I/O failure
    Transport,
    /// Bug or unexpected internal state
    Internal,
}

/// Errors that can occur in fakerpc operations
#[derive(Error, Debug)]
pub enum FakeRpcError {
    // ═══════════════════════════════════════════════════════════════════════
    // Configuration errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Target URL could not be parsed or has no host
    #[error("Invalid target URL '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    /// Listen address could not be parsed or resolved
    #[error("Invalid listen address '{addr}': {reason}")]
    InvalidListenAddr { addr: String, reason: String },

    /// Host name lookup produced no usable address
    #[error("Unable to resolve '{addr}': {reason}")]
    AddrResolution { addr: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle errors
    // ═══════════════════════════════════════════════════════════════════════

    /// `listen_and_serve` called while a previous call is still active
    #[error("fakerpc: server is already running")]
    AlreadyRunning,

    /// `stop` called while nothing is running
    #[error("fakerpc: server is not running")]
    NotRunning,

    /// The serve loop went away before it could answer a stop request
    #[error("fakerpc: serve loop exited before the stop request was answered")]
    ServeAborted,

    // ═══════════════════════════════════════════════════════════════════════
    // Capture and parse errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Reconstruction was given a log without transmissions
    #[error("fakerpc: log is either nil or empty")]
    EmptyCapture,

    /// A recorded request head does not parse as HTTP/1.x
    #[error("Malformed HTTP request in transmission {index}: {reason}")]
    MalformedRequest { index: usize, reason: String },

    /// A recorded request carries fewer body bytes than it declares
    #[error("fakerpc: recorded body length is too small (transmission {index}: declared {declared}, observed {observed})")]
    TruncatedBody {
        index: usize,
        declared: u64,
        observed: u64,
    },

    /// An ngrep endpoint is not an `ip:port` pair
    #[error("Malformed address '{addr}': {reason}")]
    MalformedAddress { addr: String, reason: String },

    /// An ngrep interface line carries an ill-formed IP or mask
    #[error("Malformed network '{value}': {reason}")]
    MalformedNetwork { value: String, reason: String },

    /// A log stream was recognised but could not be decoded
    #[error("Failed to decode log: {reason}")]
    Decode { reason: String },

    /// A log could not be serialised
    #[error("Failed to encode log: {reason}")]
    Encode { reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors
    // ═══════════════════════════════════════════════════════════════════════

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error that shouldn't happen
    #[error("Internal error: {reason}. This is a bug; please report it.")]
    Internal { reason: String },
}

impl FakeRpcError {
    /// Returns true if this error might succeed on retry
    ///
    /// Only lifecycle errors qualify: the same call succeeds once the
    /// server reaches the expected state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FakeRpcError::AlreadyRunning | FakeRpcError::NotRunning
        )
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            FakeRpcError::InvalidTarget { .. }
            | FakeRpcError::InvalidListenAddr { .. }
            | FakeRpcError::AddrResolution { .. } => ErrorCategory::Configuration,

            FakeRpcError::AlreadyRunning
            | FakeRpcError::NotRunning
            | FakeRpcError::ServeAborted => ErrorCategory::Lifecycle,

            FakeRpcError::EmptyCapture
            | FakeRpcError::MalformedRequest { .. }
            | FakeRpcError::TruncatedBody { .. }
            | FakeRpcError::MalformedAddress { .. }
            | FakeRpcError::MalformedNetwork { .. }
            | FakeRpcError::Decode { .. } => ErrorCategory::Parse,

            FakeRpcError::Io(_) => ErrorCategory::Transport,

            FakeRpcError::Encode { .. } | FakeRpcError::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            FakeRpcError::InvalidTarget { .. } => "INVALID_TARGET",
            FakeRpcError::InvalidListenAddr { .. } => "INVALID_LISTEN_ADDR",
            FakeRpcError::AddrResolution { .. } => "ADDR_RESOLUTION",
            FakeRpcError::AlreadyRunning => "ALREADY_RUNNING",
            FakeRpcError::NotRunning => "NOT_RUNNING",
            FakeRpcError::ServeAborted => "SERVE_ABORTED",
            FakeRpcError::EmptyCapture => "EMPTY_CAPTURE",
            FakeRpcError::MalformedRequest { .. } => "MALFORMED_REQUEST",
            FakeRpcError::TruncatedBody { .. } => "TRUNCATED_BODY",
            FakeRpcError::MalformedAddress { .. } => "MALFORMED_ADDRESS",
            FakeRpcError::MalformedNetwork { .. } => "MALFORMED_NETWORK",
            FakeRpcError::Decode { .. } => "DECODE_ERROR",
            FakeRpcError::Encode { .. } => "ENCODE_ERROR",
            FakeRpcError::Io(_) => "IO_ERROR",
            FakeRpcError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_errors_are_recoverable() {
        assert!(FakeRpcError::AlreadyRunning.is_recoverable());
        assert!(FakeRpcError::NotRunning.is_recoverable());
        assert!(!FakeRpcError::EmptyCapture.is_recoverable());
    }

    #[test]
    fn test_error_categories() {
        let err = FakeRpcError::TruncatedBody {
            index: 2,
            declared: 4,
            observed: 1,
        };
        assert_eq!(err.category(), ErrorCategory::Parse);
        assert_eq!(err.error_code(), "TRUNCATED_BODY");
        assert!(err.to_string().contains("too small"));

        let err = FakeRpcError::InvalidTarget {
            url: "http://".to_string(),
            reason: "empty host".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: FakeRpcError = io.into();
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
