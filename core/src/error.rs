//! Error types for transports and the dispatcher.
//!
//! # Design
//! `Timeout` gets a dedicated variant because it is the only failure the
//! retry loop recovers from. Every other `TransportError` ends the loop on
//! first occurrence and reaches the caller wrapped in `FetchError`.

use thiserror::Error;

/// Failures reported by a `Transport` for a single attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The attempt exceeded its timeout. Retried by the dispatcher.
    #[error("request timed out")]
    Timeout,

    /// The proxy URL could not be parsed or uses an unsupported scheme.
    #[error("invalid proxy '{proxy}': {reason}")]
    InvalidProxy { proxy: String, reason: String },

    /// The request could not be built (bad URL, bad header, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other transport failure: connection refused, TLS, protocol.
    #[error("transport failure: {0}")]
    Failed(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// Errors surfaced by `Dispatcher` operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// A non-timeout transport failure. Never retried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The worker thread for an asynchronous request could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The dispatcher was closed before a permit became free.
    #[error("dispatcher is closed")]
    Closed,
}
