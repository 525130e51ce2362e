//! Typed error definitions for the headline pipeline.
//!
//! [`HlError`] covers transport establishment, mid-session connectivity loss,
//! protocol misuse, and the two recoverable capability failures (fetch and
//! processing). All variants implement `std::error::Error` via `thiserror`, so
//! they integrate with `anyhow::Result` at the binary edge.

use thiserror::Error;

use crate::session::SessionState;

/// Domain-specific errors for the headline pipeline.
#[derive(Debug, Error)]
pub enum HlError {
    /// The endpoint exists in principle but nobody accepted the connection
    /// (missing socket file, refused connection, local connect timeout).
    #[error("endpoint unavailable: {endpoint}: {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    /// The endpoint could not be reached at all (DNS or routing failure,
    /// remote connect timeout).
    #[error("endpoint unreachable: {endpoint}: {reason}")]
    EndpointUnreachable { endpoint: String, reason: String },

    /// Connectivity was lost on an established transport.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// An operation was attempted in a session state that does not allow it.
    #[error("invalid state: cannot {op} while session is {state}")]
    InvalidState { op: &'static str, state: SessionState },

    /// The upstream source failed for one symbol.
    #[error("fetch failed for {symbol}: {reason}")]
    FetchFailure { symbol: String, reason: String },

    /// The processing capability rejected a batch.
    #[error("processing failed: {0}")]
    ProcessingFailure(String),

    /// Malformed, oversized or unexpected frame.
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Server-side socket could not be bound.
    #[error("listen error: {0}")]
    Listen(String),
}

impl HlError {
    /// Whether this error means the underlying transport is no longer usable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure(_) | Self::EndpointUnavailable { .. } | Self::EndpointUnreachable { .. }
        )
    }
}
