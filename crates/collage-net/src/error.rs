//! Error types for connection I/O and request-registry waits.

use thiserror::Error;

/// Errors surfaced by the [`crate::Connection`] trait.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The connection's outgoing buffer is full; retry after the notifier fires.
    #[error("connection send buffer is full")]
    Full,

    /// The connection (or its sibling) has been closed.
    #[error("connection is closed")]
    Closed,

    /// The connection was closed while a caller was blocked in `read_sync`/`write`.
    #[error("connection shut down while waiting")]
    ShutDown,

    /// The sibling half was dropped without an orderly close.
    #[error("peer hung up: {0}")]
    PeerLost(String),
}

impl ConnectionError {
    /// Returns `true` if the caller can retry after waiting on the notifier.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Returns `true` if the connection is permanently unusable.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::ShutDown | Self::PeerLost(_))
    }
}

/// Errors from [`crate::RequestRegistry`] waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No reply arrived within the caller's deadline; request state was cleaned up.
    #[error("request timed out")]
    Timeout,

    /// The registry (or the node it belongs to) shut down before a reply arrived.
    #[error("request cancelled")]
    Cancelled,

    /// `serve_request` was called with an id that was never registered, or was
    /// already served. Indicates a caller bug, not a runtime failure.
    #[error("unknown or already-served request id")]
    UnknownRequest,
}
