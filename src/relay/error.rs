//! Relay engine error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur while managing forwarding rules.
///
/// Per-connection failures (a refused dial, a reset mid-relay) are not
/// errors; they are reported as relay events and the listener keeps running.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {address}: {source}")]
    BindError {
        /// The address that failed to bind.
        address: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A rule already listens on this port.
    #[error("port {port} is already forwarded")]
    AlreadyExists {
        /// The listen port.
        port: u16,
    },

    /// No rule listens on this port.
    #[error("port {port} is not forwarded")]
    NotFound {
        /// The listen port.
        port: u16,
    },

    /// Port outside 1..=65535.
    #[error("Invalid port number: {port}")]
    InvalidPort {
        /// The rejected port.
        port: u16,
    },

    /// Rule would forward a loopback port onto itself.
    #[error("Localhost infinite loop is dangerous: {host}:{port} forwards to itself")]
    SelfForward {
        /// The destination host.
        host: String,
        /// The port on both sides of the rule.
        port: u16,
    },

    /// The registry has been shut down.
    #[error("relay is shutting down")]
    ShuttingDown,

    /// IO error outside of a relayed connection.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
