//! Error type for the network runtime.

use std::net::SocketAddr;
use std::time::Duration;

use currens_core::NetworkState;
use thiserror::Error;

/// Errors returned by [`Server`](super::server::Server) and
/// [`Client`](super::client::Client) lifecycle operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// A parameter was rejected before any I/O was attempted.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The session already runs in a role; stop or disconnect first.
    #[error("session is already active as {0}")]
    AlreadyActive(NetworkState),

    /// The listener could not be bound.
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// TCP connection to the host failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// TCP connection to the host did not complete in time.
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// An I/O error occurred on an established socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        NetError::InvalidConfiguration(message.into())
    }
}
