//! Validated runtime configuration for servers and clients.
//!
//! These are the in-memory settings the runtime actually uses.  The on-disk
//! TOML schema lives in [`crate::infrastructure::storage::config`] and is
//! converted into these types.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use super::error::NetError;

/// Smallest possible frame body: 2-byte name length, 1-byte name, 2-byte
/// count, 8-byte target.
pub const MIN_BODY_LEN: usize = 13;

/// Knobs shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Largest frame body accepted from a peer.  A larger announced length
    /// closes the connection.
    pub max_frame_len: usize,
    /// Capacity of the event channel handed to the application.
    pub event_capacity: usize,
    /// Capacity of the shared work queue between readers and the dispatch loop.
    pub inbound_capacity: usize,
    /// Frames one connection may have waiting for its writer.  A peer that
    /// falls further behind is dropped.
    pub outbound_capacity: usize,
    /// How often the dispatch loop sweeps the registry for dead connections.
    pub sweep_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_len: 1024 * 1024,
            event_capacity: 128,
            inbound_capacity: 256,
            outbound_capacity: 1024,
            sweep_interval: Duration::from_millis(250),
        }
    }
}

impl TransportConfig {
    /// # Errors
    ///
    /// [`NetError::InvalidConfiguration`] for zero capacities, a zero sweep
    /// interval, or a frame limit that cannot hold the smallest packet.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.max_frame_len < MIN_BODY_LEN {
            return Err(NetError::invalid(format!(
                "max_frame_len must be at least {MIN_BODY_LEN} bytes"
            )));
        }
        if self.event_capacity == 0 {
            return Err(NetError::invalid("event_capacity must be greater than zero"));
        }
        if self.inbound_capacity == 0 {
            return Err(NetError::invalid("inbound_capacity must be greater than zero"));
        }
        if self.outbound_capacity == 0 {
            return Err(NetError::invalid("outbound_capacity must be greater than zero"));
        }
        if self.sweep_interval.is_zero() {
            return Err(NetError::invalid("sweep_interval must be greater than zero"));
        }
        Ok(())
    }
}

/// Settings for [`Server`](super::server::Server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on.  `0.0.0.0` listens on all interfaces.
    pub bind_address: IpAddr,
    /// Port to listen on.  `0` asks the OS for a free port.
    pub port: u16,
    /// Connections beyond this count are accepted and immediately closed.
    pub max_clients: Option<usize>,
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 7777,
            max_clients: None,
            transport: TransportConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loopback listener on an OS-assigned port.
    pub fn loopback_ephemeral() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// [`NetError::InvalidConfiguration`] when `max_clients` is zero or the
    /// transport settings are invalid.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.max_clients == Some(0) {
            return Err(NetError::invalid("max_clients must be greater than zero"));
        }
        self.transport.validate()
    }
}

/// Settings for [`Client`](super::client::Client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Timeout used by [`Client::connect_default`](super::client::Client::connect_default).
    /// [`Client::connect`](super::client::Client::connect) takes its own.
    pub connect_timeout: Duration,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// # Errors
    ///
    /// [`NetError::InvalidConfiguration`] for a zero timeout or invalid
    /// transport settings.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.connect_timeout.is_zero() {
            return Err(NetError::invalid("connect_timeout must be greater than zero"));
        }
        self.transport.validate()
    }
}
