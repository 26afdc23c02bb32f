//! Typed event streams for servers, hosts and clients.
//!
//! Each role hands the application an `mpsc::Receiver` of its event type.
//! Delivery is best-effort: the network tasks never wait on a slow consumer,
//! so when the channel is full the event is dropped and a warning is logged.

use std::net::SocketAddr;

use currens_core::{ConnectionId, DispatchError, NetworkState, Packet, RouteError};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Events emitted by a [`Server`](super::server::Server) in either hosting role.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The listener is bound and accepting.
    Started {
        local_addr: SocketAddr,
        role: NetworkState,
    },
    /// Binding the listener failed.
    StartFailed { reason: String },
    ClientConnected {
        id: ConnectionId,
        peer_addr: SocketAddr,
    },
    /// Emitted exactly once per connection that leaves the registry.
    ClientDisconnected { id: ConnectionId },
    /// A packet was decoded from connection `from`.
    DataReceived { from: ConnectionId, packet: Packet },
    /// A frame from `from` could not be read or decoded.
    ReceiveFailed { from: ConnectionId, reason: String },
    DispatchFailed {
        from: ConnectionId,
        error: DispatchError,
    },
    /// Forwarding a packet received from `from` failed.
    RelayFailed { from: ConnectionId, error: RouteError },
    /// A connection was closed right after accept.
    ClientRejected { peer_addr: SocketAddr, reason: String },
    Stopped,
}

/// Why a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Local,
    /// The host closed the connection or the stream failed.
    Remote,
}

/// Events emitted by a [`Client`](super::client::Client).
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected {
        unique_id: ConnectionId,
        host_addr: SocketAddr,
    },
    ConnectionFailed { reason: String },
    Disconnected { reason: DisconnectReason },
    DataReceived { packet: Packet },
    ReceiveFailed { reason: String },
    DispatchFailed { error: DispatchError },
}

/// Non-blocking sending half of an event channel.
#[derive(Debug)]
pub struct EventSink<E> {
    tx: mpsc::Sender<E>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: std::fmt::Debug> EventSink<E> {
    /// Creates a sink and the receiver the application consumes.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<E>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: E) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "event channel full; dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                trace!(?event, "event receiver dropped");
            }
        }
    }
}
