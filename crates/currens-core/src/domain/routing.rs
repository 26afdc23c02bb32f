//! Routing decisions: where does a packet go, and does it run here?
//!
//! These functions are pure.  They look at the process role, the process's
//! own id and the packet's destination, and return a [`RoutePlan`].  The
//! network runtime then executes the plan.  Keeping the rules here means every
//! combination of role and destination is covered by plain unit tests.
//!
//! # Outbound (a call originated by this process)
//!
//! | destination        | Host                      | Server / Client                       |
//! |--------------------|---------------------------|---------------------------------------|
//! | local / own id     | run here only             | run here only                         |
//! | broadcast          | run here if registered, send to all | run here if `invoke_locally`, send to all (client: upstream) |
//! | peer               | send to that peer         | send to that peer (client: upstream)  |
//!
//! # Inbound (a packet received from connection `from`)
//!
//! Clients run everything they receive.  A host or server runs local packets,
//! relays broadcasts to everyone except `from` (after running them here), and
//! forwards peer-addressed packets without running them.

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::domain::address::{ConnectionId, Destination};
use crate::domain::state::NetworkState;
use crate::protocol::codec::ProtocolError;

/// Errors returned by the `rpc` / `rpc_to` entry points.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    /// `rpc_to` named an id that is not in the connection registry.
    #[error("no connection registered with id {0}")]
    UnknownTarget(ConnectionId),

    /// The connection exists but can no longer accept frames.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// A network destination was requested while no role is active.
    #[error("not connected: start a server, create a host, or connect first")]
    NotConnected,

    #[error("method name must not be empty")]
    InvalidMethodName,

    /// A handler-originated call would nest more than `max` handler calls.
    #[error("call to {method} nested deeper than {max} handler calls")]
    CallDepthExceeded { method: String, max: usize },

    /// The connection's write queue is full; the connection has been dropped.
    #[error("outbound queue of connection {0} is full")]
    OutboundQueueFull(ConnectionId),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Whether, and how strictly, the local handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalInvoke {
    /// Do not run a local handler.
    No,
    /// Run the local handler; a missing handler is an error.
    Required,
    /// Run the local handler if one is registered, skip silently otherwise.
    IfRegistered,
}

/// Which sockets, if any, receive the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkRoute {
    /// Nothing is written.
    None,
    /// Every registered connection, optionally skipping one (the origin).
    Broadcast { except: Option<ConnectionId> },
    /// Exactly one registered connection.
    Unicast(ConnectionId),
    /// The client's single connection to its host.
    Upstream,
}

/// The full decision for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePlan {
    pub local: LocalInvoke,
    pub network: NetworkRoute,
}

impl RoutePlan {
    const fn new(local: LocalInvoke, network: NetworkRoute) -> Self {
        Self { local, network }
    }

    const fn local_only() -> Self {
        Self::new(LocalInvoke::Required, NetworkRoute::None)
    }

    /// `true` when the plan neither runs nor sends anything.
    pub fn is_noop(&self) -> bool {
        self.local == LocalInvoke::No && self.network == NetworkRoute::None
    }
}

/// Plans a call originated by this process.
///
/// `invoke_locally` is the flag stored with the matching handler registration
/// (`false` when there is none).
///
/// # Errors
///
/// [`RouteError::NotConnected`] when the destination needs the network but
/// `role` is [`NetworkState::None`].
pub fn plan_outbound(
    role: NetworkState,
    local_id: ConnectionId,
    dest: Destination,
    invoke_locally: bool,
) -> Result<RoutePlan, RouteError> {
    if is_self(local_id, dest) {
        return Ok(RoutePlan::local_only());
    }

    let flagged = if invoke_locally {
        LocalInvoke::Required
    } else {
        LocalInvoke::No
    };

    let plan = match (role, dest) {
        (NetworkState::None, _) => return Err(RouteError::NotConnected),

        // The host is a participant; its own broadcast reaches its handler.
        (NetworkState::Host, Destination::Broadcast) => RoutePlan::new(
            LocalInvoke::IfRegistered,
            NetworkRoute::Broadcast { except: None },
        ),
        (NetworkState::Server, Destination::Broadcast) => {
            RoutePlan::new(flagged, NetworkRoute::Broadcast { except: None })
        }
        (NetworkState::Host | NetworkState::Server, Destination::Peer(id)) => {
            RoutePlan::new(flagged, NetworkRoute::Unicast(id))
        }

        (NetworkState::Client, Destination::Broadcast | Destination::Peer(_)) => {
            RoutePlan::new(flagged, NetworkRoute::Upstream)
        }

        (_, Destination::Local) => RoutePlan::local_only(),
    };
    Ok(plan)
}

/// Plans a packet received from connection `from`.
pub fn plan_inbound(
    role: NetworkState,
    local_id: ConnectionId,
    from: ConnectionId,
    dest: Destination,
) -> RoutePlan {
    match role {
        NetworkState::None => RoutePlan::new(LocalInvoke::No, NetworkRoute::None),
        NetworkState::Client => RoutePlan::local_only(),
        NetworkState::Host | NetworkState::Server => {
            if is_self(local_id, dest) {
                return RoutePlan::local_only();
            }
            match dest {
                Destination::Broadcast => {
                    let local = if role == NetworkState::Host {
                        LocalInvoke::Required
                    } else {
                        LocalInvoke::IfRegistered
                    };
                    RoutePlan::new(local, NetworkRoute::Broadcast { except: Some(from) })
                }
                Destination::Peer(id) => RoutePlan::new(LocalInvoke::No, NetworkRoute::Unicast(id)),
                Destination::Local => RoutePlan::local_only(),
            }
        }
    }
}

fn is_self(local_id: ConnectionId, dest: Destination) -> bool {
    match dest {
        Destination::Local => true,
        Destination::Peer(id) => id == local_id,
        Destination::Broadcast => false,
    }
}
