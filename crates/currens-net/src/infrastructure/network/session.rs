//! Session context: the state one running role needs, and the handle used to
//! send calls through it.
//!
//! Several sessions can live in one process (the integration tests run a host
//! and three clients side by side); nothing here is global.

use std::sync::{Arc, RwLock};

use currens_core::{
    plan_outbound, CallContext, ConnectionId, HandlerTable, NetworkState, Outbox, Packet,
    RouteError,
};
use tracing::{debug, trace};

use super::connection::Connection;
use super::registry::ConnectionRegistry;
use crate::application::route_packet::{PacketRouter, PacketTransport};

#[derive(Debug, Clone, Copy, Default)]
struct SessionState {
    role: NetworkState,
    unique_id: ConnectionId,
}

/// Shared state of one session.  Owned by `Arc` by the server or client, the
/// dispatch loop and every [`RpcHandle`].
#[derive(Debug)]
pub struct Session {
    state: RwLock<SessionState>,
    registry: ConnectionRegistry,
    upstream: RwLock<Option<Connection>>,
    handlers: Arc<HandlerTable>,
    max_frame_len: usize,
}

impl Session {
    /// `max_frame_len` bounds the frames this session sends, matching the
    /// limit its readers enforce on what they receive.
    pub(crate) fn new(handlers: Arc<HandlerTable>, max_frame_len: usize) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            registry: ConnectionRegistry::new(),
            upstream: RwLock::new(None),
            handlers,
            max_frame_len,
        }
    }

    pub fn network_state(&self) -> NetworkState {
        self.state().role
    }

    /// This process's id: `1` for a host or server, the derived endpoint id
    /// for a client, `0` when inactive.
    pub fn unique_id(&self) -> ConnectionId {
        self.state().unique_id
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Sets the role and id.
    ///
    /// # Errors
    ///
    /// Returns the current role when another role is already active.
    pub(crate) fn activate(
        &self,
        role: NetworkState,
        unique_id: ConnectionId,
    ) -> Result<(), NetworkState> {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if state.role.is_active() {
            return Err(state.role);
        }
        *state = SessionState { role, unique_id };
        debug!(%role, unique_id, "session activated");
        Ok(())
    }

    pub(crate) fn deactivate(&self) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if state.role.is_active() {
            debug!(role = %state.role, "session deactivated");
        }
        *state = SessionState::default();
    }

    pub(crate) fn set_upstream(&self, connection: Connection) {
        *self.upstream.write().unwrap_or_else(|p| p.into_inner()) = Some(connection);
    }

    /// Removes the upstream connection.  Only the first caller gets it, which
    /// is what makes client teardown happen exactly once.
    pub(crate) fn take_upstream(&self) -> Option<Connection> {
        self.upstream.write().unwrap_or_else(|p| p.into_inner()).take()
    }

    pub(crate) fn upstream_connected(&self) -> bool {
        self.upstream
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(Connection::is_connected)
    }

    pub(crate) fn router(&self) -> PacketRouter<'_, Self> {
        PacketRouter::new(self, &self.handlers, self.max_frame_len)
    }

    fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }
}

impl PacketTransport for Session {
    fn broadcast(&self, frame: Arc<[u8]>, except: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        self.registry.for_each(|id, conn| {
            if Some(id) == except {
                return;
            }
            match conn.send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(e) => trace!(id, "skipping broadcast target: {e}"),
            }
        });
        delivered
    }

    fn unicast(&self, target: ConnectionId, frame: Arc<[u8]>) -> Result<(), RouteError> {
        let conn = self
            .registry
            .get(target)
            .ok_or(RouteError::UnknownTarget(target))?;
        conn.send(frame)
    }

    fn upstream(&self, frame: Arc<[u8]>) -> Result<(), RouteError> {
        let guard = self.upstream.read().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(conn) => conn.send(frame),
            None => Err(RouteError::NotConnected),
        }
    }
}

/// Cloneable entry point for `rpc` / `rpc_to` on one session.
///
/// Handed out by [`Server::rpc_handle`](super::server::Server::rpc_handle)
/// and [`Client::rpc_handle`](super::client::Client::rpc_handle), and passed
/// to handlers as their [`Outbox`] so they can originate calls too.
#[derive(Debug, Clone)]
pub struct RpcHandle {
    session: Arc<Session>,
}

impl RpcHandle {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Broadcasts a call to `method` with `params` to every participant.
    ///
    /// On a host the matching local handler runs too.  On a client the call
    /// goes to the host, which relays it to everyone else.
    ///
    /// # Errors
    ///
    /// [`RouteError::InvalidMethodName`] for an empty name,
    /// [`RouteError::NotConnected`] when no role is active, or a dispatch
    /// error from the local handler.
    pub fn rpc(&self, method: &str, params: Vec<String>) -> Result<(), RouteError> {
        self.rpc_packet(Packet::broadcast(method, params))
    }

    /// Sends a call to one participant.
    ///
    /// `target` `1` runs the call in this process only; this process's own id
    /// does the same.
    ///
    /// # Errors
    ///
    /// As for [`rpc`](Self::rpc), plus [`RouteError::UnknownTarget`] on a host
    /// or server when `target` is not connected.  Nothing is written or run in
    /// that case.
    pub fn rpc_to(
        &self,
        target: ConnectionId,
        method: &str,
        params: Vec<String>,
    ) -> Result<(), RouteError> {
        self.rpc_packet(Packet::new(method, params, target))
    }

    /// Routes an existing packet according to its own `send_to`.
    pub fn rpc_packet(&self, packet: Packet) -> Result<(), RouteError> {
        self.route_counted(packet).map(|_| ())
    }

    /// Routes an existing packet to `target`, ignoring its `send_to`.
    pub fn rpc_to_packet(&self, target: ConnectionId, packet: Packet) -> Result<(), RouteError> {
        self.rpc_packet(packet.readdressed(target))
    }

    /// Like [`rpc_packet`](Self::rpc_packet) but returns how many connections
    /// the packet was queued on.
    pub fn route_counted(&self, packet: Packet) -> Result<usize, RouteError> {
        self.route_at_depth(packet, 0)
    }

    /// Routes a call whose local handler runs `depth` handler calls deep.
    fn route_at_depth(&self, packet: Packet, depth: usize) -> Result<usize, RouteError> {
        if packet.name.is_empty() {
            return Err(RouteError::InvalidMethodName);
        }

        let role = self.session.network_state();
        let local_id = self.session.unique_id();
        let invoke_locally = self
            .session
            .handlers()
            .invokes_locally(&packet.name, packet.arity());
        let plan = plan_outbound(role, local_id, packet.destination(), invoke_locally)?;

        let ctx = CallContext::new(local_id, local_id, self).with_depth(depth);
        self.session.router().execute(plan, &packet, &ctx)
    }

    pub fn unique_id(&self) -> ConnectionId {
        self.session.unique_id()
    }

    pub fn network_state(&self) -> NetworkState {
        self.session.network_state()
    }

    /// Ids of the connections currently registered (empty on a client).
    pub fn connected_ids(&self) -> Vec<ConnectionId> {
        self.session.registry().ids()
    }
}

impl Outbox for RpcHandle {
    fn route(&self, packet: Packet) -> Result<(), RouteError> {
        self.rpc_packet(packet)
    }

    fn route_nested(&self, packet: Packet, depth: usize) -> Result<(), RouteError> {
        self.route_at_depth(packet, depth).map(|_| ())
    }
}
