//! RoutePacket use case: carries out a routing decision for one packet.
//!
//! [`currens_core::domain::routing`] decides *what* should happen (run here,
//! broadcast, unicast, upstream).  [`PacketRouter`] makes it happen: it
//! encodes the packet once, hands the bytes to a [`PacketTransport`], and
//! runs the local handler.
//!
//! A frame whose body is larger than the session's `max_frame_len` is refused
//! here, before any bytes are queued: every receiver with the same limit
//! would otherwise drop the connection it arrived on.
//!
//! # Architecture
//!
//! This use case depends only on the `PacketTransport` trait and core types.
//! The session implements the trait on top of its connection registry; tests
//! use a `mockall` mock, so every routing path is checked without sockets.

use std::sync::Arc;

use currens_core::protocol::FRAME_HEADER_SIZE;
use currens_core::{
    encode_frame, CallContext, ConnectionId, DispatchError, HandlerTable, LocalInvoke,
    NetworkRoute, Packet, ProtocolError, RouteError, RoutePlan,
};
use tracing::{debug, trace, warn};

/// Writes encoded frames to connections.
///
/// Implementations only queue bytes; they never block on the network.
#[cfg_attr(test, mockall::automock)]
pub trait PacketTransport: Send + Sync {
    /// Queues `frame` on every registered connection except `except`.
    /// Returns how many connections accepted it.
    fn broadcast(&self, frame: Arc<[u8]>, except: Option<ConnectionId>) -> usize;

    /// Queues `frame` on connection `target` only.
    ///
    /// # Errors
    ///
    /// [`RouteError::UnknownTarget`] when `target` is not registered, in which
    /// case nothing is written anywhere.
    fn unicast(&self, target: ConnectionId, frame: Arc<[u8]>) -> Result<(), RouteError>;

    /// Queues `frame` on the client's connection to its host.
    fn upstream(&self, frame: Arc<[u8]>) -> Result<(), RouteError>;
}

/// Executes [`RoutePlan`]s against a transport and a handler table.
pub struct PacketRouter<'a, T: ?Sized> {
    transport: &'a T,
    handlers: &'a HandlerTable,
    max_frame_len: usize,
}

impl<'a, T: PacketTransport + ?Sized> PacketRouter<'a, T> {
    /// `max_frame_len` is the largest frame body the router will send.
    pub fn new(transport: &'a T, handlers: &'a HandlerTable, max_frame_len: usize) -> Self {
        Self {
            transport,
            handlers,
            max_frame_len,
        }
    }

    /// Runs a locally originated call: network delivery first, then the
    /// local handler.
    ///
    /// A failed unicast means no local handler runs either, so an
    /// `UnknownTarget` call has no side effects at all.
    ///
    /// Returns the number of connections the packet was queued on.
    pub fn execute(
        &self,
        plan: RoutePlan,
        packet: &Packet,
        ctx: &CallContext<'_>,
    ) -> Result<usize, RouteError> {
        let delivered = self.send(plan.network, packet)?;
        self.invoke_local(plan.local, packet, ctx)?;
        Ok(delivered)
    }

    /// Runs the local part of a plan.
    pub fn invoke_local(
        &self,
        local: LocalInvoke,
        packet: &Packet,
        ctx: &CallContext<'_>,
    ) -> Result<(), DispatchError> {
        match local {
            LocalInvoke::No => Ok(()),
            LocalInvoke::Required => self.handlers.dispatch(packet, ctx),
            LocalInvoke::IfRegistered => {
                if self.handlers.contains(&packet.name, packet.arity()) {
                    self.handlers.dispatch(packet, ctx)
                } else {
                    trace!(method = %packet.name, "no local handler; skipping");
                    Ok(())
                }
            }
        }
    }

    /// Runs the network part of a plan.  The packet is encoded at most once.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::FrameTooLarge`] (wrapped in [`RouteError::Protocol`])
    /// when the encoded body exceeds `max_frame_len`; nothing is queued.
    pub fn send(&self, route: NetworkRoute, packet: &Packet) -> Result<usize, RouteError> {
        if route == NetworkRoute::None {
            return Ok(0);
        }

        let encoded = encode_frame(packet)?;
        let body_len = encoded.len().saturating_sub(FRAME_HEADER_SIZE);
        if body_len > self.max_frame_len {
            warn!(method = %packet.name, body_len, max = self.max_frame_len, "refusing oversized frame");
            return Err(ProtocolError::FrameTooLarge {
                len: body_len,
                max: self.max_frame_len,
            }
            .into());
        }

        let frame: Arc<[u8]> = Arc::from(encoded);
        let delivered = match route {
            NetworkRoute::None => 0,
            NetworkRoute::Broadcast { except } => self.transport.broadcast(frame, except),
            NetworkRoute::Unicast(target) => {
                self.transport.unicast(target, frame)?;
                1
            }
            NetworkRoute::Upstream => {
                self.transport.upstream(frame)?;
                1
            }
        };
        debug!(method = %packet.name, ?route, delivered, "packet routed");
        Ok(delivered)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
