//! The per-session dispatch loop.
//!
//! Reader tasks push [`Inbound`] items onto one bounded queue; this loop is
//! the only consumer.  For every packet it runs the local handler and relays
//! the packet according to the inbound routing rules.  It also sweeps the
//! registry for connections that stopped being connected, both on a timer and
//! immediately when a reader reports it has closed.
//!
//! Handlers run inline on this task, so packets from one connection are
//! handled in the order they arrived.  A slow handler delays dispatch but not
//! reading: readers keep filling the queue until it is full.

use std::sync::Arc;
use std::time::Duration;

use currens_core::{
    plan_inbound, CallContext, ConnectionId, DispatchError, NetworkState, Packet, RouteError,
};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::connection::Inbound;
use super::events::{ClientEvent, DisconnectReason, EventSink, ServerEvent};
use super::session::{RpcHandle, Session};

/// How a role turns loop activity into its own event type.
pub(crate) trait LoopEvents: Send + 'static {
    fn data_received(&self, from: ConnectionId, packet: &Packet);
    fn receive_failed(&self, from: ConnectionId, reason: String);
    fn dispatch_failed(&self, from: ConnectionId, error: DispatchError);
    fn relay_failed(&self, from: ConnectionId, error: RouteError);
    /// A registered connection was removed after it stopped being connected.
    fn connection_removed(&self, id: ConnectionId);
    /// A client's connection to its host ended without `disconnect`.
    fn upstream_lost(&self);
}

impl LoopEvents for EventSink<ServerEvent> {
    fn data_received(&self, from: ConnectionId, packet: &Packet) {
        self.emit(ServerEvent::DataReceived {
            from,
            packet: packet.clone(),
        });
    }

    fn receive_failed(&self, from: ConnectionId, reason: String) {
        self.emit(ServerEvent::ReceiveFailed { from, reason });
    }

    fn dispatch_failed(&self, from: ConnectionId, error: DispatchError) {
        self.emit(ServerEvent::DispatchFailed { from, error });
    }

    fn relay_failed(&self, from: ConnectionId, error: RouteError) {
        self.emit(ServerEvent::RelayFailed { from, error });
    }

    fn connection_removed(&self, id: ConnectionId) {
        self.emit(ServerEvent::ClientDisconnected { id });
    }

    fn upstream_lost(&self) {}
}

impl LoopEvents for EventSink<ClientEvent> {
    fn data_received(&self, _from: ConnectionId, packet: &Packet) {
        self.emit(ClientEvent::DataReceived {
            packet: packet.clone(),
        });
    }

    fn receive_failed(&self, _from: ConnectionId, reason: String) {
        self.emit(ClientEvent::ReceiveFailed { reason });
    }

    fn dispatch_failed(&self, _from: ConnectionId, error: DispatchError) {
        self.emit(ClientEvent::DispatchFailed { error });
    }

    // Clients never relay.
    fn relay_failed(&self, from: ConnectionId, error: RouteError) {
        warn!(from, "unexpected relay failure on a client: {error}");
    }

    fn connection_removed(&self, _id: ConnectionId) {}

    fn upstream_lost(&self) {
        self.emit(ClientEvent::Disconnected {
            reason: DisconnectReason::Remote,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct DispatchLoop<E> {
    pub session: Arc<Session>,
    pub inbound: mpsc::Receiver<Inbound>,
    pub events: E,
    pub sweep_interval: Duration,
}

impl<E: LoopEvents> DispatchLoop<E> {
    /// Runs until `shutdown` flips, the queue closes, or (on a client) the
    /// host goes away.  An item already being handled always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let handle = RpcHandle::new(Arc::clone(&self.session));
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flow = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                item = self.inbound.recv() => match item {
                    Some(item) => self.handle(item, &handle),
                    None => break,
                },
                _ = ticker.tick() => self.sweep(),
            };
            if flow == Flow::Stop {
                break;
            }
        }
        debug!("dispatch loop stopped");
    }

    fn handle(&self, item: Inbound, handle: &RpcHandle) -> Flow {
        match item {
            Inbound::Packet { from, packet } => {
                self.dispatch(from, &packet, handle);
                Flow::Continue
            }
            Inbound::Malformed { from, error } => {
                warn!(from, "dropping malformed frame: {error}");
                self.events.receive_failed(from, error.to_string());
                Flow::Continue
            }
            Inbound::Failed { from, reason } => {
                warn!(from, %reason, "receive failed");
                self.events.receive_failed(from, reason);
                Flow::Continue
            }
            Inbound::Closed { from } => {
                debug!(from, "reader closed; sweeping");
                self.sweep()
            }
        }
    }

    fn dispatch(&self, from: ConnectionId, packet: &Packet, handle: &RpcHandle) {
        debug!(from, method = %packet.name, send_to = packet.send_to, "packet received");
        self.events.data_received(from, packet);

        let role = self.session.network_state();
        let local_id = self.session.unique_id();
        let plan = plan_inbound(role, local_id, from, packet.destination());
        if plan.is_noop() {
            return;
        }

        let ctx = CallContext::new(from, local_id, handle);
        let router = self.session.router();

        if let Err(error) = router.invoke_local(plan.local, packet, &ctx) {
            warn!(from, "dispatch failed: {error}");
            self.events.dispatch_failed(from, error);
        }
        if let Err(error) = router.send(plan.network, packet) {
            warn!(from, "relay failed: {error}");
            self.events.relay_failed(from, error);
        }
    }

    /// Removes every registered connection that is no longer connected.
    ///
    /// Dead ids are collected from a snapshot first and removed afterwards;
    /// an id that is already gone is skipped, so each disconnect is reported
    /// once.
    fn sweep(&self) -> Flow {
        let registry = self.session.registry();
        let mut dead = Vec::new();
        registry.for_each(|id, conn| {
            if !conn.is_connected() {
                dead.push(id);
            }
        });

        for id in dead {
            if let Some(conn) = registry.remove(id) {
                conn.close();
                info!(id, "client disconnected");
                self.events.connection_removed(id);
            }
        }

        if self.session.network_state() == NetworkState::Client && !self.session.upstream_connected()
        {
            if let Some(conn) = self.session.take_upstream() {
                conn.close();
                self.session.deactivate();
                info!("connection to host lost");
                self.events.upstream_lost();
            }
            return Flow::Stop;
        }
        Flow::Continue
    }
}
