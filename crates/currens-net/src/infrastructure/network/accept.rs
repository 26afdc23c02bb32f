//! The accept loop: turns incoming TCP connections into registered clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use currens_core::derive_connection_id;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::connection::{Connection, Inbound};
use super::events::{EventSink, ServerEvent};
use super::session::Session;

/// Pause after a failed `accept` so a persistent error (for example running
/// out of file descriptors) does not spin the task.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Everything the accept loop needs besides the listener.
pub(crate) struct AcceptLoop {
    pub session: Arc<Session>,
    pub inbound: mpsc::Sender<Inbound>,
    pub events: EventSink<ServerEvent>,
    pub max_clients: Option<usize>,
    pub max_frame_len: usize,
    pub outbound_capacity: usize,
}

impl AcceptLoop {
    /// Accepts until `shutdown` flips (or its sender is dropped).
    ///
    /// Returning is the normal way this loop ends; dropping `listener` on the
    /// way out closes the listening socket.
    pub async fn run(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("accept loop received shutdown");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.admit(stream, peer_addr),
                    Err(e) => {
                        warn!("accept failed: {e}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
        info!("accept loop stopped");
    }

    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let registry = self.session.registry();

        if let Some(max) = self.max_clients {
            if registry.count() >= max {
                self.reject(peer_addr, format!("server is full ({max} clients)"));
                return;
            }
        }

        let id = derive_connection_id(peer_addr);
        if registry.contains(id) {
            self.reject(peer_addr, format!("connection id {id} is already in use"));
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer_addr, "could not set TCP_NODELAY: {e}");
        }

        let conn = Connection::spawn(
            stream,
            id,
            peer_addr,
            self.inbound.clone(),
            self.max_frame_len,
            self.outbound_capacity,
        );
        if let Err(e) = registry.add(id, conn.clone()) {
            conn.close();
            self.reject(peer_addr, e.to_string());
            return;
        }

        info!(id, %peer_addr, "client connected");
        self.events.emit(ServerEvent::ClientConnected { id, peer_addr });
    }

    /// The stream is dropped by the caller, which closes it.
    fn reject(&self, peer_addr: SocketAddr, reason: String) {
        warn!(%peer_addr, %reason, "rejecting client");
        self.events.emit(ServerEvent::ClientRejected { peer_addr, reason });
    }
}
