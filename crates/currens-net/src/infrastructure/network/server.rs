//! Server and host lifecycle.
//!
//! A [`Server`] owns one session.  `start` runs it as a pure *server* (it
//! relays, and runs handlers only when they are registered); `create_host`
//! runs it as a *host*, which also participates with id `1`.  Both bind a
//! listener, spawn the accept loop and the dispatch loop, and report progress
//! on the event channel returned by [`Server::new`].

use std::net::SocketAddr;
use std::sync::Arc;

use currens_core::{ConnectionId, HandlerTable, NetworkState, LOCAL};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::accept::AcceptLoop;
use super::config::ServerConfig;
use super::dispatch::DispatchLoop;
use super::error::NetError;
use super::events::{EventSink, ServerEvent};
use super::session::{RpcHandle, Session};

/// Tasks and signals of a running server.
struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

/// A TCP server or host.
pub struct Server {
    config: ServerConfig,
    session: Arc<Session>,
    events: EventSink<ServerEvent>,
    running: Mutex<Option<Running>>,
}

impl Server {
    /// Creates a stopped server and returns it together with its event receiver.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidConfiguration`] when `config` fails validation.
    pub fn new(
        config: ServerConfig,
        handlers: HandlerTable,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), NetError> {
        config.validate()?;
        let (events, rx) = EventSink::channel(config.transport.event_capacity);
        let server = Self {
            session: Arc::new(Session::new(
                Arc::new(handlers),
                config.transport.max_frame_len,
            )),
            config,
            events,
            running: Mutex::new(None),
        };
        Ok((server, rx))
    }

    /// Starts listening as a pure server.  Returns the bound address.
    ///
    /// # Errors
    ///
    /// [`NetError::AlreadyActive`] if the session is running, or
    /// [`NetError::Bind`] if the listener cannot be bound (a
    /// [`ServerEvent::StartFailed`] is emitted as well).
    pub async fn start(&self) -> Result<SocketAddr, NetError> {
        self.launch(NetworkState::Server).await
    }

    /// Starts listening as a host: a participant with id `1` whose own
    /// broadcasts reach its local handlers.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub async fn create_host(&self) -> Result<SocketAddr, NetError> {
        self.launch(NetworkState::Host).await
    }

    /// Stops accepting, closes every connection (flushing what is queued),
    /// and clears the session.  Calling it on a stopped server does nothing.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        // The dispatch loop finishes the item it is handling before it exits.
        running.shutdown.send_replace(true);
        if let Err(e) = running.accept_task.await {
            error!("accept task ended abnormally: {e}");
        }
        if let Err(e) = running.dispatch_task.await {
            error!("dispatch task ended abnormally: {e}");
        }

        for (id, conn) in self.session.registry().drain() {
            conn.close();
            self.events.emit(ServerEvent::ClientDisconnected { id });
        }
        self.session.deactivate();

        info!(addr = %running.local_addr, "server stopped");
        self.events.emit(ServerEvent::Stopped);
    }

    /// Handle for `rpc` / `rpc_to` on this server's session.
    pub fn rpc_handle(&self) -> RpcHandle {
        RpcHandle::new(Arc::clone(&self.session))
    }

    /// Address the listener is bound to while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub fn network_state(&self) -> NetworkState {
        self.session.network_state()
    }

    pub fn is_running(&self) -> bool {
        self.session.network_state().is_hosting()
    }

    pub fn connection_count(&self) -> usize {
        self.session.registry().count()
    }

    pub fn connected_ids(&self) -> Vec<ConnectionId> {
        self.session.registry().ids()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    async fn launch(&self, role: NetworkState) -> Result<SocketAddr, NetError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(NetError::AlreadyActive(self.session.network_state()));
        }

        let bind_addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                warn!(%bind_addr, "bind failed: {source}");
                self.events.emit(ServerEvent::StartFailed {
                    reason: source.to_string(),
                });
                return Err(NetError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };
        let local_addr = listener.local_addr()?;

        self.session
            .activate(role, LOCAL)
            .map_err(NetError::AlreadyActive)?;

        let transport = &self.config.transport;
        let (inbound_tx, inbound_rx) = mpsc::channel(transport.inbound_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept = AcceptLoop {
            session: Arc::clone(&self.session),
            inbound: inbound_tx,
            events: self.events.clone(),
            max_clients: self.config.max_clients,
            max_frame_len: transport.max_frame_len,
            outbound_capacity: transport.outbound_capacity,
        };
        let dispatch = DispatchLoop {
            session: Arc::clone(&self.session),
            inbound: inbound_rx,
            events: self.events.clone(),
            sweep_interval: transport.sweep_interval,
        };

        let accept_task = tokio::spawn(accept.run(listener, shutdown_tx.subscribe()));
        let dispatch_task = tokio::spawn(dispatch.run(shutdown_rx));

        *running = Some(Running {
            local_addr,
            shutdown: shutdown_tx,
            accept_task,
            dispatch_task,
        });

        info!(%local_addr, %role, "listening");
        self.events.emit(ServerEvent::Started { local_addr, role });
        Ok(local_addr)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("role", &self.session.network_state())
            .field("connections", &self.session.registry().count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_server() -> (Server, mpsc::Receiver<ServerEvent>) {
        Server::new(ServerConfig::loopback_ephemeral(), HandlerTable::empty()).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = ServerConfig::loopback_ephemeral();
        config.transport.event_capacity = 0;
        assert!(matches!(
            Server::new(config, HandlerTable::empty()),
            Err(NetError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_start_sets_role_and_emits_started() {
        // Arrange
        let (server, mut rx) = loopback_server();

        // Act
        let addr = server.start().await.unwrap();

        // Assert
        assert_ne!(addr.port(), 0);
        assert_eq!(server.network_state(), NetworkState::Server);
        assert_eq!(server.rpc_handle().unique_id(), 1);
        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::Started { role: NetworkState::Server, .. })
        ));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (server, _rx) = loopback_server();
        server.create_host().await.unwrap();

        let result = server.start().await;

        assert!(matches!(result, Err(NetError::AlreadyActive(NetworkState::Host))));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_clears_state() {
        let (server, mut rx) = loopback_server();
        server.create_host().await.unwrap();

        server.stop().await;
        server.stop().await;

        assert_eq!(server.network_state(), NetworkState::None);
        assert!(server.local_addr().await.is_none());
        let mut stopped = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ServerEvent::Stopped) {
                stopped += 1;
            }
        }
        assert_eq!(stopped, 1);
    }

    #[tokio::test]
    async fn test_bind_conflict_emits_start_failed() {
        // Arrange: occupy a port, then ask a second server for the same one.
        let (first, _rx1) = loopback_server();
        let addr = first.start().await.unwrap();
        let config = ServerConfig {
            port: addr.port(),
            ..ServerConfig::loopback_ephemeral()
        };
        let (second, mut rx2) = Server::new(config, HandlerTable::empty()).unwrap();

        // Act
        let result = second.start().await;

        // Assert
        assert!(matches!(result, Err(NetError::Bind { .. })));
        assert!(matches!(rx2.recv().await, Some(ServerEvent::StartFailed { .. })));
        assert_eq!(second.network_state(), NetworkState::None);
        first.stop().await;
    }

    #[tokio::test]
    async fn test_server_can_restart_after_stop() {
        let (server, _rx) = loopback_server();
        server.start().await.unwrap();
        server.stop().await;

        let again = server.create_host().await;

        assert!(again.is_ok());
        assert_eq!(server.network_state(), NetworkState::Host);
        server.stop().await;
    }
}
