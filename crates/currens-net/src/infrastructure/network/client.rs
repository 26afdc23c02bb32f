//! Client lifecycle: connect to a host, run the session, disconnect.
//!
//! The client keeps exactly one connection (to the host, id `1`).  Every
//! call it originates goes up that connection, and everything the host sends
//! down is run locally.  Its own unique id is derived from its local endpoint,
//! so it matches the id the host derived for it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use currens_core::{derive_connection_id, ConnectionId, HandlerTable, NetworkState, LOCAL};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::ClientConfig;
use super::connection::Connection;
use super::dispatch::DispatchLoop;
use super::error::NetError;
use super::events::{ClientEvent, DisconnectReason, EventSink};
use super::session::{RpcHandle, Session};

struct Running {
    host_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    dispatch_task: JoinHandle<()>,
}

/// A TCP client attached to one host.
pub struct Client {
    config: ClientConfig,
    session: Arc<Session>,
    events: EventSink<ClientEvent>,
    running: Mutex<Option<Running>>,
}

impl Client {
    /// Creates a disconnected client and returns it together with its event receiver.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidConfiguration`] when `config` fails validation.
    pub fn new(
        config: ClientConfig,
        handlers: HandlerTable,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), NetError> {
        config.validate()?;
        let (events, rx) = EventSink::channel(config.transport.event_capacity);
        let client = Self {
            session: Arc::new(Session::new(
                Arc::new(handlers),
                config.transport.max_frame_len,
            )),
            config,
            events,
            running: Mutex::new(None),
        };
        Ok((client, rx))
    }

    /// Connects to `address:port`, giving up after `timeout`.
    ///
    /// Returns this client's unique id for the session.
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidConfiguration`] for an empty address, port `0` or
    ///   a zero timeout, before any I/O.
    /// - [`NetError::AlreadyActive`] when already connected.
    /// - [`NetError::ConnectFailed`] / [`NetError::ConnectTimeout`]; a
    ///   [`ClientEvent::ConnectionFailed`] is emitted as well.
    pub async fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<ConnectionId, NetError> {
        if address.trim().is_empty() {
            return Err(NetError::invalid("host address must not be empty"));
        }
        if port == 0 {
            return Err(NetError::invalid("port must be between 1 and 65535"));
        }
        if timeout.is_zero() {
            return Err(NetError::invalid("connect timeout must be greater than zero"));
        }

        let mut running = self.running.lock().await;
        let role = self.session.network_state();
        if role.is_active() {
            return Err(NetError::AlreadyActive(role));
        }
        // A session that ended remotely leaves its finished task behind.
        if let Some(stale) = running.take() {
            let _ = stale.dispatch_task.await;
        }

        let target = format!("{address}:{port}");
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                warn!(%target, "connect failed: {source}");
                self.events.emit(ClientEvent::ConnectionFailed {
                    reason: source.to_string(),
                });
                return Err(NetError::ConnectFailed {
                    addr: target,
                    source,
                });
            }
            Err(_) => {
                warn!(%target, ?timeout, "connect timed out");
                self.events.emit(ClientEvent::ConnectionFailed {
                    reason: format!("timed out after {timeout:?}"),
                });
                return Err(NetError::ConnectTimeout {
                    addr: target,
                    timeout,
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY: {e}");
        }
        let local_addr = stream.local_addr()?;
        let host_addr = stream.peer_addr()?;
        let unique_id = derive_connection_id(local_addr);

        let transport = &self.config.transport;
        let (inbound_tx, inbound_rx) = mpsc::channel(transport.inbound_capacity);
        let upstream = Connection::spawn(
            stream,
            LOCAL,
            host_addr,
            inbound_tx,
            transport.max_frame_len,
            transport.outbound_capacity,
        );

        if let Err(current) = self.session.activate(NetworkState::Client, unique_id) {
            upstream.close();
            return Err(NetError::AlreadyActive(current));
        }
        self.session.set_upstream(upstream);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatch = DispatchLoop {
            session: Arc::clone(&self.session),
            inbound: inbound_rx,
            events: self.events.clone(),
            sweep_interval: transport.sweep_interval,
        };
        let dispatch_task = tokio::spawn(dispatch.run(shutdown_rx));

        *running = Some(Running {
            host_addr,
            shutdown: shutdown_tx,
            dispatch_task,
        });

        info!(%host_addr, %local_addr, unique_id, "connected to host");
        self.events.emit(ClientEvent::Connected {
            unique_id,
            host_addr,
        });
        Ok(unique_id)
    }

    /// [`connect`](Self::connect) with [`ClientConfig::connect_timeout`].
    ///
    /// # Errors
    ///
    /// As for [`connect`](Self::connect).
    pub async fn connect_default(
        &self,
        address: &str,
        port: u16,
    ) -> Result<ConnectionId, NetError> {
        self.connect(address, port, self.config.connect_timeout).await
    }

    /// Closes the connection to the host and clears the session.
    ///
    /// Emits [`ClientEvent::Disconnected`] with [`DisconnectReason::Local`]
    /// unless the host already went away.  Calling it again does nothing.
    pub async fn disconnect(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            running.shutdown.send_replace(true);
            if let Err(e) = running.dispatch_task.await {
                error!("dispatch task ended abnormally: {e}");
            }
            debug!(host_addr = %running.host_addr, "client loop stopped");
        }

        if let Some(upstream) = self.session.take_upstream() {
            upstream.close();
            self.session.deactivate();
            info!("disconnected from host");
            self.events.emit(ClientEvent::Disconnected {
                reason: DisconnectReason::Local,
            });
        }
    }

    /// Handle for `rpc` / `rpc_to` on this client's session.
    pub fn rpc_handle(&self) -> RpcHandle {
        RpcHandle::new(Arc::clone(&self.session))
    }

    pub fn network_state(&self) -> NetworkState {
        self.session.network_state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.network_state() == NetworkState::Client && self.session.upstream_connected()
    }

    /// This client's id, or `0` while disconnected.
    pub fn unique_id(&self) -> ConnectionId {
        self.session.unique_id()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("role", &self.session.network_state())
            .field("unique_id", &self.session.unique_id())
            .finish()
    }
}
