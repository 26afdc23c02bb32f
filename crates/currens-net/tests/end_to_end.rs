//! End-to-end tests over real loopback sockets.
//!
//! Every test binds its own host on `127.0.0.1:0`, so tests run in parallel
//! without port clashes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use currens_core::{params, Args, CallContext, HandlerError, HandlerTable, RouteError};
use currens_net::{
    Client, ClientConfig, ClientEvent, DisconnectReason, Server, ServerConfig, ServerEvent,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Handler table with one counting handler.
fn counting(name: &str, arity: usize) -> (HandlerTable, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut builder = HandlerTable::builder();
    builder
        .register(name, arity, move |_: &CallContext<'_>, _: &Args<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    (builder.build(), calls)
}

fn fast_server_config() -> ServerConfig {
    let mut config = ServerConfig::loopback_ephemeral();
    config.transport.sweep_interval = Duration::from_millis(50);
    config
}

fn fast_client_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.transport.sweep_interval = Duration::from_millis(50);
    config
}

/// Waits for the first event matching `pred`, discarding the others.
async fn wait_for<E, F>(rx: &mut mpsc::Receiver<E>, mut pred: F) -> E
where
    F: FnMut(&E) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// Collects everything that arrives within `QUIET`.
async fn drain_quiet<E>(rx: &mut mpsc::Receiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + QUIET;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        events.push(event);
    }
    events
}

async fn start_host(handlers: HandlerTable) -> (Server, mpsc::Receiver<ServerEvent>, u16) {
    let (server, rx) = Server::new(fast_server_config(), handlers).unwrap();
    let addr = server.create_host().await.unwrap();
    (server, rx, addr.port())
}

async fn start_relay_server() -> (Server, mpsc::Receiver<ServerEvent>, u16) {
    let (server, rx) = Server::new(fast_server_config(), HandlerTable::empty()).unwrap();
    let addr = server.start().await.unwrap();
    (server, rx, addr.port())
}

/// Connects a client and waits until the host has registered it.
async fn join(
    port: u16,
    handlers: HandlerTable,
    host_rx: &mut mpsc::Receiver<ServerEvent>,
) -> (Client, mpsc::Receiver<ClientEvent>, u64) {
    let (client, rx) = Client::new(fast_client_config(), handlers).unwrap();
    let id = client.connect("127.0.0.1", port, WAIT).await.unwrap();
    wait_for(host_rx, |e| matches!(e, ServerEvent::ClientConnected { id: got, .. } if *got == id))
        .await;
    (client, rx, id)
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_ping_runs_host_handler_once_and_nothing_comes_back() {
    // Arrange
    let (host_handlers, pings) = counting("Ping", 0);
    let (host, mut host_rx, port) = start_host(host_handlers).await;
    let (client, mut client_rx, _) = join(port, HandlerTable::empty(), &mut host_rx).await;

    // Act
    client.rpc_handle().rpc("Ping", params![]).unwrap();

    // Assert
    wait_until(|| pings.load(Ordering::SeqCst) == 1).await;
    let client_events = drain_quiet(&mut client_rx).await;
    assert!(
        !client_events
            .iter()
            .any(|e| matches!(e, ClientEvent::DataReceived { .. })),
        "nothing may be relayed back to the caller: {client_events:?}"
    );
    assert_eq!(pings.load(Ordering::SeqCst), 1);

    client.disconnect().await;
    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_host_broadcast_reaches_every_client_and_itself_once() {
    // Arrange
    let (host_handlers, host_calls) = counting("Notify", 1);
    let (host, mut host_rx, port) = start_host(host_handlers).await;
    let mut clients = Vec::new();
    for _ in 0..3 {
        let (handlers, calls) = counting("Notify", 1);
        let (client, rx, _) = join(port, handlers, &mut host_rx).await;
        clients.push((client, rx, calls));
    }

    // Act
    let delivered = host
        .rpc_handle()
        .route_counted(currens_core::Packet::broadcast("Notify", params!["hello"]))
        .unwrap();

    // Assert
    assert_eq!(delivered, 3);
    assert_eq!(host_calls.load(Ordering::SeqCst), 1);
    for (_, rx, calls) in &mut clients {
        let event = wait_for(rx, |e| matches!(e, ClientEvent::DataReceived { .. })).await;
        if let ClientEvent::DataReceived { packet } = event {
            assert_eq!(packet.name, "Notify");
            assert_eq!(packet.params, vec!["hello".to_string()]);
        }
        let calls = Arc::clone(calls);
        wait_until(move || calls.load(Ordering::SeqCst) == 1).await;
    }

    for (client, _, _) in &clients {
        client.disconnect().await;
    }
    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_host_broadcast_without_clients_runs_locally_once() {
    // Arrange
    let (host_handlers, host_calls) = counting("Notify", 1);
    let (host, _host_rx, _port) = start_host(host_handlers).await;
    assert_eq!(host.connection_count(), 0);

    // Act
    let delivered = host
        .rpc_handle()
        .route_counted(currens_core::Packet::broadcast("Notify", params!["alone"]))
        .unwrap();

    // Assert
    assert_eq!(delivered, 0);
    assert_eq!(host_calls.load(Ordering::SeqCst), 1);

    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_host_broadcast_is_refused_and_client_stays_connected() {
    // Arrange
    let (host_handlers, host_calls) = counting("Bulk", 1);
    let (host, mut host_rx, port) = start_host(host_handlers).await;
    let (client, mut client_rx, _) = join(port, HandlerTable::empty(), &mut host_rx).await;
    let limit = fast_server_config().transport.max_frame_len;

    // Act
    let result = host.rpc_handle().rpc("Bulk", vec!["x".repeat(limit)]);

    // Assert
    assert!(matches!(
        result,
        Err(RouteError::Protocol(currens_core::ProtocolError::FrameTooLarge { .. }))
    ));
    assert_eq!(host_calls.load(Ordering::SeqCst), 0);
    let client_events = drain_quiet(&mut client_rx).await;
    assert!(
        !client_events.iter().any(|e| matches!(
            e,
            ClientEvent::DataReceived { .. } | ClientEvent::ReceiveFailed { .. }
        )),
        "nothing may reach the client: {client_events:?}"
    );
    assert!(client.is_connected());

    client.disconnect().await;
    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rpc_to_unknown_id_fails_and_sends_nothing() {
    // Arrange
    let (host, mut host_rx, port) = start_host(HandlerTable::empty()).await;
    let (client, mut client_rx, client_id) = join(port, HandlerTable::empty(), &mut host_rx).await;
    let unknown = client_id + 1;

    // Act
    let result = host.rpc_handle().rpc_to(unknown, "Poke", params![]);

    // Assert
    assert_eq!(result, Err(RouteError::UnknownTarget(unknown)));
    let client_events = drain_quiet(&mut client_rx).await;
    assert!(!client_events
        .iter()
        .any(|e| matches!(e, ClientEvent::DataReceived { .. })));

    client.disconnect().await;
    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_disconnect_is_reported_exactly_once() {
    // Arrange
    let (host, mut host_rx, port) = start_host(HandlerTable::empty()).await;
    let (client, mut client_rx, client_id) = join(port, HandlerTable::empty(), &mut host_rx).await;

    // Act
    client.disconnect().await;
    client.disconnect().await;

    // Assert: client side
    let event = wait_for(&mut client_rx, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    assert!(matches!(
        event,
        ClientEvent::Disconnected {
            reason: DisconnectReason::Local
        }
    ));

    // Assert: host side, one notification and one removal
    wait_for(&mut host_rx, |e| {
        matches!(e, ServerEvent::ClientDisconnected { id } if *id == client_id)
    })
    .await;
    let later = drain_quiet(&mut host_rx).await;
    assert!(!later
        .iter()
        .any(|e| matches!(e, ServerEvent::ClientDisconnected { .. })));
    assert_eq!(host.connection_count(), 0);

    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_frame_is_reported_and_stream_keeps_working() {
    // Arrange: a raw socket speaking the wire format by hand.
    let (host_handlers, pings) = counting("Ping", 0);
    let (host, mut host_rx, port) = start_host(host_handlers).await;
    let mut raw = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let event = wait_for(&mut host_rx, |e| matches!(e, ServerEvent::ClientConnected { .. })).await;
    let ServerEvent::ClientConnected { id: raw_id, .. } = event else {
        unreachable!()
    };

    // Act: a 3-byte body that claims a 5-byte name, then a valid Ping.
    let mut bad = 3u32.to_be_bytes().to_vec();
    bad.extend_from_slice(&[0x00, 0x05, b'x']);
    raw.write_all(&bad).await.unwrap();
    let good = currens_core::encode_frame(&currens_core::Packet::local("Ping", params![])).unwrap();
    raw.write_all(&good).await.unwrap();

    // Assert
    wait_for(&mut host_rx, |e| {
        matches!(e, ServerEvent::ReceiveFailed { from, .. } if *from == raw_id)
    })
    .await;
    wait_until(|| pings.load(Ordering::SeqCst) == 1).await;
    assert_eq!(host.connection_count(), 1);

    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_relays_client_broadcast_to_others_only() {
    // Arrange: a pure relay server with two clients.
    let (server, mut server_rx, port) = start_relay_server().await;
    let (a_handlers, a_calls) = counting("Chat", 1);
    let (b_handlers, b_calls) = counting("Chat", 1);
    let (a, mut a_rx, _) = join(port, a_handlers, &mut server_rx).await;
    let (b, _b_rx, _) = join(port, b_handlers, &mut server_rx).await;

    // Act
    a.rpc_handle().rpc("Chat", params!["hi"]).unwrap();

    // Assert
    wait_until(|| b_calls.load(Ordering::SeqCst) == 1).await;
    let a_events = drain_quiet(&mut a_rx).await;
    assert!(!a_events
        .iter()
        .any(|e| matches!(e, ClientEvent::DataReceived { .. })));
    assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    let server_events = drain_quiet(&mut server_rx).await;
    assert!(
        !server_events
            .iter()
            .any(|e| matches!(e, ServerEvent::DispatchFailed { .. })),
        "a server without a handler relays silently"
    );

    a.disconnect().await;
    b.disconnect().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_unicast_is_forwarded_by_host() {
    // Arrange
    let (host_handlers, host_calls) = counting("Whisper", 1);
    let (host, mut host_rx, port) = start_host(host_handlers).await;
    let (a, _a_rx, _) = join(port, HandlerTable::empty(), &mut host_rx).await;
    let (b_handlers, b_calls) = counting("Whisper", 1);
    let (b, _b_rx, b_id) = join(port, b_handlers, &mut host_rx).await;

    // Act
    a.rpc_handle().rpc_to(b_id, "Whisper", params!["psst"]).unwrap();

    // Assert
    wait_until(|| b_calls.load(Ordering::SeqCst) == 1).await;
    assert_eq!(host_calls.load(Ordering::SeqCst), 0, "host only forwards unicasts");

    a.disconnect().await;
    b.disconnect().await;
    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_replies_to_sender() {
    // Arrange: the host answers Ping with Pong to whoever asked.
    let mut builder = HandlerTable::builder();
    builder
        .register("Ping", 0, |ctx: &CallContext<'_>, _: &Args<'_>| {
            ctx.rpc_to(ctx.sender(), "Pong", params![])
                .map_err(|e| HandlerError::failed(e.to_string()))
        })
        .unwrap();
    let (host, mut host_rx, port) = start_host(builder.build()).await;
    let (client_handlers, pongs) = counting("Pong", 0);
    let (client, _client_rx, _) = join(port, client_handlers, &mut host_rx).await;

    // Act
    client.rpc_handle().rpc("Ping", params![]).unwrap();

    // Assert
    wait_until(|| pongs.load(Ordering::SeqCst) == 1).await;

    client.disconnect().await;
    host.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_host_stop_disconnects_clients_remotely() {
    // Arrange
    let (host, mut host_rx, port) = start_host(HandlerTable::empty()).await;
    let (client, mut client_rx, _) = join(port, HandlerTable::empty(), &mut host_rx).await;

    // Act
    host.stop().await;

    // Assert
    let event = wait_for(&mut client_rx, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    assert!(matches!(
        event,
        ClientEvent::Disconnected {
            reason: DisconnectReason::Remote
        }
    ));
    wait_until(|| !client.is_connected()).await;
    assert_eq!(client.unique_id(), 0);

    // A later local disconnect has nothing left to report.
    client.disconnect().await;
    let later = drain_quiet(&mut client_rx).await;
    assert!(!later
        .iter()
        .any(|e| matches!(e, ClientEvent::Disconnected { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_max_clients_rejects_overflow() {
    // Arrange
    let mut config = fast_server_config();
    config.max_clients = Some(1);
    let (server, mut server_rx) = Server::new(config, HandlerTable::empty()).unwrap();
    let port = server.create_host().await.unwrap().port();
    let (first, _first_rx, _) = join(port, HandlerTable::empty(), &mut server_rx).await;

    // Act: the TCP handshake succeeds, then the host closes the socket.
    let (second, mut second_rx) = Client::new(fast_client_config(), HandlerTable::empty()).unwrap();
    second.connect("127.0.0.1", port, WAIT).await.unwrap();

    // Assert
    wait_for(&mut server_rx, |e| matches!(e, ServerEvent::ClientRejected { .. })).await;
    wait_for(&mut second_rx, |e| {
        matches!(
            e,
            ClientEvent::Disconnected {
                reason: DisconnectReason::Remote
            }
        )
    })
    .await;
    assert_eq!(server.connection_count(), 1);

    first.disconnect().await;
    server.stop().await;
}
