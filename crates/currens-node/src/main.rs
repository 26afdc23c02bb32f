//! Currens node: entry point.
//!
//! Runs one Currens participant from the command line.  The same binary can be
//! a pure relay server, a host that also takes part in the session, or a
//! client that connects to either and optionally sends one call.
//!
//! # Usage
//!
//! ```text
//! currens-node [--config PATH] [--port PORT] serve
//! currens-node [--config PATH] [--port PORT] host
//! currens-node [--config PATH] [--port PORT] connect [--address HOST]
//!              [--timeout-ms MS] [--to ID] [METHOD [ARGS...]]
//! ```
//!
//! Settings come from the TOML config file (see
//! `currens_net::infrastructure::storage::config`); `--port` and the
//! `connect` flags override it.  The log filter is `RUST_LOG` when set,
//! otherwise `[node] log_level` from the config file.
//!
//! Every node registers the built-ins in [`handlers`]: `Ping`, `Pong` and
//! `Echo`.  For example, with a host running:
//!
//! ```text
//! currens-node connect Echo "hello everyone"
//! ```

mod handlers;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use currens_core::{ConnectionId, HandlerTable};
use currens_net::infrastructure::storage::config::{config_file_path, load_config, AppConfig};
use currens_net::{Client, ClientEvent, DisconnectReason, Server, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Currens RPC node.
#[derive(Debug, Parser)]
#[command(
    name = "currens-node",
    about = "Run a Currens RPC server, host or client",
    version
)]
struct Cli {
    /// Config file to read instead of the platform default.
    #[arg(long, global = true, env = "CURRENS_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (serve/host) or connect to (connect).
    #[arg(long, global = true, env = "CURRENS_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Relay calls between clients without taking part.
    Serve,
    /// Accept clients and take part in the session as id 1.
    Host,
    /// Connect to a server or host.
    Connect(ConnectArgs),
}

#[derive(Debug, ClapArgs)]
struct ConnectArgs {
    /// Host name or IP address of the server.
    #[arg(long, default_value = "127.0.0.1", env = "CURRENS_ADDRESS")]
    address: String,

    /// Give up connecting after this many milliseconds.
    ///
    /// Defaults to `[network] connect_timeout_ms` from the config file.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Send the call to this connection id instead of broadcasting it.
    #[arg(long)]
    to: Option<ConnectionId>,

    /// Method to call once connected.
    method: Option<String>,

    /// Parameters for `method`, passed as strings.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    /// Loads the config file named by `--config`, or the platform default.
    ///
    /// A missing file yields the defaults.  When no platform config directory
    /// exists and no path was given, the defaults are used as well.
    fn load_app_config(&self) -> anyhow::Result<AppConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => match config_file_path() {
                Ok(path) => path,
                Err(_) => return Ok(AppConfig::default()),
            },
        };
        load_config(&path).with_context(|| format!("failed to load config from {}", path.display()))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app_config = cli.load_app_config()?;

    init_tracing(&app_config.node.log_level);

    let handlers = handlers::builtin_table().context("failed to register built-in handlers")?;

    match cli.command {
        Command::Serve => run_server(&app_config, cli.port, handlers, false).await,
        Command::Host => run_server(&app_config, cli.port, handlers, true).await,
        Command::Connect(args) => run_client(&app_config, cli.port, args, handlers).await,
    }
}

/// Installs the global subscriber.  `RUST_LOG` wins over the config value.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

// ── Server / host ─────────────────────────────────────────────────────────────

async fn run_server(
    app_config: &AppConfig,
    port: Option<u16>,
    handlers: HandlerTable,
    host: bool,
) -> anyhow::Result<()> {
    let mut config = app_config
        .server_config()
        .context("invalid [network] section")?;
    if let Some(port) = port {
        config.port = port;
    }

    let (server, mut events) =
        Server::new(config, handlers).context("invalid server configuration")?;
    let local_addr = if host {
        server.create_host().await
    } else {
        server.start().await
    }
    .context("failed to start listening")?;

    info!(%local_addr, role = %server.network_state(), "currens-node running; press Ctrl+C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("received Ctrl+C, stopping"),
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_server_event(&event),
                None => break,
            },
        }
    }

    server.stop().await;
    drain(&mut events, log_server_event);
    Ok(())
}

fn log_server_event(event: &ServerEvent) {
    match event {
        ServerEvent::Started { local_addr, role } => info!(%local_addr, %role, "started"),
        ServerEvent::StartFailed { reason } => error!("start failed: {reason}"),
        ServerEvent::ClientConnected { id, peer_addr } => {
            info!(id, %peer_addr, "client connected")
        }
        ServerEvent::ClientDisconnected { id } => info!(id, "client disconnected"),
        ServerEvent::DataReceived { from, packet } => {
            debug!(from, method = %packet.name, arity = packet.arity(), "call received")
        }
        ServerEvent::ReceiveFailed { from, reason } => warn!(from, "bad frame: {reason}"),
        ServerEvent::DispatchFailed { from, error } => warn!(from, "call failed: {error}"),
        ServerEvent::RelayFailed { from, error } => warn!(from, "relay failed: {error}"),
        ServerEvent::ClientRejected { peer_addr, reason } => {
            warn!(%peer_addr, "client rejected: {reason}")
        }
        ServerEvent::Stopped => info!("stopped"),
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

async fn run_client(
    app_config: &AppConfig,
    port: Option<u16>,
    args: ConnectArgs,
    handlers: HandlerTable,
) -> anyhow::Result<()> {
    let config = app_config.client_config();
    let port = port.unwrap_or(app_config.network.port);

    let (client, mut events) =
        Client::new(config, handlers).context("invalid client configuration")?;
    let connected = match args.timeout_ms {
        Some(ms) => {
            client
                .connect(&args.address, port, Duration::from_millis(ms))
                .await
        }
        None => client.connect_default(&args.address, port).await,
    };
    let unique_id =
        connected.with_context(|| format!("failed to connect to {}:{port}", args.address))?;

    info!(unique_id, address = %args.address, port, "connected; press Ctrl+C to disconnect");

    if let Some(method) = &args.method {
        let rpc = client.rpc_handle();
        let params = args.args.clone();
        let sent = match args.to {
            Some(target) => rpc.rpc_to(target, method, params),
            None => rpc.rpc(method, params),
        };
        if let Err(e) = sent {
            error!(%method, "call failed: {e}");
        }
    }

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("received Ctrl+C, disconnecting"),
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
                break;
            }
            event = events.recv() => match event {
                Some(ClientEvent::Disconnected { reason: DisconnectReason::Remote }) => {
                    info!("host closed the connection");
                    return Ok(());
                }
                Some(event) => log_client_event(&event),
                None => break,
            },
        }
    }

    client.disconnect().await;
    drain(&mut events, log_client_event);
    Ok(())
}

fn log_client_event(event: &ClientEvent) {
    match event {
        ClientEvent::Connected {
            unique_id,
            host_addr,
        } => info!(unique_id, %host_addr, "connected"),
        ClientEvent::ConnectionFailed { reason } => error!("connection failed: {reason}"),
        ClientEvent::Disconnected { reason } => info!(?reason, "disconnected"),
        ClientEvent::DataReceived { packet } => {
            debug!(method = %packet.name, arity = packet.arity(), "call received")
        }
        ClientEvent::ReceiveFailed { reason } => warn!("bad frame: {reason}"),
        ClientEvent::DispatchFailed { error } => warn!("call failed: {error}"),
    }
}

/// Logs whatever is still queued after shutdown.
fn drain<E>(events: &mut mpsc::Receiver<E>, log: fn(&E)) {
    while let Ok(event) = events.try_recv() {
        log(&event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
