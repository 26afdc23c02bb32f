//! currens-net library entry point.
//!
//! The async runtime around `currens-core`: TCP listeners and streams, the
//! connection registry, the per-session dispatch loop, and the public
//! [`Server`] / [`Client`] / [`RpcHandle`] surface.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `currens-node` binary share the same module tree.

pub mod application;
pub mod infrastructure;

pub use infrastructure::network::client::Client;
pub use infrastructure::network::config::{ClientConfig, ServerConfig, TransportConfig};
pub use infrastructure::network::error::NetError;
pub use infrastructure::network::events::{ClientEvent, DisconnectReason, ServerEvent};
pub use infrastructure::network::server::Server;
pub use infrastructure::network::session::RpcHandle;
