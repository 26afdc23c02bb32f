//! Network infrastructure: everything that owns a socket or a task.
//!
//! # Sub-modules
//!
//! - **`connection`** – One TCP stream split into a reader task and a writer
//!   task.  The reader turns length-prefixed frames into [`Inbound`] items on
//!   the session's shared work queue; the writer drains an outbound queue.
//!
//! - **`registry`** – Thread-safe map from connection id to [`Connection`].
//!
//! - **`accept`** – The accept loop: derives ids and registers new clients.
//!
//! - **`dispatch`** – The per-session dispatch loop: consumes the work queue,
//!   runs handlers, relays packets, and sweeps dead connections.
//!
//! - **`session`** – Role, unique id, registry and handler table of one
//!   running session, plus the [`RpcHandle`] used to send calls.
//!
//! - **`server`** / **`client`** – Lifecycle (start, create host, connect,
//!   stop, disconnect) and the typed event streams.
//!
//! [`Inbound`]: connection::Inbound
//! [`Connection`]: connection::Connection
//! [`RpcHandle`]: session::RpcHandle

pub mod accept;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod registry;
pub mod server;
pub mod session;
