//! # currens-core
//!
//! Shared library for the Currens RPC layer containing the packet codec,
//! addressing and routing rules, and the handler dispatch table.
//!
//! This crate is used by the network runtime (`currens-net`) on both the host
//! and the client side.  It has no dependencies on sockets, async runtimes, or
//! OS APIs, so everything in it can be unit-tested without a network.
//!
//! # Architecture overview
//!
//! Currens lets a process call named methods on other processes over raw TCP.
//! One process is the *host* (or *server*) and accepts many *clients*; every
//! call travels as a small self-describing [`Packet`]:
//!
//! - **`protocol`** – How a packet becomes bytes.  A packet is a method name,
//!   a list of string parameters, and a target address (`send_to`), wrapped in
//!   a length-prefixed frame so the receiver always knows where it ends.
//!
//! - **`domain`** – Addressing.  Connection identifiers, the meaning of the
//!   reserved `send_to` values (`0` broadcast, `1` local), the process role
//!   (`NetworkState`), and the pure routing decisions that say whether a packet
//!   runs locally, fans out to everyone, or goes to one peer.
//!
//! - **`dispatch`** – The handler table.  Handlers are registered once at
//!   startup under a (name, arity) key and resolved for every inbound packet.

pub mod dispatch;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `currens_core::Packet` instead of `currens_core::protocol::packet::Packet`.
pub use dispatch::{
    Args, CallContext, DispatchError, HandlerError, HandlerTable, HandlerTableBuilder, Outbox,
    RegistrationError, RpcHandler, MAX_CALL_DEPTH,
};
pub use domain::address::{derive_connection_id, ConnectionId, Destination, BROADCAST, LOCAL};
pub use domain::routing::{plan_inbound, plan_outbound, LocalInvoke, NetworkRoute, RouteError, RoutePlan};
pub use domain::state::NetworkState;
pub use protocol::codec::{decode_frame, decode_packet, encode_frame, encode_packet, ProtocolError};
pub use protocol::packet::Packet;
