//! Application layer: use cases that sit between the public API and the sockets.
//!
//! # Sub-modules
//!
//! - **`route_packet`** – Executes a [`currens_core::RoutePlan`]: encodes the
//!   packet once, writes it to the chosen connections through the
//!   [`route_packet::PacketTransport`] trait, and runs the local handler.
//!   The trait is the seam that lets the routing rules be tested without
//!   sockets.

pub mod route_packet;
