//! Connection identifiers and the meaning of the `send_to` field.
//!
//! # How ids are derived (for beginners)
//!
//! Both ends of a TCP connection can see the same pair of endpoints, so both
//! can compute the same identifier without exchanging a message: the host
//! derives it from the client's *remote* address, and the client derives it
//! from its own *local* address.  The id is the IPv4 digits followed by the
//! port, read as a decimal number:
//!
//! ```text
//! 127.0.0.1:54321  →  "127" "0" "0" "1" "54321"  →  12700154321
//! ```
//!
//! This is compact and human-readable but **not unique**: `1.21.1.1:5` and
//! `12.1.1.1:5` both become `1211115`.  The registry refuses a second
//! connection with an id already in use.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Numeric identifier of a connection (and of a process in a session).
pub type ConnectionId = u64;

/// `send_to` value meaning "every participant".
pub const BROADCAST: ConnectionId = 0;

/// `send_to` value meaning "this process only".  Also the host's own id.
pub const LOCAL: ConnectionId = 1;

/// Interpreted form of a packet's `send_to` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Broadcast,
    Local,
    Peer(ConnectionId),
}

impl Destination {
    pub fn from_send_to(send_to: ConnectionId) -> Self {
        match send_to {
            BROADCAST => Destination::Broadcast,
            LOCAL => Destination::Local,
            id => Destination::Peer(id),
        }
    }

    pub fn send_to(self) -> ConnectionId {
        match self {
            Destination::Broadcast => BROADCAST,
            Destination::Local => LOCAL,
            Destination::Peer(id) => id,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast => f.write_str("broadcast"),
            Destination::Local => f.write_str("local"),
            Destination::Peer(id) => write!(f, "peer {id}"),
        }
    }
}

/// Derives the connection id for `addr`.
///
/// IPv4 (and IPv4-mapped IPv6) addresses use the digit concatenation
/// described in the module docs; twelve address digits plus five port digits
/// always fit a `u64`.  Other IPv6 addresses, and the degenerate results `0`
/// and `1` (which would alias the reserved `send_to` values), fall back to a
/// 64-bit FNV-1a hash of the address octets followed by the big-endian port,
/// moved off `0` and `1`.  FNV-1a is fixed by definition, so two builds with
/// different toolchains still agree on every id.
///
/// # Examples
///
/// ```rust
/// use currens_core::derive_connection_id;
///
/// let addr = "127.0.0.1:54321".parse().unwrap();
/// assert_eq!(derive_connection_id(addr), 12700154321);
/// ```
pub fn derive_connection_id(addr: SocketAddr) -> ConnectionId {
    let v4 = match addr.ip() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    };

    match v4 {
        Some(v4) => {
            let mut id: ConnectionId = 0;
            for octet in v4.octets() {
                id = append_digits(id, u64::from(octet));
            }
            let id = append_digits(id, u64::from(addr.port()));
            if id > LOCAL {
                id
            } else {
                hashed_id(addr)
            }
        }
        None => hashed_id(addr),
    }
}

/// Appends the decimal digits of `value` to `acc`.
fn append_digits(acc: ConnectionId, value: u64) -> ConnectionId {
    let mut scale = 10;
    while value >= scale {
        scale *= 10;
    }
    acc * scale + value
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: impl IntoIterator<Item = u8>) -> u64 {
    bytes.into_iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

fn hashed_id(addr: SocketAddr) -> ConnectionId {
    let port = addr.port().to_be_bytes();
    let hash = match addr.ip() {
        IpAddr::V4(v4) => fnv1a(v4.octets().into_iter().chain(port)),
        IpAddr::V6(v6) => fnv1a(v6.octets().into_iter().chain(port)),
    };
    match hash {
        BROADCAST | LOCAL => hash + 2,
        _ => hash,
    }
}
