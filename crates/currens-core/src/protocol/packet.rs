//! The unit of transmission: one method invocation request.
//!
//! A [`Packet`] names the method to call, carries the call's parameters in
//! their string rendering, and says who should run it (`send_to`).  Parameter
//! types do not survive the trip; handlers parse the strings they need (see
//! [`crate::dispatch::Args`]).

use crate::domain::address::{ConnectionId, Destination, BROADCAST, LOCAL};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the length prefix in front of every packet body on the wire.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest parameter count representable by the signed 16-bit count field.
pub const MAX_PARAMS: usize = i16::MAX as usize;

/// Largest method name, in bytes, representable by the 16-bit length prefix.
pub const MAX_METHOD_NAME_LEN: usize = u16::MAX as usize;

/// A method invocation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    /// Method identifier.  Must be non-empty to be encoded.
    pub name: String,
    /// Ordered parameters in string form.  `params.len()` is the call arity.
    pub params: Vec<String>,
    /// Addressing field: `0` broadcast, `1` local, anything else a connection id.
    pub send_to: ConnectionId,
}

impl Packet {
    /// Creates a packet with an explicit target.
    pub fn new(name: impl Into<String>, params: Vec<String>, send_to: ConnectionId) -> Self {
        Self {
            name: name.into(),
            params,
            send_to,
        }
    }

    /// Creates a packet addressed to every participant.
    pub fn broadcast(name: impl Into<String>, params: Vec<String>) -> Self {
        Self::new(name, params, BROADCAST)
    }

    /// Creates a packet that only ever executes in the current process.
    pub fn local(name: impl Into<String>, params: Vec<String>) -> Self {
        Self::new(name, params, LOCAL)
    }

    /// Number of parameters, which together with the name selects the handler.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Interprets `send_to`.
    pub fn destination(&self) -> Destination {
        Destination::from_send_to(self.send_to)
    }

    /// Returns a copy of this packet re-addressed to `target`.
    pub fn readdressed(&self, target: ConnectionId) -> Self {
        Self {
            send_to: target,
            ..self.clone()
        }
    }
}

/// Renders a list of heterogeneous values into packet parameters.
///
/// ```rust
/// use currens_core::params;
///
/// let p = params![42u64, "alice", 1.5];
/// assert_eq!(p, vec!["42".to_string(), "alice".to_string(), "1.5".to_string()]);
/// assert!(params![].is_empty());
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<::std::string::String>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$(::std::string::ToString::to_string(&$value)),+]
    };
}
