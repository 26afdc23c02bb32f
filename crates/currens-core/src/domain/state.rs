//! The role a process plays in the current session.

use std::fmt;

/// Which side of the star topology this process is on.
///
/// A session holds exactly one of these at a time.  `None` means nothing is
/// running: no listener, no upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkState {
    #[default]
    None,
    /// Accepts clients and is itself a participant (id 1).
    Host,
    /// Attached to one host.
    Client,
    /// Accepts clients; only relays unless a handler is registered.
    Server,
}

impl NetworkState {
    /// Returns `true` for the roles that own a listener and a registry.
    pub fn is_hosting(self) -> bool {
        matches!(self, NetworkState::Host | NetworkState::Server)
    }

    /// Returns `true` when any role is active.
    pub fn is_active(self) -> bool {
        self != NetworkState::None
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkState::None => "none",
            NetworkState::Host => "host",
            NetworkState::Client => "client",
            NetworkState::Server => "server",
        };
        f.write_str(s)
    }
}
