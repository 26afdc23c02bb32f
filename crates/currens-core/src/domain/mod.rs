//! Domain module: addressing, process roles, and routing decisions.
//!
//! Nothing in here touches a socket.  The network runtime asks these modules
//! *what* should happen to a packet and then performs the I/O itself.

pub mod address;
pub mod routing;
pub mod state;
