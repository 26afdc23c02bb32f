//! What a handler is, what it receives, and how it reports failure.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::domain::address::ConnectionId;
use crate::domain::routing::RouteError;
use crate::protocol::packet::Packet;

/// Errors a handler returns to the dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("missing argument at index {0}")]
    MissingArgument(usize),

    #[error("argument {index} ({value:?}) is invalid: {reason}")]
    InvalidArgument {
        index: usize,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Read-only view of a packet's parameters.
///
/// Parameters arrive as strings; `parse` turns one into whatever type the
/// handler expects.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    params: &'a [String],
}

impl<'a> Args<'a> {
    pub fn new(params: &'a [String]) -> Self {
        Self { params }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns the raw string at `index`.
    pub fn get(&self, index: usize) -> Result<&'a str, HandlerError> {
        self.params
            .get(index)
            .map(String::as_str)
            .ok_or(HandlerError::MissingArgument(index))
    }

    /// Parses the parameter at `index` as `T`.
    ///
    /// ```rust
    /// use currens_core::{Args, HandlerError};
    ///
    /// let raw = vec!["42".to_string(), "abc".to_string()];
    /// let args = Args::new(&raw);
    /// assert_eq!(args.parse::<u32>(0), Ok(42));
    /// assert!(matches!(args.parse::<u32>(1), Err(HandlerError::InvalidArgument { .. })));
    /// assert_eq!(args.parse::<u32>(2), Err(HandlerError::MissingArgument(2)));
    /// ```
    pub fn parse<T>(&self, index: usize) -> Result<T, HandlerError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.get(index)?;
        raw.parse::<T>().map_err(|e| HandlerError::InvalidArgument {
            index,
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.params.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &'a [String] {
        self.params
    }
}

/// Most handler calls one call may nest before further calls from handlers
/// are refused with [`RouteError::CallDepthExceeded`].
///
/// A handler that broadcasts its own method on a host runs itself again
/// synchronously; without a limit the chain only ends when the stack does.
pub const MAX_CALL_DEPTH: usize = 16;

/// Where packets originated inside a handler go.
///
/// The network runtime implements this with the same routing as its public
/// `rpc` / `rpc_to` entry points.
pub trait Outbox: Send + Sync {
    fn route(&self, packet: Packet) -> Result<(), RouteError>;

    /// Routes a call made by a handler running `depth` calls deep.
    ///
    /// An outbox that runs handlers itself must build their [`CallContext`]
    /// with [`CallContext::with_depth`] so the limit keeps counting.
    fn route_nested(&self, packet: Packet, depth: usize) -> Result<(), RouteError> {
        let _ = depth;
        self.route(packet)
    }
}

/// Everything a handler knows about the call besides its arguments.
pub struct CallContext<'a> {
    sender: ConnectionId,
    local_id: ConnectionId,
    depth: usize,
    outbox: &'a dyn Outbox,
}

impl<'a> CallContext<'a> {
    pub fn new(sender: ConnectionId, local_id: ConnectionId, outbox: &'a dyn Outbox) -> Self {
        Self {
            sender,
            local_id,
            depth: 0,
            outbox,
        }
    }

    /// Marks this context as belonging to a handler `depth` calls deep.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Id of the connection the packet arrived on.
    ///
    /// On a client this is always the host (`1`), since the host relays
    /// everything.  For a call that originated in this process it equals
    /// [`local_id`](Self::local_id).
    pub fn sender(&self) -> ConnectionId {
        self.sender
    }

    /// This process's id in the session.
    pub fn local_id(&self) -> ConnectionId {
        self.local_id
    }

    /// `0` for a call from the network or from application code; one more
    /// for every handler-originated call in between.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// `true` when the call originated in this process.
    pub fn is_local(&self) -> bool {
        self.sender == self.local_id
    }

    /// Broadcasts a new call, exactly like the session's `rpc`.
    ///
    /// # Errors
    ///
    /// [`RouteError::CallDepthExceeded`] once [`MAX_CALL_DEPTH`] is reached,
    /// plus whatever the outbox reports.
    pub fn rpc(&self, method: &str, params: Vec<String>) -> Result<(), RouteError> {
        self.originate(Packet::broadcast(method, params))
    }

    /// Sends a new call to one participant, exactly like the session's `rpc_to`.
    pub fn rpc_to(
        &self,
        target: ConnectionId,
        method: &str,
        params: Vec<String>,
    ) -> Result<(), RouteError> {
        self.originate(Packet::new(method, params, target))
    }

    pub fn outbox(&self) -> &'a dyn Outbox {
        self.outbox
    }

    fn originate(&self, packet: Packet) -> Result<(), RouteError> {
        let depth = self.depth + 1;
        if depth > MAX_CALL_DEPTH {
            warn!(method = %packet.name, depth, "handler call chain too deep; call refused");
            return Err(RouteError::CallDepthExceeded {
                method: packet.name,
                max: MAX_CALL_DEPTH,
            });
        }
        self.outbox.route_nested(packet, depth)
    }
}

impl fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("sender", &self.sender)
            .field("local_id", &self.local_id)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// A registered method implementation.
///
/// Closures implement this automatically.  Implement it by hand for a shared
/// service object that holds its own state behind interior mutability.
pub trait RpcHandler: Send + Sync {
    fn call(&self, ctx: &CallContext<'_>, args: &Args<'_>) -> Result<(), HandlerError>;
}

impl<F> RpcHandler for F
where
    F: Fn(&CallContext<'_>, &Args<'_>) -> Result<(), HandlerError> + Send + Sync,
{
    fn call(&self, ctx: &CallContext<'_>, args: &Args<'_>) -> Result<(), HandlerError> {
        self(ctx, args)
    }
}
