//! Handler dispatch: the table that maps (method name, arity) to code.
//!
//! Handlers are registered once, before a session starts, through a
//! [`HandlerTableBuilder`].  The finished [`HandlerTable`] is immutable and is
//! shared by `Arc` between the dispatch loop and the `rpc` entry points.

pub mod handler;
pub mod table;

pub use handler::{Args, CallContext, HandlerError, Outbox, RpcHandler, MAX_CALL_DEPTH};
pub use table::{DispatchError, HandlerTable, HandlerTableBuilder, RegistrationError};
