//! The (name, arity) → handler table and its builder.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::dispatch::handler::{Args, CallContext, HandlerError, RpcHandler};
use crate::protocol::packet::{Packet, MAX_PARAMS};

/// Errors raised while building a [`HandlerTable`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// Two registrations share a name and an arity, so a packet could not
    /// tell them apart.
    #[error("handler {name}/{arity} is registered more than once")]
    Duplicate { name: String, arity: usize },

    #[error("handler name must not be empty")]
    EmptyName,

    #[error("handler {name}/{arity} exceeds the 32767-parameter wire limit")]
    ArityTooLarge { name: String, arity: usize },
}

/// Errors raised while dispatching a packet to its handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no handler registered for {name}/{arity}")]
    HandlerNotFound { name: String, arity: usize },

    #[error("handler {name} failed: {source}")]
    HandlerFailed { name: String, source: HandlerError },

    #[error("handler {name} panicked")]
    HandlerPanicked { name: String },
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn RpcHandler>,
    invoke_locally: bool,
}

type Key = (String, usize);

/// Collects registrations before a session starts.
///
/// # Example
///
/// ```rust
/// use currens_core::{Args, CallContext, HandlerError, HandlerTable};
///
/// let mut builder = HandlerTable::builder();
/// builder
///     .register("Ping", 0, |_: &CallContext<'_>, _: &Args<'_>| Ok(()))
///     .unwrap();
/// let table = builder.build();
/// assert!(table.resolve("Ping", 0).is_some());
/// assert!(table.resolve("Ping", 1).is_none());
/// ```
#[derive(Default)]
pub struct HandlerTableBuilder {
    entries: HashMap<Key, Registration>,
}

impl HandlerTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for calls to `name` with exactly `arity` parameters.
    pub fn register<F>(
        &mut self,
        name: &str,
        arity: usize,
        handler: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(&CallContext<'_>, &Args<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.insert(name, arity, false, Arc::new(handler))
    }

    /// Like [`register`](Self::register), but a call this process sends over
    /// the network also runs the handler here when `invoke_locally` is set.
    pub fn register_with<F>(
        &mut self,
        name: &str,
        arity: usize,
        invoke_locally: bool,
        handler: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(&CallContext<'_>, &Args<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.insert(name, arity, invoke_locally, Arc::new(handler))
    }

    /// Registers an already shared handler object (for example one service
    /// that backs several methods).
    pub fn register_shared(
        &mut self,
        name: &str,
        arity: usize,
        invoke_locally: bool,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<&mut Self, RegistrationError> {
        self.insert(name, arity, invoke_locally, handler)
    }

    pub fn build(self) -> HandlerTable {
        debug!(handlers = self.entries.len(), "handler table built");
        HandlerTable {
            entries: self.entries,
        }
    }

    fn insert(
        &mut self,
        name: &str,
        arity: usize,
        invoke_locally: bool,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<&mut Self, RegistrationError> {
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if arity > MAX_PARAMS {
            return Err(RegistrationError::ArityTooLarge {
                name: name.to_string(),
                arity,
            });
        }

        let key = (name.to_string(), arity);
        if self.entries.contains_key(&key) {
            return Err(RegistrationError::Duplicate {
                name: name.to_string(),
                arity,
            });
        }
        self.entries.insert(
            key,
            Registration {
                handler,
                invoke_locally,
            },
        );
        Ok(self)
    }
}

/// Immutable handler table, resolved once per received packet.
#[derive(Default)]
pub struct HandlerTable {
    entries: HashMap<Key, Registration>,
}

impl HandlerTable {
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::new()
    }

    /// An empty table (a pure relay server).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Finds the handler for `name` with `arity` parameters.
    pub fn resolve(&self, name: &str, arity: usize) -> Option<Arc<dyn RpcHandler>> {
        self.lookup(name, arity).map(|r| Arc::clone(&r.handler))
    }

    pub fn contains(&self, name: &str, arity: usize) -> bool {
        self.lookup(name, arity).is_some()
    }

    /// The registration's `invoke_locally` flag; `false` when unregistered.
    pub fn invokes_locally(&self, name: &str, arity: usize) -> bool {
        self.lookup(name, arity).is_some_and(|r| r.invoke_locally)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs `handler` and converts both error returns and panics into a
    /// [`DispatchError`].
    pub fn invoke(
        &self,
        name: &str,
        handler: &dyn RpcHandler,
        ctx: &CallContext<'_>,
        args: &Args<'_>,
    ) -> Result<(), DispatchError> {
        match catch_unwind(AssertUnwindSafe(|| handler.call(ctx, args))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DispatchError::HandlerFailed {
                name: name.to_string(),
                source,
            }),
            Err(_) => {
                warn!(method = name, "handler panicked");
                Err(DispatchError::HandlerPanicked {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Resolves and invokes the handler for `packet`.
    pub fn dispatch(&self, packet: &Packet, ctx: &CallContext<'_>) -> Result<(), DispatchError> {
        let handler = self
            .resolve(&packet.name, packet.arity())
            .ok_or_else(|| DispatchError::HandlerNotFound {
                name: packet.name.clone(),
                arity: packet.arity(),
            })?;

        debug!(
            method = %packet.name,
            arity = packet.arity(),
            sender = ctx.sender(),
            "invoking handler"
        );
        self.invoke(&packet.name, handler.as_ref(), ctx, &Args::new(&packet.params))
    }

    fn lookup(&self, name: &str, arity: usize) -> Option<&Registration> {
        self.entries.get(&(name.to_string(), arity))
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .entries
            .keys()
            .map(|(name, arity)| format!("{name}/{arity}"))
            .collect();
        keys.sort();
        f.debug_struct("HandlerTable").field("handlers", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dispatch::handler::Outbox;
    use crate::domain::routing::RouteError;
    use crate::params;

    struct NoOutbox;

    impl Outbox for NoOutbox {
        fn route(&self, _packet: Packet) -> Result<(), RouteError> {
            Err(RouteError::NotConnected)
        }
    }

    fn ok(_: &CallContext<'_>, _: &Args<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    #[test]
    fn test_same_name_different_arity_are_distinct() {
        let mut builder = HandlerTable::builder();
        builder.register("Foo", 1, ok).unwrap();
        builder.register("Foo", 2, ok).unwrap();
        let table = builder.build();
        assert_eq!(table.len(), 2);
        assert!(table.contains("Foo", 1));
        assert!(table.contains("Foo", 2));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut builder = HandlerTable::builder();
        builder.register("Foo", 1, ok).unwrap();
        let err = builder.register("Foo", 1, ok).err();
        assert_eq!(
            err,
            Some(RegistrationError::Duplicate {
                name: "Foo".to_string(),
                arity: 1
            })
        );
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let mut builder = HandlerTable::builder();
        assert_eq!(builder.register("", 0, ok).err(), Some(RegistrationError::EmptyName));
    }

    #[test]
    fn test_invoke_locally_flag_is_recorded() {
        let mut builder = HandlerTable::builder();
        builder.register_with("Chat", 1, true, ok).unwrap();
        builder.register("Ping", 0, ok).unwrap();
        let table = builder.build();
        assert!(table.invokes_locally("Chat", 1));
        assert!(!table.invokes_locally("Ping", 0));
        assert!(!table.invokes_locally("Missing", 0));
    }

    #[test]
    fn test_handler_error_becomes_dispatch_failure() {
        let mut builder = HandlerTable::builder();
        builder
            .register("Add", 2, |_: &CallContext<'_>, args: &Args<'_>| {
                let _: i32 = args.parse(0)?;
                Ok(())
            })
            .unwrap();
        let table = builder.build();
        let ctx = CallContext::new(1, 1, &NoOutbox);

        let result = table.dispatch(&Packet::local("Add", params!["nope", 1]), &ctx);

        assert!(matches!(
            result,
            Err(DispatchError::HandlerFailed {
                source: HandlerError::InvalidArgument { index: 0, .. },
                ..
            })
        ));
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let mut builder = HandlerTable::builder();
        builder
            .register("Boom", 0, |_: &CallContext<'_>, _: &Args<'_>| -> Result<(), HandlerError> {
                panic!("boom")
            })
            .unwrap();
        let table = builder.build();
        let ctx = CallContext::new(1, 1, &NoOutbox);

        let result = table.dispatch(&Packet::local("Boom", params![]), &ctx);

        assert_eq!(
            result,
            Err(DispatchError::HandlerPanicked {
                name: "Boom".to_string()
            })
        );
    }

    #[test]
    fn test_shared_service_backs_two_methods() {
        struct Counter(AtomicUsize);
        impl RpcHandler for Counter {
            fn call(&self, _: &CallContext<'_>, _: &Args<'_>) -> Result<(), HandlerError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut builder = HandlerTable::builder();
        builder.register_shared("A", 0, false, counter.clone()).unwrap();
        builder.register_shared("B", 0, false, counter.clone()).unwrap();
        let table = builder.build();
        let ctx = CallContext::new(1, 1, &NoOutbox);

        table.dispatch(&Packet::local("A", params![]), &ctx).unwrap();
        table.dispatch(&Packet::local("B", params![]), &ctx).unwrap();

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
