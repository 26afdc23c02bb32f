//! Built-in methods every node registers.
//!
//! | method | arity | behaviour                                                   |
//! |--------|-------|-------------------------------------------------------------|
//! | `Ping` | 0     | a host or server answers with `Pong(<own id>)` to the caller |
//! | `Pong` | 1     | logs the responder's id                                     |
//! | `Echo` | 1     | logs the text; also runs on the node that sent it           |
//!
//! A client cannot answer a `Ping` directly: its only peer is the host, and
//! `send_to = 1` always means "this process".  It logs the ping instead.

use currens_core::{
    params, Args, CallContext, ConnectionId, HandlerError, HandlerTable, RegistrationError, LOCAL,
};
use tracing::info;

/// Builds the table shared by every subcommand.
///
/// # Errors
///
/// Only if two built-ins collide on (name, arity), which would be a bug here.
pub fn builtin_table() -> Result<HandlerTable, RegistrationError> {
    let mut builder = HandlerTable::builder();
    builder
        .register("Ping", 0, ping)?
        .register("Pong", 1, pong)?
        .register_with("Echo", 1, true, echo)?;
    Ok(builder.build())
}

fn ping(ctx: &CallContext<'_>, _args: &Args<'_>) -> Result<(), HandlerError> {
    if ctx.is_local() || ctx.sender() == LOCAL {
        info!(local_id = ctx.local_id(), "ping");
        return Ok(());
    }
    info!(from = ctx.sender(), "ping; answering with pong");
    ctx.rpc_to(ctx.sender(), "Pong", params![ctx.local_id()])
        .map_err(|e| HandlerError::failed(format!("could not answer ping: {e}")))
}

fn pong(ctx: &CallContext<'_>, args: &Args<'_>) -> Result<(), HandlerError> {
    let responder: ConnectionId = args.parse(0)?;
    info!(responder, via = ctx.sender(), "pong");
    Ok(())
}

fn echo(ctx: &CallContext<'_>, args: &Args<'_>) -> Result<(), HandlerError> {
    let text = args.get(0)?;
    info!(from = ctx.sender(), "echo: {text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use currens_core::{Outbox, Packet, RouteError};

    use super::*;

    #[derive(Default)]
    struct RecordingOutbox {
        sent: Mutex<Vec<Packet>>,
    }

    impl Outbox for RecordingOutbox {
        fn route(&self, packet: Packet) -> Result<(), RouteError> {
            self.sent.lock().unwrap().push(packet);
            Ok(())
        }
    }

    #[test]
    fn test_builtin_table_registers_three_methods() {
        let table = builtin_table().unwrap();

        assert_eq!(table.len(), 3);
        assert!(table.contains("Ping", 0));
        assert!(table.contains("Pong", 1));
        assert!(table.contains("Echo", 1));
        assert!(table.invokes_locally("Echo", 1));
        assert!(!table.invokes_locally("Ping", 0));
    }

    #[test]
    fn test_ping_from_peer_answers_pong_to_that_peer() {
        // Arrange: a host (id 1) receives Ping from client 12700154321
        let outbox = RecordingOutbox::default();
        let ctx = CallContext::new(12700154321, LOCAL, &outbox);
        let params: Vec<String> = Vec::new();

        // Act
        ping(&ctx, &Args::new(&params)).unwrap();

        // Assert
        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name, "Pong");
        assert_eq!(sent[0].send_to, 12700154321);
        assert_eq!(sent[0].params, vec!["1"]);
    }

    #[test]
    fn test_ping_on_client_does_not_reply() {
        // Arrange: client 12700154321 receives Ping relayed by its host
        let outbox = RecordingOutbox::default();
        let ctx = CallContext::new(LOCAL, 12700154321, &outbox);
        let params: Vec<String> = Vec::new();

        // Act
        ping(&ctx, &Args::new(&params)).unwrap();

        // Assert
        assert!(outbox.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pong_rejects_non_numeric_id() {
        let outbox = RecordingOutbox::default();
        let ctx = CallContext::new(LOCAL, 12700154321, &outbox);
        let params = vec!["abc".to_string()];

        let result = pong(&ctx, &Args::new(&params));

        assert!(matches!(
            result,
            Err(HandlerError::InvalidArgument { index: 0, .. })
        ));
    }

    #[test]
    fn test_echo_accepts_any_text() {
        let outbox = RecordingOutbox::default();
        let ctx = CallContext::new(LOCAL, LOCAL, &outbox);
        let params = vec!["hello there".to_string()];

        assert!(echo(&ctx, &Args::new(&params)).is_ok());
        assert!(outbox.sent.lock().unwrap().is_empty());
    }
}
