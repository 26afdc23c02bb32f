//! One TCP connection: a reader task, a writer task, and a cheap handle.
//!
//! # Why two tasks per socket? (for beginners)
//!
//! A TCP stream can be split into an independent read half and write half.
//! The reader task sits in `read_exact` waiting for the next frame; the
//! writer task waits on a queue of encoded frames.  Neither can block the
//! other, and neither can block the dispatch loop, which only ever talks to
//! them through channels.
//!
//! Frames are length-prefixed (see `currens_core::protocol::codec`), so the
//! reader always knows exactly how many bytes belong to the current packet,
//! no matter how TCP splits or merges them.
//!
//! The writer's queue is bounded.  A peer that stops reading fills it, and
//! the next `send` drops the connection instead of buffering without limit.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use currens_core::protocol::codec::{decode_body, frame_body_len};
use currens_core::protocol::FRAME_HEADER_SIZE;
use currens_core::{ConnectionId, Packet, ProtocolError, RouteError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

/// Work items produced by reader tasks for the dispatch loop.
#[derive(Debug)]
pub enum Inbound {
    /// A complete, well-formed packet.
    Packet { from: ConnectionId, packet: Packet },
    /// A frame arrived but its body (or announced size) was invalid.
    Malformed {
        from: ConnectionId,
        error: ProtocolError,
    },
    /// The stream failed mid-read.
    Failed { from: ConnectionId, reason: String },
    /// The reader stopped; the connection is no longer connected.
    Closed { from: ConnectionId },
}

/// Messages for the writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Arc<[u8]>),
    /// Flush everything queued before this, then shut the write half down.
    Close,
}

struct Inner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    connected: Arc<AtomicBool>,
    outbound: mpsc::Sender<Outbound>,
    closed: watch::Sender<bool>,
    /// Stops the writer without flushing.
    abort: watch::Sender<bool>,
}

/// Handle to a live connection.  Clones share the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Splits `stream` and spawns its reader and writer tasks.
    ///
    /// Every frame the reader completes is pushed to `inbound` tagged with
    /// `id`; frames announcing more than `max_frame_len` body bytes end the
    /// connection.  At most `outbound_capacity` frames wait for the writer.
    pub(crate) fn spawn(
        stream: TcpStream,
        id: ConnectionId,
        peer_addr: SocketAddr,
        inbound: mpsc::Sender<Inbound>,
        max_frame_len: usize,
        outbound_capacity: usize,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(outbound_capacity);
        let (closed_tx, closed_rx) = watch::channel(false);
        let (abort_tx, abort_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(
            FrameWriter {
                id,
                writer: write_half,
                rx: out_rx,
                connected: Arc::clone(&connected),
                abort: abort_rx,
            }
            .run(),
        );
        tokio::spawn(
            FrameReader {
                id,
                reader: read_half,
                inbound,
                max_frame_len,
                connected: Arc::clone(&connected),
                outbound: out_tx.clone(),
                closed: closed_rx,
            }
            .run(),
        );

        Self {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                connected,
                outbound: out_tx,
                closed: closed_tx,
                abort: abort_tx,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// `false` once the stream hit EOF, an I/O error, or `close`.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Queues an encoded frame for the writer task.
    ///
    /// # Errors
    ///
    /// - [`RouteError::ConnectionClosed`] when the connection is no longer
    ///   connected; nothing is queued.
    /// - [`RouteError::OutboundQueueFull`] when the writer is too far behind.
    ///   The connection is dropped: the writer stops without flushing and the
    ///   reader ends, so the next sweep removes it from the registry.
    pub fn send(&self, frame: Arc<[u8]>) -> Result<(), RouteError> {
        if !self.is_connected() {
            return Err(RouteError::ConnectionClosed(self.id()));
        }
        match self.inner.outbound.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    id = self.id(),
                    peer = %self.peer_addr(),
                    capacity = self.inner.outbound.max_capacity(),
                    "outbound queue full; dropping connection"
                );
                self.abort();
                Err(RouteError::OutboundQueueFull(self.id()))
            }
            Err(TrySendError::Closed(_)) => Err(RouteError::ConnectionClosed(self.id())),
        }
    }

    /// Marks the connection closed, lets the writer flush what is already
    /// queued, and stops the reader.  Safe to call more than once.
    ///
    /// With a full queue there is nothing to flush into; the writer is
    /// stopped instead.
    pub fn close(&self) {
        if self.inner.connected.swap(false, Ordering::AcqRel) {
            debug!(id = self.id(), peer = %self.peer_addr(), "closing connection");
        }
        if let Err(TrySendError::Full(_)) = self.inner.outbound.try_send(Outbound::Close) {
            self.inner.abort.send_replace(true);
        }
        self.inner.closed.send_replace(true);
    }

    fn abort(&self) {
        self.inner.connected.store(false, Ordering::Release);
        self.inner.abort.send_replace(true);
        self.inner.closed.send_replace(true);
    }

    /// A connection with no socket behind it; frames land in the returned queue.
    #[cfg(test)]
    pub(crate) fn detached(id: ConnectionId) -> (Self, mpsc::Receiver<Outbound>) {
        Self::detached_with_capacity(id, 16)
    }

    #[cfg(test)]
    pub(crate) fn detached_with_capacity(
        id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (closed_tx, _) = watch::channel(false);
        let (abort_tx, _) = watch::channel(false);
        let conn = Self {
            inner: Arc::new(Inner {
                id,
                peer_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                connected: Arc::new(AtomicBool::new(true)),
                outbound: out_tx,
                closed: closed_tx,
                abort: abort_tx,
            }),
        };
        (conn, out_rx)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("peer_addr", &self.peer_addr())
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

enum FrameError {
    TooLarge(usize),
    Io(std::io::Error),
}

struct FrameReader {
    id: ConnectionId,
    reader: OwnedReadHalf,
    inbound: mpsc::Sender<Inbound>,
    max_frame_len: usize,
    connected: Arc<AtomicBool>,
    outbound: mpsc::Sender<Outbound>,
    closed: watch::Receiver<bool>,
}

impl FrameReader {
    async fn run(mut self) {
        let id = self.id;
        loop {
            let frame = tokio::select! {
                _ = self.closed.changed() => break,
                frame = read_frame(&mut self.reader, self.max_frame_len) => frame,
            };

            let item = match frame {
                Ok(Some(body)) => match decode_body(&body) {
                    Ok(packet) => {
                        trace!(id, method = %packet.name, "frame decoded");
                        Inbound::Packet { from: id, packet }
                    }
                    Err(error) => Inbound::Malformed { from: id, error },
                },
                Ok(None) => {
                    debug!(id, "peer closed the connection");
                    break;
                }
                Err(FrameError::TooLarge(len)) => {
                    warn!(id, len, max = self.max_frame_len, "oversized frame; closing connection");
                    let error = ProtocolError::FrameTooLarge {
                        len,
                        max: self.max_frame_len,
                    };
                    let _ = self.inbound.send(Inbound::Malformed { from: id, error }).await;
                    break;
                }
                Err(FrameError::Io(e)) => {
                    debug!(id, "read failed: {e}");
                    let reason = e.to_string();
                    let _ = self.inbound.send(Inbound::Failed { from: id, reason }).await;
                    break;
                }
            };

            if self.inbound.send(item).await.is_err() {
                // The dispatch loop is gone; the session is shutting down.
                break;
            }
        }

        self.connected.store(false, Ordering::Release);
        let _ = self.outbound.try_send(Outbound::Close);
        let _ = self.inbound.send(Inbound::Closed { from: id }).await;
    }
}

/// Reads one frame body.  `Ok(None)` means the peer closed between frames.
async fn read_frame(
    reader: &mut OwnedReadHalf,
    max_frame_len: usize,
) -> Result<Option<Vec<u8>>, FrameError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = frame_body_len(header);
    if len > max_frame_len {
        return Err(FrameError::TooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(FrameError::Io)?;
    Ok(Some(body))
}

// ── Writer ────────────────────────────────────────────────────────────────────

struct FrameWriter {
    id: ConnectionId,
    writer: OwnedWriteHalf,
    rx: mpsc::Receiver<Outbound>,
    connected: Arc<AtomicBool>,
    abort: watch::Receiver<bool>,
}

impl FrameWriter {
    async fn run(mut self) {
        let id = self.id;
        loop {
            // A dropped abort sender disables that branch rather than firing it.
            let message = tokio::select! {
                Ok(()) = self.abort.changed() => {
                    debug!(id, "writer aborted; queued frames discarded");
                    break;
                }
                message = self.rx.recv() => message,
            };
            let frame = match message {
                Some(Outbound::Frame(frame)) => frame,
                Some(Outbound::Close) | None => break,
            };

            let written = tokio::select! {
                Ok(()) = self.abort.changed() => {
                    debug!(id, "writer aborted mid-frame");
                    break;
                }
                written = self.writer.write_all(&frame) => written,
            };
            if let Err(e) = written {
                warn!(id, "write failed: {e}");
                self.connected.store(false, Ordering::Release);
                break;
            }
        }

        if let Err(e) = self.writer.shutdown().await {
            trace!(id, "shutdown after close: {e}");
        }
    }
}
