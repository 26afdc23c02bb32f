//! Binary codec for encoding and decoding Currens packets.
//!
//! Wire format:
//! ```text
//! frame := [body_len:4][body:N]
//! body  := [name_len:2][name][param_count:2]([param_len:4][param])*[send_to:8]
//! ```
//! All multi-byte integers are big-endian.  `param_count` is signed (an `i16`)
//! and must not be negative.  Every string is UTF-8.
//!
//! The frame prefix is what makes TCP's byte stream safe to consume: the
//! receiver reads exactly `body_len` bytes per packet, so split and merged
//! deliveries never corrupt a packet.

use thiserror::Error;

use crate::protocol::packet::{Packet, FRAME_HEADER_SIZE, MAX_METHOD_NAME_LEN, MAX_PARAMS};

/// Errors that can occur during packet encoding or decoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input ended before the named field could be read.
    #[error("malformed packet: truncated {field}: need {needed} bytes, got {available}")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// The declared parameter count could not be satisfied by the body.
    #[error("malformed packet: declared {declared} parameter(s) but only {decoded} could be read")]
    ParamCountMismatch { declared: usize, decoded: usize },

    /// A field held a value that is structurally invalid (negative count,
    /// invalid UTF-8, leftover bytes inside a frame).
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// The frame header announces a body larger than the receiver accepts.
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The packet cannot be represented on the wire.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}

impl ProtocolError {
    /// Returns `true` for errors raised while decoding received bytes.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::Truncated { .. }
                | ProtocolError::ParamCountMismatch { .. }
                | ProtocolError::MalformedPacket(_)
        )
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes the body of `packet` (without the frame prefix).
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidPacket`] if the method name is empty or
/// longer than 65535 bytes, if there are more than 32767 parameters, or if a
/// parameter does not fit a 32-bit length prefix.
///
/// # Examples
///
/// ```rust
/// use currens_core::{decode_packet, encode_packet, params, Packet};
///
/// let packet = Packet::broadcast("Chat", params!["hello"]);
/// let bytes = encode_packet(&packet).unwrap();
/// let (decoded, consumed) = decode_packet(&bytes).unwrap();
/// assert_eq!(decoded, packet);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    validate(packet)?;

    let body_len = encoded_body_len(packet);
    let mut buf = Vec::with_capacity(body_len);
    write_body(&mut buf, packet);
    Ok(buf)
}

/// Encodes `packet` as a complete frame: 4-byte body length followed by the body.
///
/// # Errors
///
/// Same as [`encode_packet`], plus [`ProtocolError::InvalidPacket`] if the
/// body does not fit the 32-bit frame length.
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    validate(packet)?;

    let body_len = encoded_body_len(packet);
    let prefix = u32::try_from(body_len).map_err(|_| {
        ProtocolError::InvalidPacket(format!("packet body of {body_len} bytes exceeds frame limit"))
    })?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + body_len);
    buf.extend_from_slice(&prefix.to_be_bytes());
    write_body(&mut buf, packet);
    Ok(buf)
}

/// Decodes one packet body from the beginning of `bytes`.
///
/// Returns the packet and the number of bytes consumed, so the caller can
/// advance their read cursor.
///
/// # Errors
///
/// Returns a malformed-packet [`ProtocolError`] if the input ends early, the
/// declared parameter count cannot be satisfied, the count is negative, or a
/// string is not valid UTF-8.
pub fn decode_packet(bytes: &[u8]) -> Result<(Packet, usize), ProtocolError> {
    let (name, mut off) = read_string_u16(bytes, 0, "method name")?;
    if name.is_empty() {
        return Err(ProtocolError::MalformedPacket("empty method name".to_string()));
    }

    let raw_count = read_i16(bytes, off, "parameter count")?;
    off += 2;
    if raw_count < 0 {
        return Err(ProtocolError::MalformedPacket(format!(
            "negative parameter count: {raw_count}"
        )));
    }
    let declared = raw_count as usize;

    // Cap the pre-allocation: a hostile count must not reserve memory the
    // body cannot back.
    let mut params = Vec::with_capacity(declared.min(bytes.len() / 4));
    for _ in 0..declared {
        match read_string_u32(bytes, off, "parameter") {
            Ok((param, next)) => {
                params.push(param);
                off = next;
            }
            Err(ProtocolError::Truncated { .. }) => {
                return Err(ProtocolError::ParamCountMismatch {
                    declared,
                    decoded: params.len(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    let send_to = read_u64(bytes, off, "target id")?;
    off += 8;

    Ok((Packet { name, params, send_to }, off))
}

/// Decodes one complete frame from the beginning of `bytes`.
///
/// Returns the packet and the total number of bytes consumed (prefix + body).
/// A frame whose body is followed by further frames decodes fine; a body that
/// contains bytes beyond the packet it encodes is rejected.
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] if `bytes` holds less than one whole
/// frame, or any error [`decode_packet`] reports for the body.
pub fn decode_frame(bytes: &[u8]) -> Result<(Packet, usize), ProtocolError> {
    let body_len = read_u32(bytes, 0, "frame header")? as usize;
    let total = FRAME_HEADER_SIZE + body_len;
    if bytes.len() < total {
        return Err(ProtocolError::Truncated {
            field: "frame body",
            needed: total,
            available: bytes.len(),
        });
    }

    let body = &bytes[FRAME_HEADER_SIZE..total];
    let packet = decode_body(body)?;
    Ok((packet, total))
}

/// Decodes a frame body that must contain exactly one packet.
///
/// This is what a stream reader calls after reading `body_len` bytes.
///
/// # Errors
///
/// Any [`decode_packet`] error, or [`ProtocolError::MalformedPacket`] when
/// bytes remain after the packet.
pub fn decode_body(body: &[u8]) -> Result<Packet, ProtocolError> {
    let (packet, consumed) = decode_packet(body)?;
    if consumed != body.len() {
        return Err(ProtocolError::MalformedPacket(format!(
            "{} trailing byte(s) after packet",
            body.len() - consumed
        )));
    }
    Ok(packet)
}

/// Parses a 4-byte frame header into the announced body length.
pub fn frame_body_len(header: [u8; FRAME_HEADER_SIZE]) -> usize {
    u32::from_be_bytes(header) as usize
}

// ── Encoding helpers ──────────────────────────────────────────────────────────

fn validate(packet: &Packet) -> Result<(), ProtocolError> {
    if packet.name.is_empty() {
        return Err(ProtocolError::InvalidPacket("method name must not be empty".to_string()));
    }
    if packet.name.len() > MAX_METHOD_NAME_LEN {
        return Err(ProtocolError::InvalidPacket(format!(
            "method name of {} bytes exceeds {MAX_METHOD_NAME_LEN}",
            packet.name.len()
        )));
    }
    if packet.params.len() > MAX_PARAMS {
        return Err(ProtocolError::InvalidPacket(format!(
            "{} parameters exceed the limit of {MAX_PARAMS}",
            packet.params.len()
        )));
    }
    if let Some(param) = packet.params.iter().find(|p| u32::try_from(p.len()).is_err()) {
        return Err(ProtocolError::InvalidPacket(format!(
            "parameter of {} bytes exceeds the 32-bit length prefix",
            param.len()
        )));
    }
    Ok(())
}

fn encoded_body_len(packet: &Packet) -> usize {
    2 + packet.name.len() + 2 + packet.params.iter().map(|p| 4 + p.len()).sum::<usize>() + 8
}

/// Writes the body.  `validate` must have accepted the packet first.
fn write_body(buf: &mut Vec<u8>, packet: &Packet) {
    buf.extend_from_slice(&(packet.name.len() as u16).to_be_bytes());
    buf.extend_from_slice(packet.name.as_bytes());
    buf.extend_from_slice(&(packet.params.len() as i16).to_be_bytes());
    for param in &packet.params {
        buf.extend_from_slice(&(param.len() as u32).to_be_bytes());
        buf.extend_from_slice(param.as_bytes());
    }
    buf.extend_from_slice(&packet.send_to.to_be_bytes());
}

// ── Decoding helpers ──────────────────────────────────────────────────────────

fn require(buf: &[u8], offset: usize, len: usize, field: &'static str) -> Result<(), ProtocolError> {
    let needed = offset.saturating_add(len);
    if buf.len() < needed {
        Err(ProtocolError::Truncated {
            field,
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn read_i16(buf: &[u8], offset: usize, field: &'static str) -> Result<i16, ProtocolError> {
    require(buf, offset, 2, field)?;
    Ok(i16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

fn read_u32(buf: &[u8], offset: usize, field: &'static str) -> Result<u32, ProtocolError> {
    require(buf, offset, 4, field)?;
    Ok(u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

fn read_u64(buf: &[u8], offset: usize, field: &'static str) -> Result<u64, ProtocolError> {
    require(buf, offset, 8, field)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    Ok(u64::from_be_bytes(raw))
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after it.
fn read_string_u16(
    buf: &[u8],
    offset: usize,
    field: &'static str,
) -> Result<(String, usize), ProtocolError> {
    require(buf, offset, 2, field)?;
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    read_utf8(buf, offset + 2, len, field)
}

/// Reads a 4-byte length prefix and then that many UTF-8 bytes.
fn read_string_u32(
    buf: &[u8],
    offset: usize,
    field: &'static str,
) -> Result<(String, usize), ProtocolError> {
    let len = read_u32(buf, offset, field)? as usize;
    read_utf8(buf, offset + 4, len, field)
}

fn read_utf8(
    buf: &[u8],
    start: usize,
    len: usize,
    field: &'static str,
) -> Result<(String, usize), ProtocolError> {
    require(buf, start, len, field)?;
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPacket(format!("{field} is not valid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
