//! Integration tests for the currens-core packet codec.
//!
//! These tests go through the public API only and focus on the properties the
//! network runtime depends on: exact round-trips and stream framing.

use currens_core::protocol::codec::decode_body;
use currens_core::protocol::FRAME_HEADER_SIZE;
use currens_core::{decode_frame, encode_frame, params, Packet, ProtocolError};

/// Encodes a packet as a frame and decodes it back, asserting every byte was used.
fn roundtrip(packet: &Packet) -> Packet {
    let bytes = encode_frame(packet).expect("encode must succeed");
    let (decoded, consumed) = decode_frame(&bytes).expect("decode must succeed");
    assert_eq!(consumed, bytes.len(), "all bytes must be consumed");
    decoded
}

#[test]
fn test_roundtrip_preserves_name_params_and_target() {
    let cases = [
        Packet::broadcast("Ping", params![]),
        Packet::local("Log", params!["started"]),
        Packet::new("WriteToChat", params!["bob", "hi there", ""], 19216800112345),
        Packet::new("Tab\tName", params!["line1\nline2", "ünïcödé"], u64::MAX),
    ];

    for original in &cases {
        assert_eq!(&roundtrip(original), original);
    }
}

#[test]
fn test_stream_split_into_single_bytes_reassembles() {
    // Arrange: simulate a reader that receives one byte at a time.
    let packets = vec![
        Packet::broadcast("A", params!["x"]),
        Packet::new("B", params![1, 2], 12700154321),
    ];
    let mut wire = Vec::new();
    for p in &packets {
        wire.extend(encode_frame(p).unwrap());
    }

    // Act: accumulate into a buffer and drain whole frames as they complete.
    let mut buffer = Vec::new();
    let mut decoded = Vec::new();
    for byte in wire {
        buffer.push(byte);
        match decode_frame(&buffer) {
            Ok((packet, used)) => {
                decoded.push(packet);
                buffer.drain(..used);
            }
            Err(ProtocolError::Truncated { .. }) => continue,
            Err(other) => panic!("unexpected decode error: {other}"),
        }
    }

    // Assert
    assert_eq!(decoded, packets);
    assert!(buffer.is_empty());
}

#[test]
fn test_frame_body_is_decodable_on_its_own() {
    let packet = Packet::broadcast("Chat", params!["hello"]);
    let frame = encode_frame(&packet).unwrap();
    let body = &frame[FRAME_HEADER_SIZE..];
    assert_eq!(decode_body(body).unwrap(), packet);
}

#[test]
fn test_corrupted_count_is_reported_not_panicked() {
    let packet = Packet::broadcast("Chat", params!["hello"]);
    let mut frame = encode_frame(&packet).unwrap();
    // Count field sits after the 4-byte prefix, 2-byte name length and "Chat".
    let count_at = FRAME_HEADER_SIZE + 2 + 4;
    frame[count_at..count_at + 2].copy_from_slice(&5i16.to_be_bytes());

    let err = decode_frame(&frame).unwrap_err();

    assert!(err.is_malformed(), "got {err:?}");
}
