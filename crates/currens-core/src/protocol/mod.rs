//! Protocol module containing the packet type and the binary codec.

pub mod codec;
pub mod packet;

pub use codec::{decode_frame, decode_packet, encode_frame, encode_packet, ProtocolError};
pub use packet::{Packet, FRAME_HEADER_SIZE, MAX_METHOD_NAME_LEN, MAX_PARAMS};
