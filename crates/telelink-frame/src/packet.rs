//! Characteristic packet framing.
//!
//! A notify/write characteristic already delimits each transfer, so a packet
//! is the identifier byte followed verbatim by the payload. There is no
//! length field.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::Frame;
use crate::error::{FrameError, Result};

/// Encode one characteristic packet: `[identifier][payload...]`.
pub fn encode_packet(identifier: u8, payload: &[u8]) -> Bytes {
    let mut dst = BytesMut::with_capacity(1 + payload.len());
    dst.put_u8(identifier);
    dst.put_slice(payload);
    dst.freeze()
}

/// Decode one characteristic packet. The payload length is implicit.
pub fn decode_packet(packet: Bytes) -> Result<Frame> {
    if packet.is_empty() {
        return Err(FrameError::EmptyPacket);
    }
    let identifier = packet[0];
    Ok(Frame {
        identifier,
        payload: packet.slice(1..),
    })
}
