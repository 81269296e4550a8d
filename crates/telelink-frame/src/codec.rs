use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: identifier (1) + length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Largest payload a peer may declare unless configured otherwise (16 MiB,
/// enough for an uncompressed camera frame).
pub const DEFAULT_MAX_PAYLOAD: usize = 16 << 20;

/// One identifier-tagged unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Record, media or control identifier.
    pub identifier: u8,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(identifier: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            identifier,
            payload: payload.into(),
        }
    }
}

/// Encode a frame into the stream wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬─────────────────┐
/// │ Identifier   │ Length       │ Payload         │
/// │ (1B)         │ (4B BE)      │ (Length bytes)  │
/// └──────────────┴──────────────┴─────────────────┘
/// ```
pub fn encode_frame(identifier: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(identifier);
    dst.put_u32(len);
    dst.put_slice(payload);
    Ok(())
}

/// Take one complete frame off the front of `src`.
///
/// `Ok(None)` means more bytes are needed; nothing is consumed. A declared
/// length above `max_payload` is an error: there is no delimiter to resync on.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(needed) = expected_len(src) else {
        return Ok(None);
    };
    let declared = needed - HEADER_SIZE;
    if declared > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: declared,
            max: max_payload,
        });
    }
    if src.len() < needed {
        src.reserve(needed - src.len());
        return Ok(None);
    }

    let identifier = src.get_u8();
    src.advance(HEADER_SIZE - 1);
    Ok(Some(Frame {
        identifier,
        payload: src.split_to(declared).freeze(),
    }))
}

/// Number of bytes a complete frame needs, if the header is already buffered.
pub(crate) fn expected_len(src: &[u8]) -> Option<usize> {
    if src.len() < HEADER_SIZE {
        return None;
    }
    let payload_len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
    Some(HEADER_SIZE + payload_len)
}

/// Limits applied when reading and writing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Frames declaring a longer payload are rejected.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
