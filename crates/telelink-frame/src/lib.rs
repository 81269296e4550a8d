//! Identifier-tagged framing shared by every telelink medium.
//!
//! Stream media (TCP) carry frames with an explicit header:
//! - A 1-byte identifier selecting the record, media or control stream
//! - A 4-byte big-endian payload length
//!
//! Characteristic media (notify/write) deliver one frame per packet, so the
//! length is implicit: `[identifier][payload...]`.

pub mod codec;
pub mod error;
pub mod ident;
pub mod packet;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use ident::{identifier_name, is_reserved, CONTROL, MEDIA};
pub use packet::{decode_packet, encode_packet};
pub use reader::FrameReader;
pub use writer::FrameWriter;
