use bytes::Bytes;
use telelink_frame::{Frame, CONTROL, MEDIA};

use crate::control::ControlCommand;

/// A received frame, classified by its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Opaque media payload (identifier 0x00).
    Media(Bytes),
    /// Recognised control command (identifier 0xFF).
    Control(ControlCommand),
    /// Control frame that is empty or carries an unknown code.
    InvalidControl(Bytes),
    /// Application record (0x01-0xFE).
    Record { identifier: u8, payload: Bytes },
}

/// Classify a frame for the inbound loop.
pub fn classify(frame: Frame) -> Inbound {
    match frame.identifier {
        MEDIA => Inbound::Media(frame.payload),
        CONTROL => match ControlCommand::parse(&frame.payload) {
            Some(cmd) => Inbound::Control(cmd),
            None => Inbound::InvalidControl(frame.payload),
        },
        identifier => Inbound::Record {
            identifier,
            payload: frame.payload,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_identifier() {
        assert_eq!(
            classify(Frame::new(0x00, &b"jpeg"[..])),
            Inbound::Media(Bytes::from_static(b"jpeg"))
        );
        assert_eq!(
            classify(Frame::new(0xFF, vec![1u8])),
            Inbound::Control(ControlCommand::ConnectPeripherals)
        );
        assert_eq!(
            classify(Frame::new(0xFF, Vec::<u8>::new())),
            Inbound::InvalidControl(Bytes::new())
        );
        assert_eq!(
            classify(Frame::new(0xFF, vec![42u8])),
            Inbound::InvalidControl(Bytes::from(vec![42u8]))
        );
        assert_eq!(
            classify(Frame::new(0x11, vec![90u8, 90])),
            Inbound::Record {
                identifier: 0x11,
                payload: Bytes::from(vec![90u8, 90])
            }
        );
    }
}
