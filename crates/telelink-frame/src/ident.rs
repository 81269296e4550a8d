//! Reserved frame identifiers.
//!
//! Identifier `0x00` carries opaque media (one encoded video frame) and
//! `0xFF` carries control commands. Everything in between belongs to the
//! record registry.

/// Opaque media payload, e.g. one JPEG frame.
pub const MEDIA: u8 = 0x00;

/// Control/config command. The first payload byte is the command code.
pub const CONTROL: u8 = 0xFF;

/// First application-defined record identifier.
pub const RECORD_START: u8 = 0x01;

/// Last application-defined record identifier.
pub const RECORD_END: u8 = 0xFE;

/// Returns a human-readable name for an identifier.
pub fn identifier_name(id: u8) -> &'static str {
    match id {
        MEDIA => "MEDIA",
        CONTROL => "CONTROL",
        _ => "RECORD",
    }
}

/// Returns true if the identifier is handled outside the record registry.
pub fn is_reserved(id: u8) -> bool {
    id == MEDIA || id == CONTROL
}
