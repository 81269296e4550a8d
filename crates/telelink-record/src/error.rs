use crate::element::ElementType;

/// Errors raised by the record registry.
///
/// All of these indicate a caller bug or a peer speaking a different record
/// layout; none of them are retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The identifier is already registered.
    #[error("record identifier {0:#04x} already defined")]
    DuplicateIdentifier(u8),

    /// The identifier is outside the record range (1-255).
    #[error("record identifier {0:#04x} is not allowed (must be 1-255)")]
    InvalidIdentifier(u8),

    /// A record must hold at least one element.
    #[error("record {identifier:#04x} has invalid length {length}")]
    InvalidLength { identifier: u8, length: usize },

    /// The supplied values or bytes do not match the record layout.
    #[error("record {identifier:#04x} length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        identifier: u8,
        expected: usize,
        actual: usize,
    },

    /// A stored value does not fit the element type.
    #[error("record {identifier:#04x} value {value} at index {index} does not fit {element_type}")]
    EncodeOverflow {
        identifier: u8,
        index: usize,
        value: i64,
        element_type: ElementType,
    },

    /// No record is registered under the identifier.
    #[error("no record registered for identifier {0:#04x}")]
    UnknownIdentifier(u8),
}

pub type Result<T> = std::result::Result<T, RecordError>;
