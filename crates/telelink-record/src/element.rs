use std::fmt;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Fixed-width integer type of every element in a record.
///
/// Elements are encoded little-endian, matching the peripheral firmware's
/// in-memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
}

impl ElementType {
    /// Encoded width of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 => 4,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32)
    }

    /// Smallest representable value.
    pub fn min(self) -> i64 {
        match self {
            Self::Uint8 | Self::Uint16 | Self::Uint32 => 0,
            Self::Int8 => i8::MIN.into(),
            Self::Int16 => i16::MIN.into(),
            Self::Int32 => i32::MIN.into(),
        }
    }

    /// Largest representable value.
    pub fn max(self) -> i64 {
        match self {
            Self::Uint8 => u8::MAX.into(),
            Self::Uint16 => u16::MAX.into(),
            Self::Uint32 => u32::MAX.into(),
            Self::Int8 => i8::MAX.into(),
            Self::Int16 => i16::MAX.into(),
            Self::Int32 => i32::MAX.into(),
        }
    }

    pub fn contains(self, value: i64) -> bool {
        (self.min()..=self.max()).contains(&value)
    }

    /// Append one element. The value must already be range-checked.
    pub(crate) fn put(self, value: i64, dst: &mut impl BufMut) {
        match self {
            Self::Uint8 => dst.put_u8(value as u8),
            Self::Uint16 => dst.put_u16_le(value as u16),
            Self::Uint32 => dst.put_u32_le(value as u32),
            Self::Int8 => dst.put_i8(value as i8),
            Self::Int16 => dst.put_i16_le(value as i16),
            Self::Int32 => dst.put_i32_le(value as i32),
        }
    }

    /// Decode one element from exactly `width()` bytes.
    pub(crate) fn get(self, src: &[u8]) -> i64 {
        match self {
            Self::Uint8 => src[0].into(),
            Self::Uint16 => u16::from_le_bytes([src[0], src[1]]).into(),
            Self::Uint32 => u32::from_le_bytes([src[0], src[1], src[2], src[3]]).into(),
            Self::Int8 => (src[0] as i8).into(),
            Self::Int16 => i16::from_le_bytes([src[0], src[1]]).into(),
            Self::Int32 => i32::from_le_bytes([src[0], src[1], src[2], src[3]]).into(),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
        };
        f.write_str(name)
    }
}
