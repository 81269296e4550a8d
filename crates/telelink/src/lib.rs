//! Framed telemetry and control links between a host controller, a field
//! unit and the field unit's peripherals.
//!
//! # Crate Structure
//!
//! - [`frame`]: identifier-tagged framing for stream and characteristic media
//! - [`record`]: typed record registry and little-endian packing
//! - [`link`]: the `Link` abstraction, TCP and characteristic links, retry
//! - [`session`]: sessions, supervisors and the peripheral bridge

/// Re-export frame types.
pub mod frame {
    pub use telelink_frame::*;
}

/// Re-export record types.
pub mod record {
    pub use telelink_record::*;
}

/// Re-export link types.
pub mod link {
    pub use telelink_link::*;
}

/// Re-export session types.
pub mod session {
    pub use telelink_session::*;
}
