//! Typed record registry.
//!
//! Every record kind exchanged over a link (servo batch, motor batch,
//! orientation, config) is defined once at startup under a 1-byte
//! identifier with a fixed element type and element count. The registry
//! turns opaque payloads into integer values and back.
//!
//! A registry is an ordinary value: construct one per process (or per
//! test) and share it behind an `Arc`.

pub mod element;
pub mod error;
pub mod registry;

pub use element::ElementType;
pub use error::{RecordError, Result};
pub use registry::{RecordHandle, RecordRegistry, RecordSpec};
