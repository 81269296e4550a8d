//! Link abstraction over the two physical media a telelink system uses.
//!
//! - [`StreamLink`]: an ordered TCP byte stream carrying 5-byte-header frames
//! - [`CharacteristicLink`]: a notify/write characteristic carrying one
//!   `[identifier][payload]` packet per transfer
//!
//! Both implement [`Link`]. A link moves through
//! `Disconnected → Connecting → Connected → (Faulted | Disconnected)`; any
//! I/O error after connect faults it until `close()` and a new `connect()`.

pub mod characteristic;
pub mod coalesce;
pub mod error;
pub mod memory;
pub mod retry;
pub mod state;
pub mod stream;
pub mod traits;

pub use characteristic::{Characteristic, CharacteristicConfig, CharacteristicLink};
pub use coalesce::{CoalesceConfig, CoalescingLink};
pub use error::{LinkError, Result};
pub use memory::{MemoryCharacteristic, MemoryPeripheral};
pub use retry::{connect_with_retry, RetryPolicy};
pub use state::{LinkState, Role};
pub use stream::{StreamConfig, StreamLink};
pub use traits::{Endpoints, Link};
