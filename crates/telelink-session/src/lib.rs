//! Session orchestration for telelink.
//!
//! A [`Session`] runs the outbound, inbound and media loops over one
//! connected link and ends as a whole when any of them sees the link fail.
//! [`HostSupervisor`] and [`FieldSupervisor`] own reconnection.
//! [`PeripheralBridge`] forwards records between the host session and a
//! fixed set of peripheral links.

pub mod bridge;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod outbox;
pub mod routing;
pub mod session;
pub mod supervisor;

pub use bridge::{Forward, Peripheral, PeripheralBridge, PeripheralStatus};
pub use config::{
    BridgeConfig, FieldConfig, HostConfig, PeripheralConfig, RetryConfig, RouteConfig,
    ScheduleConfig, ScheduleEntry, SessionConfig,
};
pub use control::{ControlCommand, PERIPHERAL_RECONFIGURE, PERIPHERAL_SETUP};
pub use dispatch::{classify, Inbound};
pub use error::{Result, SessionError};
pub use media::{MediaSource, SharedMedia};
pub use outbox::Outbox;
pub use routing::{Route, RoutingTable};
pub use session::{
    EndReason, InboundHandler, NoopHandler, Session, SessionReport, SessionState,
};
pub use supervisor::{FieldSupervisor, HostSupervisor, SupervisorSummary};
