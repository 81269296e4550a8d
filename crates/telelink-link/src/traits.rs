use std::fmt;

use async_trait::async_trait;
use telelink_frame::Frame;

use crate::error::Result;
use crate::state::{LinkState, Role};

/// Local and remote address of an established link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub local: String,
    pub remote: String,
}

impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}

/// A connection to one peer over some medium.
///
/// `send` and `receive` take `&self` and may run at the same time from one
/// sender task and one receiver task. Concurrent senders are serialised so
/// frames never interleave on the wire.
#[async_trait]
pub trait Link: Send + Sync {
    /// Establish the connection. On failure the link stays `Disconnected`.
    async fn connect(&self) -> Result<Endpoints>;

    /// Send one frame.
    async fn send(&self, identifier: u8, payload: &[u8]) -> Result<()>;

    /// Receive the next frame.
    async fn receive(&self) -> Result<Frame>;

    /// Release the medium. Idempotent, and safe from any state.
    async fn close(&self);

    /// Current lifecycle state.
    fn state(&self) -> LinkState;

    fn role(&self) -> Role;

    /// Configured peer (client) or bind (server) address.
    fn address(&self) -> &str;
}

#[async_trait]
impl<L: Link + ?Sized> Link for std::sync::Arc<L> {
    async fn connect(&self) -> Result<Endpoints> {
        (**self).connect().await
    }

    async fn send(&self, identifier: u8, payload: &[u8]) -> Result<()> {
        (**self).send(identifier, payload).await
    }

    async fn receive(&self) -> Result<Frame> {
        (**self).receive().await
    }

    async fn close(&self) {
        (**self).close().await
    }

    fn state(&self) -> LinkState {
        (**self).state()
    }

    fn role(&self) -> Role {
        (**self).role()
    }

    fn address(&self) -> &str {
        (**self).address()
    }
}
