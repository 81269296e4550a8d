use bytes::Bytes;
use telelink_frame::Frame;
use tokio::sync::mpsc;

use crate::control::ControlCommand;
use crate::error::{Result, SessionError};

/// Default number of frames an outbox holds before `try_send` refuses.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// Queue of frames for a session's outbound loop.
///
/// Components outside the session (peripheral telemetry, operator commands)
/// enqueue here; the outbound loop drains it between ticks.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Frame>,
}

impl Outbox {
    /// Create an outbox and the receiver that drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a frame, waiting for room.
    pub async fn send(&self, identifier: u8, payload: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(Frame::new(identifier, payload))
            .await
            .map_err(|_| SessionError::OutboxClosed)
    }

    /// Enqueue a frame without waiting.
    pub fn try_send(&self, identifier: u8, payload: impl Into<Bytes>) -> Result<()> {
        self.tx
            .try_send(Frame::new(identifier, payload))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => SessionError::OutboxFull,
                mpsc::error::TrySendError::Closed(_) => SessionError::OutboxClosed,
            })
    }

    /// Enqueue a control command.
    pub async fn command(&self, command: ControlCommand) -> Result<()> {
        self.send(telelink_frame::CONTROL, command.payload().to_vec())
            .await
    }

    /// Whether the session behind this outbox has ended.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
