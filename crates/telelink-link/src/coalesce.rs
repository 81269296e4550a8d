use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use telelink_frame::{is_reserved, Frame};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::{LinkError, Result};
use crate::state::{LinkState, Role};
use crate::traits::{Endpoints, Link};

/// Settings for [`CoalescingLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalesceConfig {
    /// How long to wait for a newer frame with the same identifier.
    pub idle_window: Duration,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_millis(5),
        }
    }
}

enum Held {
    Frame(Frame),
    Error(LinkError),
}

/// Receive-side wrapper that collapses bursts of same-identifier frames.
///
/// After a record frame arrives, further frames are read until either the
/// idle window passes with nothing new or a frame with a different
/// identifier shows up. Only the newest frame of the burst is returned; a
/// frame with a different identifier is kept for the next `receive`.
/// Media and control frames are returned immediately.
pub struct CoalescingLink<L> {
    inner: L,
    config: CoalesceConfig,
    held: Mutex<Option<Held>>,
    superseded: AtomicU64,
}

impl<L: Link> CoalescingLink<L> {
    pub fn new(inner: L, config: CoalesceConfig) -> Self {
        Self {
            inner,
            config,
            held: Mutex::new(None),
            superseded: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Frames discarded because a newer one with the same identifier arrived.
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<L: Link> Link for CoalescingLink<L> {
    async fn connect(&self) -> Result<Endpoints> {
        self.inner.connect().await
    }

    async fn send(&self, identifier: u8, payload: &[u8]) -> Result<()> {
        self.inner.send(identifier, payload).await
    }

    async fn receive(&self) -> Result<Frame> {
        let mut held = self.held.lock().await;
        let mut current = match held.take() {
            Some(Held::Frame(frame)) => frame,
            Some(Held::Error(err)) => return Err(err),
            None => self.inner.receive().await?,
        };
        if is_reserved(current.identifier) {
            return Ok(current);
        }

        loop {
            match tokio::time::timeout(self.config.idle_window, self.inner.receive()).await {
                Err(_idle) => return Ok(current),
                Ok(Ok(next)) if next.identifier == current.identifier => {
                    self.superseded.fetch_add(1, Ordering::Relaxed);
                    trace!(identifier = next.identifier, "superseded record frame");
                    current = next;
                }
                Ok(Ok(next)) => {
                    *held = Some(Held::Frame(next));
                    return Ok(current);
                }
                Ok(Err(err)) => {
                    *held = Some(Held::Error(err));
                    return Ok(current);
                }
            }
        }
    }

    async fn close(&self) {
        self.held.lock().await.take();
        self.inner.close().await;
    }

    fn state(&self) -> LinkState {
        self.inner.state()
    }

    fn role(&self) -> Role {
        self.inner.role()
    }

    fn address(&self) -> &str {
        self.inner.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristic::CharacteristicLink;
    use crate::memory::{MemoryCharacteristic, MemoryPeripheral};

    async fn coalescing(
        window_ms: u64,
    ) -> (CoalescingLink<CharacteristicLink<MemoryCharacteristic>>, MemoryPeripheral) {
        let (central, peripheral) = MemoryCharacteristic::pair("imu");
        let link = CoalescingLink::new(
            CharacteristicLink::new("imu", central),
            CoalesceConfig {
                idle_window: Duration::from_millis(window_ms),
            },
        );
        link.connect().await.unwrap();
        (link, peripheral)
    }

    #[tokio::test]
    async fn burst_collapses_to_newest() {
        let (link, peripheral) = coalescing(20).await;
        for value in 0..5u8 {
            peripheral.notify(0x02, &[value]);
        }

        let frame = link.receive().await.unwrap();
        assert_eq!(frame.identifier, 0x02);
        assert_eq!(frame.payload.as_ref(), &[4]);
        assert_eq!(link.superseded(), 4);
    }

    #[tokio::test]
    async fn different_identifier_is_held_not_dropped() {
        let (link, peripheral) = coalescing(20).await;
        peripheral.notify(0x02, &[1]);
        peripheral.notify(0x02, &[2]);
        peripheral.notify(0x03, &[9]);

        let first = link.receive().await.unwrap();
        assert_eq!((first.identifier, first.payload.as_ref()), (0x02, &[2u8][..]));
        let second = link.receive().await.unwrap();
        assert_eq!((second.identifier, second.payload.as_ref()), (0x03, &[9u8][..]));
    }

    #[tokio::test]
    async fn reserved_identifiers_pass_straight_through() {
        let (link, peripheral) = coalescing(20).await;
        peripheral.notify(0xFF, &[0]);
        peripheral.notify(0xFF, &[1]);

        assert_eq!(link.receive().await.unwrap().payload.as_ref(), &[0]);
        assert_eq!(link.receive().await.unwrap().payload.as_ref(), &[1]);
        assert_eq!(link.superseded(), 0);
    }

    #[tokio::test]
    async fn error_after_burst_surfaces_on_next_receive() {
        let (link, peripheral) = coalescing(50).await;
        peripheral.notify(0x04, &[1]);
        let frame_then_drop = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            peripheral.disconnect();
        };
        let (frame, ()) = tokio::join!(link.receive(), frame_then_drop);
        assert_eq!(frame.unwrap().identifier, 0x04);
        assert!(matches!(
            link.receive().await,
            Err(LinkError::ConnectionClosed)
        ));
    }
}
