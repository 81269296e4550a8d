use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use telelink_frame::{decode_packet, encode_packet, Frame, FrameError};
use tracing::{debug, info, trace, warn};

use crate::error::{LinkError, Result};
use crate::state::{LinkState, Role, StateCell};
use crate::traits::{Endpoints, Link};

/// A notify/write characteristic on a remote device.
///
/// Implementations wrap whatever radio stack is available; every transfer
/// is one whole packet.
#[async_trait]
pub trait Characteristic: Send + Sync {
    /// Connect to the device and subscribe to notifications. Returns a
    /// description of the remote end.
    async fn open(&self) -> io::Result<String>;

    /// Write one packet to the characteristic.
    async fn write(&self, packet: Bytes) -> io::Result<()>;

    /// Wait for the next notification. `None` means the device went away.
    async fn notification(&self) -> io::Result<Option<Bytes>>;

    /// Whether a write is currently possible.
    fn is_writable(&self) -> bool;

    /// Unsubscribe and disconnect.
    async fn release(&self);
}

/// Configuration for a [`CharacteristicLink`].
#[derive(Debug, Clone)]
pub struct CharacteristicConfig {
    /// Bound on a connection attempt.
    pub connect_timeout: Duration,
}

impl Default for CharacteristicConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Link that carries one `[identifier][payload]` packet per characteristic
/// transfer. Always the client role.
pub struct CharacteristicLink<C> {
    address: String,
    characteristic: C,
    config: CharacteristicConfig,
    state: StateCell,
}

impl<C: Characteristic> CharacteristicLink<C> {
    pub fn new(address: impl Into<String>, characteristic: C) -> Self {
        Self {
            address: address.into(),
            characteristic,
            config: CharacteristicConfig::default(),
            state: StateCell::new(LinkState::Disconnected),
        }
    }

    pub fn with_config(mut self, config: CharacteristicConfig) -> Self {
        self.config = config;
        self
    }

    pub fn characteristic(&self) -> &C {
        &self.characteristic
    }

    fn fault(&self, err: &io::Error) -> LinkError {
        warn!(address = %self.address, error = %err, "characteristic link faulted");
        self.state.fault();
        LinkError::LinkFaulted(err.to_string())
    }
}

#[async_trait]
impl<C: Characteristic> Link for CharacteristicLink<C> {
    async fn connect(&self) -> Result<Endpoints> {
        let attempt = self.state.begin_connect()?;

        let opened = tokio::time::timeout(self.config.connect_timeout, self.characteristic.open())
            .await
            .map_err(|_| LinkError::Timeout {
                address: self.address.clone(),
                timeout: self.config.connect_timeout,
            })
            .and_then(|r| r.map_err(|e| LinkError::connect(&self.address, e)));

        match opened {
            Ok(remote) => {
                attempt.succeed();
                let endpoints = Endpoints {
                    local: "central".to_string(),
                    remote,
                };
                info!(address = %self.address, %endpoints, "characteristic link connected");
                Ok(endpoints)
            }
            Err(err) => {
                self.characteristic.release().await;
                Err(err)
            }
        }
    }

    async fn send(&self, identifier: u8, payload: &[u8]) -> Result<()> {
        self.state.check_connected()?;
        if !self.characteristic.is_writable() {
            return Err(LinkError::NotConnected);
        }

        let packet = encode_packet(identifier, payload);
        let result = tokio::select! {
            err = self.state.left_connected() => return Err(err),
            result = self.characteristic.write(packet) => result,
        };
        result.map_err(|e| self.fault(&e))
    }

    async fn receive(&self) -> Result<Frame> {
        loop {
            self.state.check_connected()?;
            let notified = tokio::select! {
                err = self.state.left_connected() => return Err(err),
                notified = self.characteristic.notification() => notified,
            };

            let packet = match notified {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    debug!(address = %self.address, "characteristic went away");
                    self.state.fault();
                    return Err(LinkError::ConnectionClosed);
                }
                Err(e) => return Err(self.fault(&e)),
            };

            match decode_packet(packet) {
                Ok(frame) => return Ok(frame),
                Err(FrameError::EmptyPacket) => {
                    trace!(address = %self.address, "ignoring empty notification");
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    async fn close(&self) {
        let previous = self.state.get();
        self.state.set(LinkState::Disconnected);
        if previous != LinkState::Disconnected {
            self.characteristic.release().await;
            debug!(address = %self.address, from = %previous, "characteristic link closed");
        }
    }

    fn state(&self) -> LinkState {
        self.state.get()
    }

    fn role(&self) -> Role {
        Role::Client
    }

    fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCharacteristic;

    #[tokio::test]
    async fn packets_carry_identifier_without_length() {
        let (central, peripheral) = MemoryCharacteristic::pair("bno");
        let link = CharacteristicLink::new("bno", central);
        link.connect().await.unwrap();

        link.send(0xFF, &[1]).await.unwrap();
        let written = peripheral.next_write().await.unwrap();
        assert_eq!(written.identifier, 0xFF);
        assert_eq!(written.payload.as_ref(), &[1]);

        peripheral.notify(0x02, &[10, 20, 30]);
        let frame = link.receive().await.unwrap();
        assert_eq!(frame.identifier, 0x02);
        assert_eq!(frame.payload.as_ref(), &[10, 20, 30]);
    }

    #[tokio::test]
    async fn empty_notifications_are_skipped() {
        let (central, peripheral) = MemoryCharacteristic::pair("imu");
        let link = CharacteristicLink::new("imu", central);
        link.connect().await.unwrap();

        peripheral.notify_raw(Bytes::new());
        peripheral.notify(0x03, &[7]);
        assert_eq!(link.receive().await.unwrap().identifier, 0x03);
    }

    #[tokio::test]
    async fn unwritable_characteristic_reports_not_connected() {
        let (central, peripheral) = MemoryCharacteristic::pair("servo");
        let link = CharacteristicLink::new("servo", central);
        link.connect().await.unwrap();

        peripheral.refuse_writes(true);
        assert!(matches!(
            link.send(0x01, &[0]).await,
            Err(LinkError::NotConnected)
        ));
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn device_disconnect_closes_receive() {
        let (central, peripheral) = MemoryCharacteristic::pair("servo");
        let link = CharacteristicLink::new("servo", central);
        link.connect().await.unwrap();

        peripheral.disconnect();
        assert!(matches!(
            link.receive().await,
            Err(LinkError::ConnectionClosed)
        ));
        assert_eq!(link.state(), LinkState::Faulted);

        link.close().await;
        peripheral.come_online();
        link.connect().await.unwrap();
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn offline_device_refuses_connect() {
        let (central, peripheral) = MemoryCharacteristic::pair("servo");
        peripheral.disconnect();
        let link = CharacteristicLink::new("servo", central);
        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectionRefused { .. }), "{err:?}");
        assert_eq!(link.state(), LinkState::Disconnected);
    }
}
