//! In-process characteristic pair for tests and loopback runs.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use telelink_frame::{decode_packet, encode_packet, Frame};
use tokio::sync::{mpsc, watch, Mutex};

use crate::characteristic::Characteristic;

struct Shared {
    online: watch::Sender<bool>,
    accepting_writes: AtomicBool,
    open: AtomicBool,
}

impl Shared {
    fn online(&self) -> bool {
        *self.online.borrow()
    }
}

/// Central-side end of an in-memory characteristic.
pub struct MemoryCharacteristic {
    address: String,
    shared: Arc<Shared>,
    notifications: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    writes: mpsc::UnboundedSender<Bytes>,
}

/// Device-side end of an in-memory characteristic.
pub struct MemoryPeripheral {
    shared: Arc<Shared>,
    notifications: mpsc::UnboundedSender<Bytes>,
    writes: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryCharacteristic {
    /// Create a connected central/peripheral pair. The device starts online.
    pub fn pair(address: impl Into<String>) -> (MemoryCharacteristic, MemoryPeripheral) {
        let (online, _) = watch::channel(true);
        let shared = Arc::new(Shared {
            online,
            accepting_writes: AtomicBool::new(true),
            open: AtomicBool::new(false),
        });
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        (
            MemoryCharacteristic {
                address: address.into(),
                shared: Arc::clone(&shared),
                notifications: Mutex::new(notify_rx),
                writes: write_tx,
            },
            MemoryPeripheral {
                shared,
                notifications: notify_tx,
                writes: Mutex::new(write_rx),
            },
        )
    }
}

#[async_trait]
impl Characteristic for MemoryCharacteristic {
    async fn open(&self) -> io::Result<String> {
        if !self.shared.online() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} is not advertising", self.address),
            ));
        }
        self.shared.open.store(true, Ordering::SeqCst);
        Ok(format!("mem://{}", self.address))
    }

    async fn write(&self, packet: Bytes) -> io::Result<()> {
        if !self.shared.online() || !self.shared.open.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        if !self.shared.accepting_writes.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.writes
            .send(packet)
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }

    async fn notification(&self) -> io::Result<Option<Bytes>> {
        let mut offline = self.shared.online.subscribe();
        let mut notifications = self.notifications.lock().await;
        tokio::select! {
            _ = offline.wait_for(|online| !online) => Ok(None),
            packet = notifications.recv() => Ok(packet),
        }
    }

    fn is_writable(&self) -> bool {
        self.shared.online()
            && self.shared.open.load(Ordering::SeqCst)
            && self.shared.accepting_writes.load(Ordering::SeqCst)
    }

    async fn release(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }
}

impl MemoryPeripheral {
    /// Send a notification carrying `payload` under `identifier`.
    pub fn notify(&self, identifier: u8, payload: &[u8]) {
        self.notify_raw(encode_packet(identifier, payload));
    }

    /// Send an arbitrary notification packet.
    pub fn notify_raw(&self, packet: Bytes) {
        let _ = self.notifications.send(packet);
    }

    /// Next packet the central wrote, decoded. `None` once the central is gone.
    pub async fn next_write(&self) -> Option<Frame> {
        loop {
            let packet = self.writes.lock().await.recv().await?;
            if let Ok(frame) = decode_packet(packet) {
                return Some(frame);
            }
        }
    }

    /// Drop off the air: pending receives end and writes fail.
    pub fn disconnect(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.online.send_replace(false);
    }

    /// Start advertising again.
    pub fn come_online(&self) {
        self.shared.online.send_replace(true);
    }

    /// Make the characteristic read-only (or writable again).
    pub fn refuse_writes(&self, refuse: bool) {
        self.shared.accepting_writes.store(!refuse, Ordering::SeqCst);
    }

    /// Whether a central currently has the characteristic open.
    pub fn is_open(&self) -> bool {
        self.shared.online() && self.shared.open.load(Ordering::SeqCst)
    }
}
