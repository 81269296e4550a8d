use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use telelink_frame::{Frame, CONTROL};
use telelink_link::{connect_with_retry, Link, LinkError, LinkState, RetryPolicy};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::control::{ControlCommand, PERIPHERAL_SETUP};
use crate::error::{Result, SessionError};
use crate::outbox::Outbox;
use crate::routing::RoutingTable;
use crate::session::InboundHandler;

/// A named peripheral link.
pub struct Peripheral {
    pub name: String,
    pub link: Arc<dyn Link>,
}

impl Peripheral {
    pub fn new(name: impl Into<String>, link: Arc<dyn Link>) -> Self {
        Self {
            name: name.into(),
            link,
        }
    }
}

/// Snapshot of one peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralStatus {
    pub name: String,
    pub state: LinkState,
}

/// What happened to a host frame handed to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    /// Queued for the given peripheral.
    Queued { peripheral: usize },
    /// No route for the identifier.
    NoRoute,
    /// The target peripheral is not connected.
    Unavailable { peripheral: usize },
    /// The target peripheral's queue is full.
    Dropped { peripheral: usize },
}

struct Slot {
    name: String,
    link: Arc<dyn Link>,
    queue: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl Slot {
    fn queue(&self) -> MutexGuard<'_, Option<mpsc::Sender<Frame>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Workers {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

struct Inner {
    slots: Vec<Slot>,
    routes: RoutingTable,
    retry: RetryPolicy,
    setup_delay: Duration,
    setup_on_connect: bool,
    queue_capacity: usize,
    upstream: Mutex<Option<Outbox>>,
    workers: tokio::sync::Mutex<Option<Workers>>,
    cancel: CancellationToken,
}

/// Forwards records between the host session and a fixed set of peripherals.
///
/// Each peripheral gets its own worker that connects with the retry policy,
/// sends routed frames, and forwards its telemetry upstream. A failure on
/// one peripheral is logged and retried without touching the others or the
/// host session.
#[derive(Clone)]
pub struct PeripheralBridge {
    inner: Arc<Inner>,
}

impl PeripheralBridge {
    /// Build a bridge. Route targets must index into `peripherals`.
    pub fn new(
        peripherals: Vec<Peripheral>,
        routes: RoutingTable,
        config: &BridgeConfig,
        parent: &CancellationToken,
    ) -> Result<Self> {
        if let Some((id, route)) = routes
            .iter()
            .find(|(_, route)| route.peripheral >= peripherals.len())
        {
            return Err(SessionError::Routing(format!(
                "route for {id:#04x} targets peripheral {} of {}",
                route.peripheral,
                peripherals.len()
            )));
        }
        let slots = peripherals
            .into_iter()
            .map(|p| Slot {
                name: p.name,
                link: p.link,
                queue: Mutex::new(None),
            })
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                slots,
                routes,
                retry: config.retry.policy(),
                setup_delay: config.setup_delay(),
                setup_on_connect: config.setup_on_connect,
                queue_capacity: config.queue_capacity.max(1),
                upstream: Mutex::new(None),
                workers: tokio::sync::Mutex::new(None),
                cancel: parent.child_token(),
            }),
        })
    }

    /// Start a worker per peripheral, replacing any running workers.
    pub async fn connect_all(&self) {
        let mut workers = self.inner.workers.lock().await;
        if let Some(previous) = workers.take() {
            stop_workers(&self.inner, previous).await;
        }
        if self.inner.cancel.is_cancelled() {
            return;
        }

        let cancel = self.inner.cancel.child_token();
        let mut tasks = JoinSet::new();
        for index in 0..self.inner.slots.len() {
            let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
            *self.inner.slots[index].queue() = Some(tx);
            tasks.spawn(peripheral_worker(
                Arc::clone(&self.inner),
                index,
                cancel.clone(),
                rx,
            ));
        }
        info!(peripherals = self.inner.slots.len(), "peripheral workers started");
        *workers = Some(Workers { cancel, tasks });
    }

    /// Stop all workers and close every peripheral link.
    pub async fn shutdown(&self) {
        if let Some(previous) = self.inner.workers.lock().await.take() {
            stop_workers(&self.inner, previous).await;
            info!("peripheral workers stopped");
        }
    }

    /// Route a host frame to its peripheral.
    pub fn forward(&self, host_identifier: u8, payload: Bytes) -> Forward {
        let Some(route) = self.inner.routes.lookup(host_identifier) else {
            debug!(
                identifier = %format_args!("{host_identifier:#04x}"),
                "no peripheral route, dropping"
            );
            return Forward::NoRoute;
        };
        let slot = &self.inner.slots[route.peripheral];
        let outcome = self.enqueue(route.peripheral, Frame::new(route.identifier, payload));
        match outcome {
            Forward::Queued { .. } => trace!(
                peripheral = %slot.name,
                from = %format_args!("{host_identifier:#04x}"),
                to = %format_args!("{:#04x}", route.identifier),
                "routed frame"
            ),
            Forward::Dropped { .. } => warn!(
                peripheral = %slot.name,
                identifier = %format_args!("{host_identifier:#04x}"),
                "peripheral queue full, dropping frame"
            ),
            _ => debug!(
                peripheral = %slot.name,
                identifier = %format_args!("{host_identifier:#04x}"),
                "peripheral not connected, dropping frame"
            ),
        }
        outcome
    }

    /// Send a frame to every connected peripheral. Returns how many took it.
    pub fn broadcast(&self, identifier: u8, payload: Bytes) -> usize {
        (0..self.inner.slots.len())
            .filter(|&index| {
                matches!(
                    self.enqueue(index, Frame::new(identifier, payload.clone())),
                    Forward::Queued { .. }
                )
            })
            .count()
    }

    /// Session outbox that peripheral telemetry is forwarded to.
    pub fn set_upstream(&self, outbox: Option<Outbox>) {
        *self
            .inner
            .upstream
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = outbox;
    }

    pub fn status(&self) -> Vec<PeripheralStatus> {
        self.inner
            .slots
            .iter()
            .map(|slot| PeripheralStatus {
                name: slot.name.clone(),
                state: slot.link.state(),
            })
            .collect()
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.inner.routes
    }

    fn enqueue(&self, index: usize, frame: Frame) -> Forward {
        let slot = &self.inner.slots[index];
        if slot.link.state() != LinkState::Connected {
            return Forward::Unavailable { peripheral: index };
        }
        let queue = slot.queue();
        let Some(tx) = queue.as_ref() else {
            return Forward::Unavailable { peripheral: index };
        };
        match tx.try_send(frame) {
            Ok(()) => Forward::Queued { peripheral: index },
            Err(mpsc::error::TrySendError::Full(_)) => Forward::Dropped { peripheral: index },
            Err(mpsc::error::TrySendError::Closed(_)) => Forward::Unavailable { peripheral: index },
        }
    }
}

/// Grace period for workers to notice cancellation before they are aborted.
const WORKER_STOP_GRACE: Duration = Duration::from_secs(1);

async fn stop_workers(inner: &Inner, mut workers: Workers) {
    workers.cancel.cancel();
    for slot in &inner.slots {
        slot.queue().take();
    }
    let drained = tokio::time::timeout(WORKER_STOP_GRACE, async {
        while workers.tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("peripheral workers did not stop in time, aborting");
        workers.tasks.shutdown().await;
    }
    for slot in &inner.slots {
        slot.link.close().await;
    }
}

impl Inner {
    fn upstream(&self, index: usize, frame: Frame) {
        let name = &self.slots[index].name;
        if frame.identifier == CONTROL {
            info!(peripheral = %name, payload = ?frame.payload.as_ref(), "peripheral control frame");
            return;
        }
        let upstream = self
            .upstream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(outbox) = upstream else {
            trace!(peripheral = %name, "no host session, dropping telemetry");
            return;
        };
        match outbox.try_send(frame.identifier, frame.payload) {
            Ok(()) => {}
            Err(SessionError::OutboxFull) => {
                warn!(peripheral = %name, "host outbox full, dropping telemetry")
            }
            Err(err) => debug!(peripheral = %name, error = %err, "telemetry not forwarded"),
        }
    }
}

/// Returns `true` if cancelled before the delay elapsed.
async fn cancelled_during(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Send on a peripheral link unless cancelled first (`None`).
async fn send_or_cancel(
    link: &dyn Link,
    cancel: &CancellationToken,
    identifier: u8,
    payload: &[u8],
) -> Option<std::result::Result<(), LinkError>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = link.send(identifier, payload) => Some(result),
    }
}

async fn peripheral_worker(
    inner: Arc<Inner>,
    index: usize,
    cancel: CancellationToken,
    mut queue: mpsc::Receiver<Frame>,
) {
    let slot = &inner.slots[index];
    let name = slot.name.as_str();
    let link = slot.link.as_ref();

    // A restart may find the link still faulted from an earlier worker.
    link.close().await;

    'connect: loop {
        match connect_with_retry(link, &inner.retry, &cancel).await {
            Ok(endpoints) => info!(peripheral = name, %endpoints, "peripheral connected"),
            Err(LinkError::Cancelled) => break,
            Err(err) => {
                warn!(peripheral = name, error = %err, "peripheral connect failed");
                link.close().await;
                if cancelled_during(&cancel, inner.retry.delay).await {
                    break;
                }
                continue;
            }
        }

        if inner.setup_on_connect {
            if cancelled_during(&cancel, inner.setup_delay).await {
                break;
            }
            match send_or_cancel(link, &cancel, CONTROL, &[PERIPHERAL_SETUP]).await {
                None => break,
                Some(Ok(())) => info!(peripheral = name, "sent setup record"),
                Some(Err(err)) => warn!(peripheral = name, error = %err, "setup record failed"),
            }
        }

        let lost = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'connect,
                Some(frame) = queue.recv() => {
                    match send_or_cancel(link, &cancel, frame.identifier, &frame.payload).await {
                        None => break 'connect,
                        Some(Ok(())) => {}
                        Some(Err(err)) if err.ends_session() => break err,
                        Some(Err(err)) => {
                            warn!(peripheral = name, error = %err, "peripheral refused frame")
                        }
                    }
                }
                received = link.receive() => match received {
                    Ok(frame) => inner.upstream(index, frame),
                    Err(err) => break err,
                },
            }
        };

        warn!(peripheral = name, error = %lost, "peripheral link lost, reconnecting");
        link.close().await;
        while queue.try_recv().is_ok() {}
        if cancelled_during(&cancel, inner.retry.delay).await {
            break;
        }
    }

    link.close().await;
    debug!(peripheral = name, "peripheral worker stopped");
}

#[async_trait]
impl InboundHandler for PeripheralBridge {
    async fn on_record(&self, identifier: u8, payload: &Bytes, _values: &[i64]) {
        self.forward(identifier, payload.clone());
    }

    async fn on_unregistered(&self, identifier: u8, payload: &Bytes) -> bool {
        if self.inner.routes.lookup(identifier).is_none() {
            return false;
        }
        self.forward(identifier, payload.clone());
        true
    }

    async fn on_control(&self, command: ControlCommand) {
        match command {
            ControlCommand::ConnectPeripherals => self.connect_all().await,
            ControlCommand::Setup | ControlCommand::Reconfigure => {
                if let Some(value) = command.peripheral_config() {
                    let reached = self.broadcast(CONTROL, Bytes::copy_from_slice(&[value]));
                    info!(%command, reached, "broadcast peripheral config");
                }
            }
            ControlCommand::Shutdown => self.shutdown().await,
        }
    }
}
