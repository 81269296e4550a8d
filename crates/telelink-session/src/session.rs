use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use telelink_frame::{identifier_name, Frame, MEDIA};
use telelink_link::{Link, LinkError, LinkState};
use telelink_record::{RecordError, RecordRegistry};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::control::ControlCommand;
use crate::dispatch::{classify, Inbound};
use crate::error::SessionError;
use crate::media::MediaSource;
use crate::outbox::Outbox;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Draining,
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum EndReason {
    /// A shutdown control command was received.
    Shutdown,
    /// The peer closed the link cleanly between frames.
    PeerClosed,
    /// The link failed.
    Faulted(LinkError),
    /// The session was cancelled from outside.
    Cancelled,
    /// A caller bug (such as a record that cannot be packed) stopped the session.
    Failed(SessionError),
}

impl EndReason {
    /// Whether the owning supervisor should reconnect.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PeerClosed | Self::Faulted(_))
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => f.write_str("shutdown"),
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Faulted(err) => write!(f, "faulted: {err}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Outcome of [`Session::run`].
#[derive(Debug)]
pub struct SessionReport {
    pub reason: EndReason,
    pub sent: u64,
    pub received: u64,
    /// Received frames that could not be applied, plus unsendable outbox frames.
    pub dropped: u64,
}

/// Side effects of inbound traffic that live outside the registry.
///
/// Handlers run on the inbound loop and must not block for long.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// A record frame was unpacked into the registry.
    async fn on_record(&self, _identifier: u8, _payload: &Bytes, _values: &[i64]) {}

    /// A record frame arrived whose identifier is not in the registry.
    /// Return `true` if it was handled.
    async fn on_unregistered(&self, _identifier: u8, _payload: &Bytes) -> bool {
        false
    }

    /// A control command arrived. The session itself ends on `Shutdown`
    /// after this returns.
    async fn on_control(&self, _command: ControlCommand) {}

    /// A media frame arrived.
    async fn on_media(&self, _payload: Bytes) {}
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl InboundHandler for NoopHandler {}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// How one session loop ended.
#[derive(Debug)]
enum LoopExit {
    Cancelled,
    /// The loop ran out of work without affecting its siblings.
    Finished,
    End(EndReason),
}

impl From<LinkError> for LoopExit {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::ConnectionClosed => LoopExit::End(EndReason::PeerClosed),
            other => LoopExit::End(EndReason::Faulted(other)),
        }
    }
}

/// State shared by the loops of one session.
struct Shared {
    link: Arc<dyn Link>,
    registry: Arc<RecordRegistry>,
    handler: Arc<dyn InboundHandler>,
    counters: Counters,
    cancel: CancellationToken,
}

impl Shared {
    /// Send one frame, abandoning it if the session is cancelled.
    ///
    /// `Ok(false)` means the frame was refused locally and dropped.
    async fn send(&self, identifier: u8, payload: &[u8]) -> Result<bool, LoopExit> {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(LoopExit::Cancelled),
            result = self.link.send(identifier, payload) => result,
        };
        match result {
            Ok(()) => {
                Counters::bump(&self.counters.sent);
                trace!(
                    identifier = %format_args!("{identifier:#04x}"),
                    size = payload.len(),
                    "sent frame"
                );
                Ok(true)
            }
            Err(err) if err.ends_session() => Err(err.into()),
            Err(err) => {
                error!(
                    identifier = %format_args!("{identifier:#04x}"),
                    error = %err,
                    "frame refused by link, dropping"
                );
                Counters::bump(&self.counters.dropped);
                Ok(false)
            }
        }
    }
}

/// One session over a connected link.
///
/// `run` starts the outbound, inbound and (when a media source is set)
/// media loops. The first loop to see the link fail, the peer close, or a
/// shutdown command moves the session to `Draining`; the remaining loops
/// are cancelled, the link is closed, and the session ends `Closed`.
pub struct Session {
    link: Arc<dyn Link>,
    registry: Arc<RecordRegistry>,
    config: SessionConfig,
    handler: Arc<dyn InboundHandler>,
    media: Option<Box<dyn MediaSource>>,
    outbox: Outbox,
    outbox_rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(link: Arc<dyn Link>, registry: Arc<RecordRegistry>, config: SessionConfig) -> Self {
        let (outbox, outbox_rx) = Outbox::channel(config.outbox_capacity);
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            link,
            registry,
            config,
            handler: Arc::new(NoopHandler),
            media: None,
            outbox,
            outbox_rx,
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Push frames from `source` to the peer under the media identifier.
    pub fn with_media(mut self, source: impl MediaSource + 'static) -> Self {
        self.media = Some(Box::new(source));
        self
    }

    /// Tie the session to `parent`: cancelling it cancels the session.
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Queue for frames sent by this session's outbound loop.
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Token that cancels this session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run the session to completion.
    pub async fn run(self) -> SessionReport {
        let Session {
            link,
            registry,
            config,
            handler,
            media,
            outbox,
            outbox_rx,
            cancel,
            state,
        } = self;
        // Frames enqueued after the session ends are refused.
        drop(outbox);

        let shared = Arc::new(Shared {
            link,
            registry,
            handler,
            counters: Counters::default(),
            cancel: cancel.clone(),
        });

        if shared.link.state() != LinkState::Connected {
            state.send_replace(SessionState::Closed);
            return SessionReport {
                reason: EndReason::Faulted(LinkError::NotConnected),
                sent: 0,
                received: 0,
                dropped: 0,
            };
        }

        state.send_replace(SessionState::Active);
        info!(address = shared.link.address(), "session active");

        let mut tasks = JoinSet::new();
        tasks.spawn(outbound_loop(Arc::clone(&shared), config.clone(), outbox_rx));
        tasks.spawn(inbound_loop(Arc::clone(&shared)));
        if let Some(source) = media {
            tasks.spawn(media_loop(Arc::clone(&shared), config.media_interval(), source));
        }

        let mut reason = None;
        while let Some(joined) = tasks.join_next().await {
            let exit = match joined {
                Ok(exit) => exit,
                Err(err) => LoopExit::End(EndReason::Failed(SessionError::Task(err.to_string()))),
            };
            match exit {
                LoopExit::Finished | LoopExit::Cancelled => {}
                LoopExit::End(end) => {
                    if reason.is_none() {
                        debug!(reason = %end, "session draining");
                        state.send_replace(SessionState::Draining);
                        cancel.cancel();
                        reason = Some(end);
                    } else {
                        trace!(reason = %end, "secondary loop exit");
                    }
                }
            }
        }

        let reason = reason.unwrap_or(EndReason::Cancelled);
        if *state.borrow() == SessionState::Active {
            state.send_replace(SessionState::Draining);
        }
        shared.link.close().await;
        state.send_replace(SessionState::Closed);

        let report = SessionReport {
            reason,
            sent: shared.counters.sent.load(Ordering::Relaxed),
            received: shared.counters.received.load(Ordering::Relaxed),
            dropped: shared.counters.dropped.load(Ordering::Relaxed),
        };
        info!(
            reason = %report.reason,
            sent = report.sent,
            received = report.received,
            dropped = report.dropped,
            "session closed"
        );
        report
    }
}

async fn outbound_loop(
    shared: Arc<Shared>,
    config: SessionConfig,
    mut outbox: mpsc::Receiver<Frame>,
) -> LoopExit {
    let mut ticker = tokio::time::interval(config.schedule.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return LoopExit::Cancelled,
            Some(frame) = outbox.recv() => {
                if let Err(exit) = shared.send(frame.identifier, &frame.payload).await {
                    return exit;
                }
            }
            _ = ticker.tick() => {
                for identifier in config.schedule.due(tick) {
                    let Some(handle) = shared.registry.handle(identifier) else {
                        let err = RecordError::UnknownIdentifier(identifier);
                        error!(error = %err, "scheduled record is not defined");
                        return LoopExit::End(EndReason::Failed(err.into()));
                    };
                    let payload = match shared.registry.pack(handle) {
                        Ok(payload) => payload,
                        Err(err) => {
                            error!(error = %err, "cannot pack scheduled record");
                            return LoopExit::End(EndReason::Failed(err.into()));
                        }
                    };
                    if let Err(exit) = shared.send(identifier, &payload).await {
                        return exit;
                    }
                }
                tick = tick.wrapping_add(1);
            }
        }
    }
}

async fn inbound_loop(shared: Arc<Shared>) -> LoopExit {
    loop {
        let received = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return LoopExit::Cancelled,
            received = shared.link.receive() => received,
        };
        let frame = match received {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "inbound loop stopping");
                return err.into();
            }
        };
        Counters::bump(&shared.counters.received);

        match classify(frame) {
            Inbound::Media(payload) => shared.handler.on_media(payload).await,
            Inbound::Control(command) => {
                info!(%command, "control command received");
                shared.handler.on_control(command).await;
                if command == ControlCommand::Shutdown {
                    return LoopExit::End(EndReason::Shutdown);
                }
            }
            Inbound::InvalidControl(payload) => {
                warn!(payload = ?payload.as_ref(), "dropping unrecognised control frame");
                Counters::bump(&shared.counters.dropped);
            }
            Inbound::Record {
                identifier,
                payload,
            } => apply_record(&shared, identifier, payload).await,
        }
    }
}

async fn apply_record(shared: &Shared, identifier: u8, payload: Bytes) {
    match shared.registry.unpack(identifier, &payload) {
        Ok(values) => {
            trace!(identifier = %format_args!("{identifier:#04x}"), ?values, "record updated");
            shared.handler.on_record(identifier, &payload, &values).await;
        }
        Err(RecordError::UnknownIdentifier(_)) => {
            if !shared.handler.on_unregistered(identifier, &payload).await {
                warn!(
                    identifier = %format_args!("{identifier:#04x}"),
                    kind = identifier_name(identifier),
                    "dropping frame for unknown record"
                );
                Counters::bump(&shared.counters.dropped);
            }
        }
        Err(err) => {
            warn!(error = %err, "dropping malformed record frame");
            Counters::bump(&shared.counters.dropped);
        }
    }
}

async fn media_loop(
    shared: Arc<Shared>,
    interval: std::time::Duration,
    mut source: Box<dyn MediaSource>,
) -> LoopExit {
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return LoopExit::Cancelled,
            next = source.next_frame() => next,
        };
        let Some(frame) = next else {
            info!("media source exhausted");
            return LoopExit::Finished;
        };

        let started = Instant::now();
        if let Err(exit) = shared.send(MEDIA, &frame).await {
            return exit;
        }
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return LoopExit::Cancelled,
            _ = tokio::time::sleep_until(started + interval) => {}
        }
    }
}
