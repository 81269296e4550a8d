use std::sync::Arc;

use telelink_frame::CONTROL;
use telelink_link::{connect_with_retry, Link, LinkError, RetryPolicy, StreamConfig, StreamLink};
use telelink_record::RecordRegistry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::PeripheralBridge;
use crate::config::SessionConfig;
use crate::control::ControlCommand;
use crate::error::{Result, SessionError};
use crate::media::{MediaSource, SharedMedia};
use crate::outbox::Outbox;
use crate::session::{EndReason, InboundHandler, NoopHandler, Session, SessionReport};

/// What a supervisor did before it stopped.
#[derive(Debug, Default)]
pub struct SupervisorSummary {
    pub sessions: u32,
    pub last: Option<SessionReport>,
}

/// Runs host sessions over one client link, reconnecting after link loss.
///
/// The initial connect error is returned to the caller. After a session
/// ends with the peer closing or the link faulting, the supervisor waits
/// the retry delay and reconnects per its [`RetryPolicy`]. Shutdown and
/// cancellation end the supervisor.
pub struct HostSupervisor {
    link: Arc<dyn Link>,
    registry: Arc<RecordRegistry>,
    config: SessionConfig,
    retry: RetryPolicy,
    handler: Arc<dyn InboundHandler>,
    on_connect: Vec<ControlCommand>,
    cancel: CancellationToken,
    outbox: watch::Sender<Option<Outbox>>,
}

impl HostSupervisor {
    pub fn new(
        link: Arc<dyn Link>,
        registry: Arc<RecordRegistry>,
        config: SessionConfig,
        retry: RetryPolicy,
    ) -> Self {
        let (outbox, _) = watch::channel(None);
        Self {
            link,
            registry,
            config,
            retry,
            handler: Arc::new(NoopHandler),
            on_connect: Vec::new(),
            cancel: CancellationToken::new(),
            outbox,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Commands queued at the start of every session.
    pub fn with_on_connect(mut self, commands: Vec<ControlCommand>) -> Self {
        self.on_connect = commands;
        self
    }

    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Outbox of the current session, `None` between sessions.
    pub fn outboxes(&self) -> watch::Receiver<Option<Outbox>> {
        self.outbox.subscribe()
    }

    pub async fn run(&self) -> Result<SupervisorSummary> {
        let mut summary = SupervisorSummary::default();

        let endpoints = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(summary),
            connected = self.link.connect() => connected?,
        };
        info!(%endpoints, "connected to field unit");

        loop {
            let session = Session::new(
                Arc::clone(&self.link),
                Arc::clone(&self.registry),
                self.config.clone(),
            )
            .with_handler(Arc::clone(&self.handler))
            .with_parent(&self.cancel);

            let outbox = session.outbox();
            for command in &self.on_connect {
                if let Err(err) = outbox.try_send(CONTROL, command.payload().to_vec()) {
                    warn!(%command, error = %err, "could not queue startup command");
                }
            }
            self.outbox.send_replace(Some(outbox));
            let report = session.run().await;
            self.outbox.send_replace(None);
            summary.sessions += 1;

            match report.reason {
                EndReason::Failed(err) => {
                    error!(error = %err, "host session failed");
                    return Err(err);
                }
                EndReason::Shutdown | EndReason::Cancelled => {
                    summary.last = Some(report);
                    return Ok(summary);
                }
                EndReason::PeerClosed | EndReason::Faulted(_) => {
                    warn!(reason = %report.reason, "host session lost, reconnecting");
                    summary.last = Some(report);
                }
            }

            let wait = self.retry.delay_after(1);
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(summary),
                _ = tokio::time::sleep(wait) => {}
            }
            match connect_with_retry(self.link.as_ref(), &self.retry, &self.cancel).await {
                Ok(endpoints) => info!(%endpoints, "reconnected to field unit"),
                Err(LinkError::Cancelled) => return Ok(summary),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Accepts host connections one at a time and runs a session for each.
///
/// Every accepted connection is a fresh link and session. When a bridge is
/// attached it receives the session's inbound traffic and forwards
/// peripheral telemetry into the current session's outbox.
pub struct FieldSupervisor {
    listener: TcpListener,
    registry: Arc<RecordRegistry>,
    config: SessionConfig,
    stream: StreamConfig,
    handler: Arc<dyn InboundHandler>,
    media: Option<SharedMedia<Box<dyn MediaSource>>>,
    bridge: Option<PeripheralBridge>,
    cancel: CancellationToken,
    outbox: watch::Sender<Option<Outbox>>,
}

impl FieldSupervisor {
    pub fn new(listener: TcpListener, registry: Arc<RecordRegistry>, config: SessionConfig) -> Self {
        let (outbox, _) = watch::channel(None);
        Self {
            listener,
            registry,
            config,
            stream: StreamConfig::default(),
            handler: Arc::new(NoopHandler),
            media: None,
            bridge: None,
            cancel: CancellationToken::new(),
            outbox,
        }
    }

    /// Bind `address` and build a supervisor on it.
    pub async fn bind(
        address: &str,
        registry: Arc<RecordRegistry>,
        config: SessionConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(SessionError::Listener)?;
        Ok(Self::new(listener, registry, config))
    }

    pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Handler for inbound traffic. Replaced by [`with_bridge`](Self::with_bridge).
    pub fn with_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Media producer shared by all sessions.
    pub fn with_media(mut self, source: impl MediaSource + 'static) -> Self {
        let boxed: Box<dyn MediaSource> = Box::new(source);
        self.media = Some(SharedMedia::new(boxed));
        self
    }

    /// Route inbound traffic through `bridge`.
    pub fn with_bridge(mut self, bridge: PeripheralBridge) -> Self {
        self.handler = Arc::new(bridge.clone());
        self.bridge = Some(bridge);
        self
    }

    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr().map_err(SessionError::Listener)
    }

    /// Outbox of the current session, `None` between sessions.
    pub fn outboxes(&self) -> watch::Receiver<Option<Outbox>> {
        self.outbox.subscribe()
    }

    pub async fn run(&self) -> Result<SupervisorSummary> {
        let mut summary = SupervisorSummary::default();
        let result = self.serve(&mut summary).await;
        if let Some(bridge) = &self.bridge {
            bridge.set_upstream(None);
            bridge.shutdown().await;
        }
        result.map(|()| summary)
    }

    async fn serve(&self, summary: &mut SupervisorSummary) -> Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "waiting for host");
        }
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = self.listener.accept() => accepted.map_err(SessionError::Listener)?,
            };
            let link = match StreamLink::from_accepted(stream, self.stream.clone()) {
                Ok(link) => Arc::new(link),
                Err(err) => {
                    warn!(%peer, error = %err, "could not adopt host connection");
                    continue;
                }
            };
            info!(%peer, "host connected");

            let mut session = Session::new(link, Arc::clone(&self.registry), self.config.clone())
                .with_handler(Arc::clone(&self.handler))
                .with_parent(&self.cancel);
            if let Some(media) = &self.media {
                session = session.with_media(media.clone());
            }

            let outbox = session.outbox();
            if let Some(bridge) = &self.bridge {
                bridge.set_upstream(Some(outbox.clone()));
            }
            self.outbox.send_replace(Some(outbox));
            let report = session.run().await;
            self.outbox.send_replace(None);
            if let Some(bridge) = &self.bridge {
                bridge.set_upstream(None);
            }
            summary.sessions += 1;

            match report.reason {
                EndReason::Failed(err) => {
                    error!(error = %err, "field session failed");
                    return Err(err);
                }
                EndReason::Shutdown | EndReason::Cancelled => {
                    info!(reason = %report.reason, "field unit stopping");
                    summary.last = Some(report);
                    return Ok(());
                }
                EndReason::PeerClosed | EndReason::Faulted(_) => {
                    debug!(%peer, reason = %report.reason, "host session ended");
                    summary.last = Some(report);
                }
            }
        }
    }
}
