use std::time::Duration;

use async_trait::async_trait;
use telelink_frame::{Frame, FrameConfig, FrameReader, FrameWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::state::{LinkState, Role, StateCell};
use crate::traits::{Endpoints, Link};

/// Default time allowed for a client connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`StreamLink`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Bound on a client connection attempt. `None` waits indefinitely.
    /// Server accepts are never bounded.
    pub connect_timeout: Option<Duration>,
    pub frame: FrameConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            frame: FrameConfig::default(),
        }
    }
}

/// Framed link over a TCP byte stream.
///
/// A client dials `address`; a server binds it (or uses a supplied listener)
/// and accepts exactly one peer per `connect()`.
pub struct StreamLink {
    role: Role,
    address: String,
    config: StreamConfig,
    state: StateCell,
    listener: Mutex<Option<TcpListener>>,
    reader: Mutex<Option<FrameReader<OwnedReadHalf>>>,
    writer: Mutex<Option<FrameWriter<OwnedWriteHalf>>>,
}

impl StreamLink {
    /// A link that dials `address` on `connect()`.
    pub fn client(address: impl Into<String>) -> Self {
        Self::new(Role::Client, address.into(), None)
    }

    /// A link that binds `address` and accepts one peer on `connect()`.
    pub fn server(address: impl Into<String>) -> Self {
        Self::new(Role::Server, address.into(), None)
    }

    /// A server link that accepts from an already bound listener.
    pub fn with_listener(listener: TcpListener) -> Result<Self> {
        let address = listener
            .local_addr()
            .map_err(|e| LinkError::connect("listener", e))?
            .to_string();
        Ok(Self::new(Role::Server, address, Some(listener)))
    }

    /// Wrap a stream that was accepted elsewhere. The link starts `Connected`.
    pub fn from_accepted(stream: TcpStream, config: StreamConfig) -> Result<Self> {
        let local = stream
            .local_addr()
            .map_err(|e| LinkError::connect("accepted stream", e))?
            .to_string();
        let link = Self::new(Role::Server, local, None).with_config(config);
        let endpoints = link.install_now(stream)?;
        link.state.set(LinkState::Connected);
        debug!(%endpoints, "adopted accepted stream");
        Ok(link)
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn new(role: Role, address: String, listener: Option<TcpListener>) -> Self {
        Self {
            role,
            address,
            config: StreamConfig::default(),
            state: StateCell::new(LinkState::Disconnected),
            listener: Mutex::new(listener),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    async fn dial(&self) -> Result<TcpStream> {
        let attempt = TcpStream::connect(self.address.as_str());
        let result = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| LinkError::Timeout {
                    address: self.address.clone(),
                    timeout: limit,
                })?,
            None => attempt.await,
        };
        result.map_err(|e| LinkError::connect(&self.address, e))
    }

    async fn accept(&self) -> Result<TcpStream> {
        let mut listener = self.listener.lock().await;
        if listener.is_none() {
            let bound = TcpListener::bind(self.address.as_str())
                .await
                .map_err(|e| LinkError::connect(&self.address, e))?;
            info!(address = %self.address, "listening for peer");
            *listener = Some(bound);
        }
        let Some(bound) = listener.as_ref() else {
            return Err(LinkError::NotConnected);
        };
        let (stream, peer) = bound
            .accept()
            .await
            .map_err(|e| LinkError::connect(&self.address, e))?;
        debug!(%peer, "accepted peer");
        Ok(stream)
    }

    fn install_now(&self, stream: TcpStream) -> Result<Endpoints> {
        let (reader, writer) = match (self.reader.try_lock(), self.writer.try_lock()) {
            (Ok(reader), Ok(writer)) => (reader, writer),
            _ => return Err(LinkError::AlreadyConnected),
        };
        self.install(stream, reader, writer)
    }

    fn install(
        &self,
        stream: TcpStream,
        mut reader: tokio::sync::MutexGuard<'_, Option<FrameReader<OwnedReadHalf>>>,
        mut writer: tokio::sync::MutexGuard<'_, Option<FrameWriter<OwnedWriteHalf>>>,
    ) -> Result<Endpoints> {
        let endpoints = endpoints_of(&stream).map_err(|e| LinkError::connect(&self.address, e))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to disable Nagle on link stream");
        }

        let (read_half, write_half) = stream.into_split();
        *reader = Some(FrameReader::with_config(read_half, self.config.frame.clone()));
        *writer = Some(FrameWriter::with_config(write_half, self.config.frame.clone()));
        Ok(endpoints)
    }
}

fn endpoints_of(stream: &TcpStream) -> std::io::Result<Endpoints> {
    Ok(Endpoints {
        local: stream.local_addr()?.to_string(),
        remote: stream.peer_addr()?.to_string(),
    })
}

#[async_trait]
impl Link for StreamLink {
    async fn connect(&self) -> Result<Endpoints> {
        let attempt = self.state.begin_connect()?;

        let stream = match self.role {
            Role::Client => self.dial().await?,
            Role::Server => self.accept().await?,
        };

        let reader = self.reader.lock().await;
        let writer = self.writer.lock().await;
        let endpoints = self.install(stream, reader, writer)?;
        attempt.succeed();
        info!(role = ?self.role, %endpoints, "stream link connected");
        Ok(endpoints)
    }

    async fn send(&self, identifier: u8, payload: &[u8]) -> Result<()> {
        self.state.check_connected()?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::NotConnected)?;

        let result = tokio::select! {
            err = self.state.left_connected() => return Err(err),
            result = writer.send(identifier, payload) => result,
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = LinkError::from(e);
                if !matches!(err, LinkError::PayloadTooLarge { .. }) {
                    warn!(error = %err, "stream link send failed");
                    self.state.fault();
                }
                Err(err)
            }
        }
    }

    async fn receive(&self) -> Result<Frame> {
        self.state.check_connected()?;
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(LinkError::NotConnected)?;

        let result = tokio::select! {
            err = self.state.left_connected() => return Err(err),
            result = reader.read_frame() => result,
        };
        result.map_err(|e| {
            let err = LinkError::from(e);
            debug!(error = %err, "stream link receive failed");
            self.state.fault();
            err
        })
    }

    async fn close(&self) {
        let previous = self.state.get();
        self.state.set(LinkState::Disconnected);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.reader.lock().await.take();
        if previous != LinkState::Disconnected {
            debug!(address = %self.address, from = %previous, "stream link closed");
        }
    }

    fn state(&self) -> LinkState {
        self.state.get()
    }

    fn role(&self) -> Role {
        self.role
    }

    fn address(&self) -> &str {
        &self.address
    }
}
