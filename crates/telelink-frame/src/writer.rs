use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::{encode_frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Writes whole frames to an `AsyncWrite` half.
///
/// Each frame is encoded into one buffer and written with a single
/// `write_all`. A send that is cancelled or fails part-way leaves a partial
/// frame on the stream, so the caller must treat the stream as faulted.
pub struct FrameWriter<T> {
    inner: T,
    scratch: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::with_capacity(HEADER_SIZE + 256),
            config,
        }
    }

    /// Encode `payload` under `identifier` and flush it.
    ///
    /// Oversized payloads are refused before anything is written.
    pub async fn send(&mut self, identifier: u8, payload: &[u8]) -> Result<()> {
        let max = self.config.max_payload_size;
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        self.scratch.clear();
        encode_frame(identifier, payload, &mut self.scratch)?;
        self.inner
            .write_all(&self.scratch)
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::WriteZero => FrameError::ConnectionClosed,
                _ => FrameError::Io(err),
            })?;
        self.inner.flush().await?;
        trace!(identifier, size = payload.len(), "frame written");
        Ok(())
    }

    /// Close the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
