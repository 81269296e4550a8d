use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{decode_frame, expected_len, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const READ_CHUNK: usize = 8 * 1024;

/// Reads complete frames from any `AsyncRead` stream.
///
/// Partial reads are buffered internally, so `read_frame` is cancel-safe:
/// dropping the future never loses bytes of the frame in progress.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            config,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `FrameError::ConnectionClosed` when the stream ends between
    /// frames and `FrameError::Truncated` when it ends inside one.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                tracing::trace!(identifier = frame.identifier, size = frame.payload.len(), "frame read");
                return Ok(frame);
            }

            if self.buf.capacity() - self.buf.len() < READ_CHUNK {
                self.buf.reserve(READ_CHUNK);
            }

            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.buf.is_empty() {
                    return Err(FrameError::ConnectionClosed);
                }
                return Err(FrameError::Truncated {
                    expected: expected_len(&self.buf).unwrap_or(HEADER_SIZE),
                    received: self.buf.len(),
                });
            }
        }
    }
}
