use std::time::Duration;

use telelink_frame::FrameError;

/// Errors that can occur on a link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The peer actively refused the connection.
    #[error("connection to {address} refused: {source}")]
    ConnectionRefused {
        address: String,
        source: std::io::Error,
    },

    /// The connection attempt did not complete in time.
    #[error("connecting to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// Any other failure while establishing the connection.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// The peer closed cleanly between frames.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The peer closed or errored part-way through a frame.
    #[error("truncated frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    /// The link saw an I/O error and must be closed and reconnected.
    #[error("link faulted: {0}")]
    LinkFaulted(String),

    /// No connection (or no writable characteristic) is available.
    #[error("link not connected")]
    NotConnected,

    /// `connect()` was called on a link that is not disconnected.
    #[error("link already connected")]
    AlreadyConnected,

    /// The outgoing payload exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A retry loop was cancelled before it connected.
    #[error("connect cancelled")]
    Cancelled,
}

impl LinkError {
    /// Whether this error ends the session running over the link.
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed
                | Self::Truncated { .. }
                | Self::LinkFaulted(_)
                | Self::NotConnected
        )
    }

    /// Whether a connection attempt that failed this way may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. } | Self::Timeout { .. } | Self::Connect { .. }
        )
    }

    pub(crate) fn connect(address: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::ConnectionRefused => Self::ConnectionRefused {
                address: address.to_string(),
                source,
            },
            _ => Self::Connect {
                address: address.to_string(),
                source,
            },
        }
    }
}

impl From<FrameError> for LinkError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ConnectionClosed => Self::ConnectionClosed,
            FrameError::Truncated { expected, received } => Self::Truncated { expected, received },
            FrameError::PayloadTooLarge { size, max } => Self::PayloadTooLarge { size, max },
            other => Self::LinkFaulted(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_map_to_link_conditions() {
        assert!(matches!(
            LinkError::from(FrameError::ConnectionClosed),
            LinkError::ConnectionClosed
        ));
        assert!(matches!(
            LinkError::from(FrameError::Truncated {
                expected: 10,
                received: 6
            }),
            LinkError::Truncated {
                expected: 10,
                received: 6
            }
        ));
        assert!(matches!(
            LinkError::from(FrameError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe
            ))),
            LinkError::LinkFaulted(_)
        ));
    }

    #[test]
    fn session_ending_classification() {
        assert!(LinkError::ConnectionClosed.ends_session());
        assert!(LinkError::LinkFaulted("reset".into()).ends_session());
        assert!(!LinkError::PayloadTooLarge { size: 2, max: 1 }.ends_session());

        let refused = LinkError::connect(
            "127.0.0.1:1",
            std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        );
        assert!(matches!(refused, LinkError::ConnectionRefused { .. }));
        assert!(refused.is_retryable());
        assert!(!LinkError::AlreadyConnected.is_retryable());
    }
}
