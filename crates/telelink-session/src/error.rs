use telelink_link::LinkError;
use telelink_record::RecordError;

/// Errors that can occur while running sessions and bridges.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Link-level error.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Registry-level error. These are caller bugs and are never retried.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Routing table rejected at load.
    #[error("invalid routing table: {0}")]
    Routing(String),

    /// The session's outbox queue is full.
    #[error("outbox full")]
    OutboxFull,

    /// The session the outbox fed has ended.
    #[error("outbox closed")]
    OutboxClosed,

    /// A session task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(String),

    /// Listener setup or accept failure.
    #[error("listener error: {0}")]
    Listener(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
