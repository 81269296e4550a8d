use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

/// Producer of encoded media frames (one camera frame per item).
#[async_trait]
pub trait MediaSource: Send {
    /// Wait for the next frame. `None` when the producer is exhausted.
    async fn next_frame(&mut self) -> Option<Bytes>;
}

#[async_trait]
impl MediaSource for mpsc::Receiver<Bytes> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

#[async_trait]
impl<M: MediaSource + ?Sized> MediaSource for Box<M> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        (**self).next_frame().await
    }
}

/// A media source shared by consecutive sessions.
///
/// Each session's media loop locks the producer while waiting for a frame,
/// so a session that ends hands the producer to the next one.
pub struct SharedMedia<M: ?Sized> {
    inner: Arc<Mutex<M>>,
}

impl<M: MediaSource> SharedMedia<M> {
    pub fn new(source: M) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }
}

impl<M: ?Sized> Clone for SharedMedia<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl<M: MediaSource + ?Sized> MediaSource for SharedMedia<M> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.inner.lock().await.next_frame().await
    }
}
