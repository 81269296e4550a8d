use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::traits::{Endpoints, Link};

/// When and how often to retry a failed connection attempt.
///
/// The delay doubles after each failure until it reaches `max_delay`; with
/// `max_delay == delay` the backoff is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_delay: Duration,
    /// Total attempts, including the first. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Fixed delay between attempts, retrying forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: delay,
            max_attempts: None,
        }
    }

    /// Doubling delay from `delay` up to `max_delay`.
    pub fn exponential(delay: Duration, max_delay: Duration) -> Self {
        Self {
            delay,
            max_delay: max_delay.max(delay),
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

/// Connect `link`, retrying per `policy` until it connects, the policy gives
/// up, a non-retryable error occurs, or `cancel` fires.
pub async fn connect_with_retry<L: Link + ?Sized>(
    link: &L,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Endpoints> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(LinkError::Cancelled),
            result = link.connect() => result,
        };

        match result {
            Ok(endpoints) => {
                if attempt > 1 {
                    debug!(address = link.address(), attempt, "connected after retry");
                }
                return Ok(endpoints);
            }
            Err(err) if err.is_retryable() && policy.allows_retry(attempt) => {
                let wait = policy.delay_after(attempt);
                warn!(
                    address = link.address(),
                    attempt,
                    error = %err,
                    retry_in = ?wait,
                    "link connect failed"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(LinkError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    use crate::state::LinkState;
    use crate::stream::StreamLink;

    #[test]
    fn delays_follow_policy() {
        let fixed = RetryPolicy::fixed(Duration::from_millis(100));
        assert_eq!(fixed.delay_after(1), Duration::from_millis(100));
        assert_eq!(fixed.delay_after(9), Duration::from_millis(100));
        assert!(fixed.allows_retry(1_000));

        let exp = RetryPolicy::exponential(Duration::from_millis(100), Duration::from_millis(700))
            .with_max_attempts(4);
        assert_eq!(exp.delay_after(1), Duration::from_millis(100));
        assert_eq!(exp.delay_after(3), Duration::from_millis(400));
        assert_eq!(exp.delay_after(4), Duration::from_millis(700));
        assert!(exp.allows_retry(3));
        assert!(!exp.allows_retry(4));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let link = StreamLink::client(addr.to_string());
        let policy = RetryPolicy::fixed(Duration::from_millis(5)).with_max_attempts(3);
        let err = connect_with_retry(&link, &policy, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn connects_once_peer_appears() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let accept = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            listener.accept().await.unwrap()
        });

        let link = StreamLink::client(addr.to_string());
        let policy = RetryPolicy::fixed(Duration::from_millis(20));
        connect_with_retry(&link, &policy, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(link.state(), LinkState::Connected);
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let link = StreamLink::client(addr.to_string());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = connect_with_retry(&link, &RetryPolicy::fixed(Duration::from_secs(10)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Cancelled));
    }
}
