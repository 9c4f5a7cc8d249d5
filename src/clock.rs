//! Time source used by the webhook worker.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Abstraction over "now" and "sleep" so retry and batching timing can be
/// driven deterministically in tests.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// The default clock, backed by `tokio::time`. Honors paused test time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
