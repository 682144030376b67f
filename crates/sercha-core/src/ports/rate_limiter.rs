//! The `RateLimiter` port: outbound request pacing per source.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::ConnectorError;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Blocks until a request may be sent, or returns early if `cancel`
    /// fires first.
    async fn wait(&self, cancel: CancellationToken) -> Result<(), ConnectorError>;

    /// Records that the provider returned HTTP 429, backing off for
    /// `retry_after_seconds` (or the limiter's default floor if `None`).
    fn record_rate_limit_error(&self, retry_after_seconds: Option<u64>);

    /// Non-blocking check: would `wait` return immediately right now?
    fn allow(&self) -> bool;
}
