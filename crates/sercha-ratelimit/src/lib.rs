//! Token-bucket rate limiting, one bucket per source.
//!
//! Unlike the adaptive, effective-capacity-scaling limiter this crate's
//! ancestor used, this is a plain token bucket plus a single backoff
//! timestamp: `record_rate_limit_error` sets `retry_at` from the
//! provider's `Retry-After`, and `wait` blocks on whichever of "bucket
//! empty" or "still backing off" is further out.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sercha_core::config::RateLimitPreset;
use sercha_core::domain::ConnectorError;
use sercha_core::ports::RateLimiter;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Backoff applied when a provider returns 429 without a `Retry-After` header.
const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
    retry_at: Option<Instant>,
}

/// A token bucket for one source's outbound requests to one provider.
pub struct TokenBucket {
    state: Mutex<TokenBucketState>,
    rate: f64,
    burst: f64,
}

impl TokenBucket {
    pub fn new(preset: RateLimitPreset) -> Self {
        Self {
            state: Mutex::new(TokenBucketState {
                tokens: preset.burst as f64,
                last_refill: Instant::now(),
                retry_at: None,
            }),
            rate: preset.rate,
            burst: preset.burst as f64,
        }
    }

    fn refill_locked(&self, state: &mut TokenBucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;
    }

    /// How long until a token (and the backoff window, if any) clears, or
    /// `None` if a request may be sent right now — and if so, consumes one
    /// token as a side effect, matching `try_acquire` semantics.
    fn poll(&self) -> Option<Duration> {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill_locked(&mut state);

        if let Some(retry_at) = state.retry_at {
            let now = Instant::now();
            if now < retry_at {
                return Some(retry_at - now);
            }
            state.retry_at = None;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - state.tokens;
            Some(Duration::from_secs_f64(deficit / self.rate))
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn wait(&self, cancel: CancellationToken) -> Result<(), ConnectorError> {
        loop {
            match self.poll() {
                None => return Ok(()),
                Some(delay) => {
                    trace!(?delay, "rate limiter backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = cancel.cancelled() => {
                            return Err(ConnectorError::Other(anyhow::anyhow!(
                                "cancelled while waiting for rate limiter"
                            )));
                        }
                    }
                }
            }
        }
    }

    fn record_rate_limit_error(&self, retry_after_seconds: Option<u64>) {
        let delay = retry_after_seconds.map(Duration::from_secs).unwrap_or(DEFAULT_BACKOFF);
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        state.retry_at = Some(Instant::now() + delay);
    }

    fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill_locked(&mut state);
        let backing_off = state
            .retry_at
            .map(|retry_at| Instant::now() < retry_at)
            .unwrap_or(false);
        !backing_off && state.tokens >= 1.0
    }
}

/// Parses an HTTP `Retry-After` header value: either an integer number of
/// seconds, or an RFC 2822 HTTP-date. Falls back to `default` if neither parses.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Duration::from_secs(secs);
    }
    if let Ok(when) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let now = chrono::Utc::now();
        let delta = when.with_timezone(&chrono::Utc) - now;
        if let Ok(std_delta) = delta.to_std() {
            return std_delta;
        }
        return Duration::from_secs(0);
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_when_tokens_available() {
        let bucket = TokenBucket::new(RateLimitPreset { rate: 5.0, burst: 10 });
        bucket.wait(CancellationToken::new()).await.unwrap();
    }

    #[test]
    fn allow_is_false_after_bucket_drained() {
        let bucket = TokenBucket::new(RateLimitPreset { rate: 0.001, burst: 1 });
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn record_rate_limit_error_blocks_allow_until_retry_at() {
        let bucket = TokenBucket::new(RateLimitPreset { rate: 5.0, burst: 10 });
        bucket.record_rate_limit_error(Some(3600));
        assert!(!bucket.allow());
    }

    #[test]
    fn record_rate_limit_error_uses_default_backoff_when_unspecified() {
        let bucket = TokenBucket::new(RateLimitPreset { rate: 5.0, burst: 10 });
        bucket.record_rate_limit_error(None);
        assert!(!bucket.allow());
    }

    #[test]
    fn parse_retry_after_accepts_integer_seconds() {
        let d = parse_retry_after("120", Duration::from_secs(1));
        assert_eq!(d, Duration::from_secs(120));
    }

    #[test]
    fn parse_retry_after_falls_back_to_default_on_garbage() {
        let d = parse_retry_after("not-a-date", Duration::from_secs(30));
        assert_eq!(d, Duration::from_secs(30));
    }

    #[test]
    fn parse_retry_after_accepts_rfc2822_http_date() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(90);
        let header = future.to_rfc2822();
        let d = parse_retry_after(&header, Duration::from_secs(1));
        // allow a little slack for wall-clock drift between computing
        // `future` and parsing it back out.
        assert!(d.as_secs() >= 85 && d.as_secs() <= 95);
    }
}
