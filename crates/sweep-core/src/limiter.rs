//! Token-bucket rate limiter shared by every update attempt
//!
//! Capacity and refill rate both default to the configured documents per
//! second. Tokens are reserved eagerly: a caller that finds the bucket empty
//! takes a token "on credit" and sleeps until the debt is repaid, so waiters
//! are served in arrival order and the long-run grant rate never exceeds
//! `rate`.

use crate::error::SweepError;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest single wait; tiny rates saturate here instead of overflowing `Duration`
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug)]
struct Bucket {
    /// May go negative while callers wait on credit
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create limiter with capacity equal to the rate (at least one token)
    ///
    /// `rate` must be finite and positive; [`Settings::validate`](crate::Settings::validate)
    /// guarantees that for configured runs.
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self::with_capacity(rate, rate.floor().max(1.0))
    }

    /// Create limiter with an explicit burst capacity
    #[must_use]
    pub fn with_capacity(rate: f64, capacity: f64) -> Self {
        let capacity = capacity.max(1.0);
        Self {
            rate,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Sustained tokens per second
    #[inline]
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Burst capacity
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens currently available (negative while callers hold credit)
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Wait for one token
    ///
    /// # Errors
    /// Returns `SweepError::Cancelled` if `cancel` fires before the token is
    /// granted; the reserved token is returned to the bucket.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), SweepError> {
        if cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }

        let wait = self.reserve();
        if wait.is_zero() {
            return Ok(());
        }

        tracing::trace!(wait_ms = wait.as_millis() as u64, "waiting for rate limiter token");

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.refund();
                Err(SweepError::Cancelled)
            }
            () = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// Take one token, returning how long the caller must wait for it
    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.rate)
                .map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
        }
    }

    fn refund(&self) {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens = (bucket.tokens + 1.0).min(self.capacity);
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }
}
