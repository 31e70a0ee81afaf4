//! Token-bucket throughput governor.
//!
//! One [`RateLimiter`] is shared by every batch-submitting path of a write
//! task (and by the row iterator of a scan). Accounting is lock-free: credit
//! is an atomic counter that may go negative, and a caller that drives it
//! negative sleeps for exactly the time the bucket needs to earn the deficit
//! back.

use crate::config::BYTES_PER_MIB;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Token bucket over bytes.
#[derive(Debug)]
pub struct RateLimiter {
    /// Bytes added per second.
    rate: u64,
    /// Maximum credit; no burst beyond this.
    bucket_size: u64,
    /// Current credit in bytes. Negative while callers are paying off debt.
    credit: AtomicI64,
    /// Nanoseconds since `origin` at the last refill.
    last_refill: AtomicU64,
    origin: Instant,
}

impl RateLimiter {
    /// Create a full bucket of `bucket_size` bytes refilled at `rate` bytes
    /// per second.
    pub fn new(rate: u64, bucket_size: u64) -> Self {
        let rate = rate.max(1);
        let bucket_size = bucket_size.max(1);
        Self {
            rate,
            bucket_size,
            credit: AtomicI64::new(clamp_i64(bucket_size)),
            last_refill: AtomicU64::new(0),
            origin: Instant::now(),
        }
    }

    /// A limiter capped at `mib` MiB per second holding one second of credit.
    pub fn from_mib_per_sec(mib: f64) -> Self {
        let rate = (mib * BYTES_PER_MIB) as u64;
        Self::new(rate, rate)
    }

    /// Get the refill rate in bytes per second.
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Get the bucket capacity in bytes.
    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }

    /// Credit currently available, zero while in debt.
    pub fn available(&self) -> u64 {
        self.refill();
        self.credit.load(Ordering::Acquire).max(0) as u64
    }

    /// Take `bytes` of credit without waiting.
    ///
    /// Returns `false` and takes nothing when the bucket holds less.
    pub fn try_acquire(&self, bytes: u64) -> bool {
        self.refill();
        let bytes = clamp_i64(bytes);
        self.credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c >= bytes).then(|| c - bytes)
            })
            .is_ok()
    }

    /// Deduct `bytes` of credit, sleeping first if the bucket goes negative.
    ///
    /// Returns the time slept. The sleep is abandoned and the credit returned
    /// when `cancel` fires.
    pub async fn maybe_sleep(&self, bytes: u64, cancel: &CancellationToken) -> Result<Duration> {
        if bytes == 0 {
            return Ok(Duration::ZERO);
        }
        self.refill();

        let bytes = clamp_i64(bytes);
        let after = self.credit.fetch_sub(bytes, Ordering::AcqRel) - bytes;
        if after >= 0 {
            return Ok(Duration::ZERO);
        }

        let deficit = after.unsigned_abs();
        let wait = self.time_to_earn(deficit);
        trace!(bytes, deficit, wait_ms = wait.as_millis() as u64, "Rate limiter sleeping");

        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(wait),
            _ = cancel.cancelled() => {
                self.credit.fetch_add(bytes, Ordering::AcqRel);
                Err(Error::Cancelled)
            }
        }
    }

    /// Time the bucket needs to earn `bytes`, saturating at `u64::MAX` nanoseconds.
    fn time_to_earn(&self, bytes: u64) -> Duration {
        let nanos = bytes as u128 * NANOS_PER_SEC / self.rate as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Add the credit earned since the last refill, capped at the bucket size.
    fn refill(&self) {
        let now = self.origin.elapsed().as_nanos() as u64;
        let last = self.last_refill.load(Ordering::Acquire);
        if now <= last {
            return;
        }

        let earned = (now - last) as u128 * self.rate as u128 / NANOS_PER_SEC;
        if earned == 0 {
            return;
        }

        // Only the time that paid for whole bytes is consumed; the remainder
        // carries over to the next refill. Whoever advances the timestamp
        // owns the interval's credit.
        let paid = (earned * NANOS_PER_SEC / self.rate as u128) as u64;
        if self
            .last_refill
            .compare_exchange(last, last + paid, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let earned = earned.min(i64::MAX as u128) as i64;
        let cap = clamp_i64(self.bucket_size);
        let _ = self
            .credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_add(earned).min(cap))
            });
    }
}

fn clamp_i64(v: u64) -> i64 {
    v.min(i64::MAX as u64) as i64
}
