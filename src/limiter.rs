//! Byte-rate limiting shared across hash workers.
//!
//! Implemented as a token bucket tracked through a single atomic "theoretical
//! arrival time" in nanoseconds, so concurrent workers coordinate with one
//! compare-and-swap loop instead of a lock. Burst capacity is capped at
//! `min(rate, 1 MiB)`, matching the read buffer ceiling.

use crate::cancel::CancelToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const MAX_BURST_BYTES: u64 = 1024 * 1024;
const NANOS_PER_SEC: u64 = 1_000_000_000;
// Upper bound on a single sleep so cancellation is observed promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("Rate-limited read cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub struct RateLimiter {
    /// Sustained rate in bytes per second. Always > 0.
    rate: u64,
    /// Bucket capacity in bytes.
    burst: u64,
    /// Theoretical arrival time of the next request, in nanoseconds since
    /// `start`. Monotonically advanced by `cost_nanos` per granted request.
    tat_nanos: AtomicU64,
    start: Instant,
}

impl RateLimiter {
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec.max(1);
        Self {
            rate,
            burst: rate.min(MAX_BURST_BYTES),
            tat_nanos: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn burst(&self) -> u64 {
        self.burst
    }

    /// Blocks until `bytes` may be read, or the token is cancelled.
    ///
    /// Requests are clamped to the burst capacity; callers chunk their reads
    /// to at most the burst size anyway.
    pub fn acquire(&self, bytes: u64, cancel: &CancelToken) -> Result<(), LimiterError> {
        let bytes = bytes.min(self.burst);
        let cost = self.cost_nanos(bytes);
        let burst_window = self.cost_nanos(self.burst);

        loop {
            if cancel.is_cancelled() {
                return Err(LimiterError::Cancelled);
            }

            let now = self.now_nanos();
            let tat = self.tat_nanos.load(Ordering::Acquire);
            let new_tat = tat.max(now) + cost;

            if new_tat - now <= burst_window {
                if self
                    .tat_nanos
                    .compare_exchange_weak(tat, new_tat, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
                // Lost the race against another worker; retry immediately.
                continue;
            }

            let ready_in = Duration::from_nanos(new_tat - burst_window - now);
            thread::sleep(ready_in.min(POLL_INTERVAL));
        }
    }

    fn cost_nanos(&self, bytes: u64) -> u64 {
        bytes.saturating_mul(NANOS_PER_SEC) / self.rate
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}
