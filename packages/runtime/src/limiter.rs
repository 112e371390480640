//! Fixed-rate pacer bounding the throughput of a binding.
//!
//! Unlike a token bucket there is no burst allowance: permits are spaced on a
//! fixed schedule derived from the configured rate. `take()` only ever
//! delays the caller; it never rejects.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Paces calls to a steady-state rate of `per_second` permits per second.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    /// Earliest instant at which the next permit may be issued.
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter issuing `per_second` permits per second.
    ///
    /// # Panics
    ///
    /// Panics if `per_second` is zero; an unconfigured rate means the caller
    /// should not construct a limiter at all.
    #[must_use]
    pub fn new(per_second: u32) -> Self {
        assert!(per_second > 0, "rate limiter requires a non-zero rate");
        Self {
            interval: Duration::from_secs(1) / per_second,
            next_slot: Mutex::new(None),
        }
    }

    /// Blocks until the next permit is available on the fixed schedule.
    ///
    /// The first call passes immediately; the k-th call completes no earlier
    /// than `(k-1) * interval` after the first.
    pub async fn take(&self) {
        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = next.map_or(now, |at| at.max(now));
            *next = Some(slot + self.interval);
            slot
        };
        // Lock released before suspending; concurrent takers queue up on
        // successive slots rather than on the mutex.
        tokio::time::sleep_until(slot).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_take_is_immediate() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();
        limiter.take().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn k_takes_span_at_least_k_minus_one_intervals() {
        let limiter = RateLimiter::new(50); // 20ms interval
        let start = Instant::now();
        for _ in 0..5 {
            limiter.take().await;
        }
        // 5 permits at 50/s must take at least (5-1)/50 = 80ms.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_does_not_accumulate_idle_credit() {
        let limiter = RateLimiter::new(100); // 10ms interval
        limiter.take().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        // After a long idle gap, the next two permits are still spaced by one
        // interval from each other, not issued back-to-back as burst credit.
        limiter.take().await;
        let start = Instant::now();
        limiter.take().await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_takers_are_serialized_on_the_schedule() {
        let limiter = std::sync::Arc::new(RateLimiter::new(100));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.take().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
