//! Token bucket throttling the bytes written by flushes and compactions.
//!
//! Tokens refill at `rate_bytes_per_sec`, accrued every `refill_period_us`,
//! up to one second of burst. A request larger than the bucket is served in
//! bucket-sized chunks so it can never wait forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::{default_env, Env};

struct Bucket {
    available: u64,
    last_refill_us: u64,
}

pub struct RateLimiter {
    rate_bytes_per_sec: AtomicU64,
    refill_period_us: u64,
    bucket: Mutex<Bucket>,
    env: Arc<dyn Env>,
    total_bytes_through: AtomicU64,
    total_requests: AtomicU64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate_bytes_per_sec", &self.bytes_per_second())
            .field("refill_period_us", &self.refill_period_us)
            .field("total_bytes_through", &self.total_bytes_through())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(rate_bytes_per_sec: u64, refill_period_us: u64) -> Self {
        Self::with_env(rate_bytes_per_sec, refill_period_us, default_env())
    }

    pub fn with_env(rate_bytes_per_sec: u64, refill_period_us: u64, env: Arc<dyn Env>) -> Self {
        let now = env.now_micros();
        Self {
            rate_bytes_per_sec: AtomicU64::new(rate_bytes_per_sec.max(1)),
            refill_period_us: refill_period_us.max(1),
            bucket: Mutex::new(Bucket {
                available: rate_bytes_per_sec,
                last_refill_us: now,
            }),
            env,
            total_bytes_through: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        self.rate_bytes_per_sec.load(Ordering::Relaxed)
    }

    pub fn set_bytes_per_second(&self, rate: u64) {
        self.rate_bytes_per_sec.store(rate.max(1), Ordering::Relaxed);
    }

    #[must_use]
    pub fn total_bytes_through(&self) -> u64 {
        self.total_bytes_through.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = self.env.now_micros();
        let elapsed = now.saturating_sub(bucket.last_refill_us);
        let periods = elapsed / self.refill_period_us;
        if periods == 0 {
            return;
        }
        let rate = self.bytes_per_second();
        let per_period = (rate.saturating_mul(self.refill_period_us) / 1_000_000).max(1);
        bucket.available = bucket
            .available
            .saturating_add(per_period.saturating_mul(periods))
            .min(rate);
        bucket.last_refill_us += periods * self.refill_period_us;
    }

    /// Blocks until `bytes` tokens have been granted.
    pub fn request(&self, bytes: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut remaining = bytes;
        while remaining > 0 {
            let granted = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);
                let take = remaining.min(bucket.available);
                bucket.available -= take;
                take
            };
            remaining -= granted;
            if remaining > 0 {
                self.env.sleep_micros(self.refill_period_us);
            }
        }
        self.total_bytes_through.fetch_add(bytes, Ordering::Relaxed);
    }
}
