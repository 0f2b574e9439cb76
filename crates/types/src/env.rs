//! Clock capability handed to the database at open.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source used by rate limiting, write stalls and job statistics.
/// Tests inject a [`ManualClock`] to make time deterministic.
pub trait Env: Send + Sync {
    /// Monotonic microseconds.
    fn now_micros(&self) -> u64;

    /// Seconds since the Unix epoch.
    fn unix_time_secs(&self) -> u64;

    fn sleep_micros(&self, micros: u64);
}

#[derive(Debug)]
pub struct SystemEnv {
    start: Instant,
}

impl Default for SystemEnv {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Env for SystemEnv {
    fn now_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn unix_time_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn sleep_micros(&self, micros: u64) {
        std::thread::sleep(Duration::from_micros(micros));
    }
}

/// Process-wide default environment.
pub fn default_env() -> Arc<dyn Env> {
    static ENV: OnceLock<Arc<dyn Env>> = OnceLock::new();
    ENV.get_or_init(|| Arc::new(SystemEnv::default())).clone()
}

/// A clock that only moves when told to. Sleeping advances it.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new(start_micros: u64) -> Self {
        Self {
            micros: AtomicU64::new(start_micros),
        }
    }

    pub fn advance(&self, micros: u64) {
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Env for ManualClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }

    fn unix_time_secs(&self) -> u64 {
        self.now_micros() / 1_000_000
    }

    fn sleep_micros(&self, micros: u64) {
        self.advance(micros);
    }
}
