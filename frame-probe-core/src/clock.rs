//! Monotonic time sources for the sampler.

use std::sync::atomic::{AtomicI64, Ordering};

/// A clock that never goes backwards and is unaffected by wall-clock changes.
///
/// The renderer stamps its frame info from the same clock domain, so the
/// difference between the two is a frame time.
pub trait MonotonicClock: Send + Sync {
    /// Current time in nanoseconds.
    fn now_nanos(&self) -> i64;
}

/// `CLOCK_MONOTONIC`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    fn now_nanos(&self) -> i64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is
        // supported on every Unix target this crate builds for.
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as i64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(ts.tv_nsec as i64)
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `now` nanoseconds.
    pub const fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Jumps to `now`.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::Relaxed);
    }

    /// Moves forward by `delta` nanoseconds.
    pub fn advance(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::Relaxed);
    }
}

impl MonotonicClock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.now.load(Ordering::Relaxed)
    }
}
