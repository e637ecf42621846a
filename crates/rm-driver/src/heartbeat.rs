//! Connection Monitor - tracks raw transport activity to detect link aliveness
//!
//! Activity is registered for every frame the transport delivers, *before*
//! decoding. A stream of malformed frames therefore keeps the link alive:
//! decode noise and link loss are reported separately.
//!
//! Timestamps are microseconds since the first call to [`monotonic_micros`] in this
//! process. They never go backwards when the wall clock is adjusted, and they fit
//! in an `AtomicU64`, so the receiver thread can stamp activity without locking.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide zero point for [`monotonic_micros`]
static APP_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic time as microseconds since app start
pub fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Link activity monitor
pub struct ConnectionMonitor {
    last_activity: AtomicU64,
    timeout: Duration,
}

impl ConnectionMonitor {
    /// Create a new monitor
    ///
    /// # Parameters
    /// - `timeout`: Maximum duration without any inbound frame before the link is considered lost
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_activity: AtomicU64::new(monotonic_micros()),
            timeout,
        }
    }

    /// Returns true if a frame arrived within the timeout window
    pub fn check_connection(&self) -> bool {
        self.time_since_last_activity() < self.timeout
    }

    /// Register that the transport delivered a frame
    pub fn register_activity(&self) {
        self.last_activity
            .store(monotonic_micros(), Ordering::Relaxed);
    }

    pub fn time_since_last_activity(&self) -> Duration {
        let last_us = self.last_activity.load(Ordering::Relaxed);
        Duration::from_micros(monotonic_micros().saturating_sub(last_us))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
