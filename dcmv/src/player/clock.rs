use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic millisecond clock.
///
/// The presentation loop anchors all of its timing decisions on this capability. On real
/// hardware the adapter reads the audio DSP's own counter so the video clock lives in the same
/// domain as the audio clock and cannot drift against it; tests substitute a manually advanced
/// clock.
pub trait Clock: Send + Sync {
    /// Returns the current time in milliseconds from an arbitrary epoch.
    fn now_ms(&self) -> f64;
}

/// A `Clock` backed by the host's monotonic timer.
#[derive(Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

/// A `Clock` which only moves when told to. For tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_bits: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current time to `ms`.
    pub fn set_ms(&self, ms: f64) {
        self.now_bits.store(ms.to_bits(), Ordering::Release);
    }

    /// Advances the current time by `ms`.
    pub fn advance_ms(&self, ms: f64) {
        let now = f64::from_bits(self.now_bits.load(Ordering::Acquire));
        self.set_ms(now + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::Acquire))
    }
}
