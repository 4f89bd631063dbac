use std::sync::atomic::{AtomicU64, Ordering};

/// The virtual instruction clock.
///
/// One abstract tick per simulated instruction; device delays are expressed in
/// these units, never wall-clock time. The CPU loop advances the clock as it
/// retires instructions, and the bus fast-forwards it when the machine is idle
/// and the next scheduled device activity is still in the future.
///
/// Monotonic: [`VirtualClock::advance_to_at_least`] uses `fetch_max`, so
/// concurrent fast-forwards can never move time backwards.
#[derive(Debug, Default)]
pub struct VirtualClock(AtomicU64);

impl VirtualClock {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Current virtual time.
    #[inline]
    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Advances the clock by `ticks`.
    #[inline]
    pub fn advance(&self, ticks: u64) {
        self.0.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Advances the clock to `t` if it is currently behind, and returns the
    /// resulting time.
    #[inline]
    pub fn advance_to_at_least(&self, t: u64) -> u64 {
        self.0.fetch_max(t, Ordering::Relaxed).max(t)
    }
}
