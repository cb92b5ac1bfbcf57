use std::hint;
use std::thread;

/// Escalating wait strategy for a thread spinning on a lock-free slot:
/// [`SpinLock::lock`](crate::SpinLock::lock) and [`Ring::reserve_with_backoff`](crate::Ring::reserve_with_backoff)
/// both hold one of these across their retry loop instead of busy-looping
/// unconditionally, which would pin a core at 100% for the entire time a
/// producer is waiting for the command thread to drain a full ring.
///
/// Three phases: tight CPU spins with a pause hint, then OS-level yields,
/// then [`Backoff::is_completed`] starts returning `true` so the caller can
/// fall back to parking or giving up.
#[derive(Debug)]
pub struct Backoff {
    attempts: u32,
}

impl Backoff {
    /// Spin phase covers attempts `0..=6` (up to 64 `spin_loop` hints per
    /// call); attempts `7..=10` yield to the scheduler instead.
    const SPIN_PHASE_END: u32 = 6;
    const YIELD_PHASE_END: u32 = 10;

    #[inline]
    pub fn new() -> Self {
        Self { attempts: 0 }
    }

    /// Issues `2^attempts` (capped) `spin_loop` hints and advances the
    /// phase counter.
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..1u32 << self.attempts.min(Self::SPIN_PHASE_END) {
            hint::spin_loop();
        }
        self.attempts = self.attempts.saturating_add(1);
    }

    /// One step of the full strategy: spins while still in the spin phase,
    /// otherwise yields the thread to the scheduler.
    #[inline]
    pub fn snooze(&mut self) {
        if self.attempts <= Self::SPIN_PHASE_END {
            self.spin();
            return;
        }
        thread::yield_now();
        if self.attempts <= Self::YIELD_PHASE_END {
            self.attempts += 1;
        }
    }

    /// `true` once both phases are exhausted and the caller should stop
    /// retrying inline (park, sleep, or return `None`).
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.attempts > Self::YIELD_PHASE_END
    }

    /// Starts the strategy over, for a thread about to wait on a new slot.
    #[inline]
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_advances_past_the_spin_phase() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.attempts, 0);
        for _ in 0..=Backoff::SPIN_PHASE_END {
            backoff.spin();
        }
        assert!(backoff.attempts > Backoff::SPIN_PHASE_END);
    }

    #[test]
    fn test_snooze_eventually_completes() {
        let mut backoff = Backoff::new();
        let mut steps = 0;
        while !backoff.is_completed() {
            backoff.snooze();
            steps += 1;
            assert!(steps < 1000, "backoff never completed");
        }
        assert!(backoff.attempts > Backoff::YIELD_PHASE_END);
    }

    #[test]
    fn test_reset_restarts_the_spin_phase() {
        let mut backoff = Backoff::new();
        while !backoff.is_completed() {
            backoff.snooze();
        }
        backoff.reset();
        assert_eq!(backoff.attempts, 0);
        assert!(!backoff.is_completed());
    }
}
