//! Record cap accounting.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts records admitted during one refresh cycle against an optional cap.
///
/// Shared between the producer side (admission) and the aggregation step
/// (trimming), so the counter is atomic.
#[derive(Debug, Default)]
pub struct SizeLimiter {
    cap: Option<usize>,
    admitted: AtomicUsize,
}

impl SizeLimiter {
    #[must_use]
    pub const fn new(cap: Option<usize>) -> Self {
        Self {
            cap,
            admitted: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn unbounded() -> Self {
        Self::new(None)
    }

    #[must_use]
    pub const fn cap(&self) -> Option<usize> {
        self.cap
    }

    /// Records admitted since the last reset.
    #[must_use]
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }

    /// Zero the admitted counter. Called once at the start of each refresh cycle.
    pub fn reset(&self) {
        self.admitted.store(0, Ordering::Release);
    }

    /// Count `n` more records. Returns whether the cap is now met or exceeded.
    pub fn check_and_count(&self, n: usize) -> bool {
        let total = self
            .admitted
            .fetch_add(n, Ordering::AcqRel)
            .saturating_add(n);
        self.cap.is_some_and(|cap| total >= cap)
    }

    /// Whether the cap has already been met, without counting anything.
    #[must_use]
    pub fn is_reached(&self) -> bool {
        self.cap.is_some_and(|cap| self.admitted() >= cap)
    }

    /// How many of the oldest elements must go for `current_size` to fit the cap.
    #[must_use]
    pub fn overflow_by(&self, current_size: usize) -> usize {
        self.cap
            .map_or(0, |cap| current_size.saturating_sub(cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_reaches_cap() {
        let limiter = SizeLimiter::unbounded();
        assert!(!limiter.check_and_count(1_000_000));
        assert!(!limiter.is_reached());
        assert_eq!(limiter.overflow_by(usize::MAX), 0);
    }

    #[test]
    fn test_check_and_count_reports_cap() {
        let limiter = SizeLimiter::new(Some(3));
        assert!(!limiter.check_and_count(1));
        assert!(!limiter.check_and_count(1));
        assert!(!limiter.is_reached());
        assert!(limiter.check_and_count(1));
        assert!(limiter.is_reached());
        assert!(limiter.check_and_count(2));
        assert_eq!(limiter.admitted(), 5);
    }

    #[test]
    fn test_reset_zeroes_counter() {
        let limiter = SizeLimiter::new(Some(2));
        limiter.check_and_count(2);
        assert!(limiter.is_reached());
        limiter.reset();
        assert_eq!(limiter.admitted(), 0);
        assert!(!limiter.is_reached());
    }

    #[test]
    fn test_overflow_by() {
        let limiter = SizeLimiter::new(Some(10));
        assert_eq!(limiter.overflow_by(0), 0);
        assert_eq!(limiter.overflow_by(10), 0);
        assert_eq!(limiter.overflow_by(13), 3);
    }
}
