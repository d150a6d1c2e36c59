use std::time::{Duration, Instant};

/// A deadline compared against a monotonic clock.
///
/// Missed deadlines fire once; the next one is counted from the time the
/// action actually ran, so nothing is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTimer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl IntervalTimer {
    /// A disarmed timer.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// A timer that is due immediately.
    pub fn due_now(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: Some(now),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    pub fn arm_after(&mut self, now: Instant, delay: Duration) {
        self.next_due = Some(now + delay);
    }

    /// Next deadline one interval after `now`.
    pub fn restart(&mut self, now: Instant) {
        self.arm_after(now, self.interval);
    }

    pub fn disarm(&mut self) {
        self.next_due = None;
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disarmed_never_due() {
        let timer = IntervalTimer::new(Duration::from_secs(5));
        assert!(!timer.is_due(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_restart_skips_missed_deadlines() {
        let start = Instant::now();
        let mut timer = IntervalTimer::new(Duration::from_secs(5));
        timer.arm_after(start, Duration::from_secs(2));
        assert!(!timer.is_due(start + Duration::from_secs(1)));
        assert!(timer.is_due(start + Duration::from_secs(2)));

        let late = start + Duration::from_secs(30);
        assert!(timer.is_due(late));
        timer.restart(late);
        assert!(!timer.is_due(late + Duration::from_secs(4)));
        assert!(timer.is_due(late + Duration::from_secs(5)));
    }

    #[test]
    fn test_disarm() {
        let now = Instant::now();
        let mut timer = IntervalTimer::due_now(Duration::from_secs(1), now);
        assert!(timer.is_due(now));
        timer.disarm();
        assert!(!timer.is_due(now));
        assert_eq!(timer.next_due(), None);
    }
}
