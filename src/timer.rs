//! One-shot timers driven by the owner's clock.
//!
//! Nothing here sleeps or spawns. The owner asks for the earliest deadline with
//! `next_timeout()` and reports the passage of time with `handle_timeout(now)`.

use std::time::{Duration, Instant};

/// A one-shot deadline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    /// An inactive timer.
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Arms the timer to fire `delay` after `now`, replacing any earlier deadline.
    pub fn start(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    /// Disarms the timer.
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Whether the timer is armed.
    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarms and returns `true` if the deadline has passed.
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            },
            _ => false,
        }
    }
}

/// The earlier of two optional deadlines.
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once() {
        let now = Instant::now();
        let mut timer = Timer::new();
        assert!(!timer.poll_expired(now));

        timer.start(now, Duration::from_secs(1));
        assert!(timer.is_active());
        assert!(!timer.poll_expired(now));
        assert!(timer.poll_expired(now + Duration::from_secs(1)));
        assert!(!timer.is_active());
        assert!(!timer.poll_expired(now + Duration::from_secs(2)));
    }

    #[test]
    fn zero_delay_fires_immediately() {
        let now = Instant::now();
        let mut timer = Timer::new();
        timer.start(now, Duration::ZERO);
        assert!(timer.poll_expired(now));
    }

    #[test]
    fn stop_disarms() {
        let now = Instant::now();
        let mut timer = Timer::new();
        timer.start(now, Duration::ZERO);
        timer.stop();
        assert!(!timer.poll_expired(now));
    }

    #[test]
    fn earliest_deadline() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert_eq!(earliest(Some(later), Some(now)), Some(now));
        assert_eq!(earliest(None, Some(later)), Some(later));
        assert_eq!(earliest(None, None), None);
    }
}
