//! Per-connection sliding-window admission control for chat-producing
//! operations (`message`, `private_message`, `action`).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chat_common::constants::{RATE_LIMIT_MAX_EVENTS, RATE_LIMIT_WINDOW_SECS};

pub struct SlidingWindowLimiter {
    max_events: usize,
    window: Duration,
    events: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            max_events,
            window,
            events: VecDeque::new(),
        }
    }

    /// Drops stale timestamps, then admits iff fewer than `max_events`
    /// remain within the window. Records the admission on success.
    pub fn check(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.events.front() {
            if now.duration_since(oldest) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }

        if self.events.len() >= self.max_events {
            return false;
        }

        self.events.push_back(now);
        true
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(
            RATE_LIMIT_MAX_EVENTS,
            Duration::from_secs_f64(RATE_LIMIT_WINDOW_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_max_within_window() {
        let mut limiter = SlidingWindowLimiter::new(5, Duration::from_secs(1));
        let base = Instant::now();
        for i in 0..5 {
            assert!(limiter.check(base + Duration::from_millis(i * 50)));
        }
        assert!(!limiter.check(base + Duration::from_millis(400)));
    }

    #[test]
    fn admits_again_after_window_elapses() {
        let mut limiter = SlidingWindowLimiter::new(5, Duration::from_secs(1));
        let base = Instant::now();
        for i in 0..5 {
            assert!(limiter.check(base + Duration::from_millis(i * 10)));
        }
        assert!(!limiter.check(base + Duration::from_millis(500)));
        assert!(limiter.check(base + Duration::from_millis(1_100)));
    }

    #[test]
    fn independent_limiters_do_not_share_state() {
        let mut a = SlidingWindowLimiter::new(1, Duration::from_secs(1));
        let mut b = SlidingWindowLimiter::new(1, Duration::from_secs(1));
        let now = Instant::now();
        assert!(a.check(now));
        assert!(b.check(now));
        assert!(!a.check(now));
    }
}
