use std::thread;
use std::time::{Duration, Instant};

/// Time source for the poll tick, the item interval, reinit cooldowns and the
/// idle watchdog. Loops never call `Instant::now()` or `thread::sleep` directly.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

/// Wall-time clock used by the running service.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

#[cfg(any(test, feature = "test-clock"))]
pub mod test_clock {
    use super::{Clock, Duration, Instant};
    use std::sync::{Arc, Mutex};

    /// Manually driven clock. `sleep` returns at once and moves time forward;
    /// every clone observes the same elapsed time.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        elapsed: Arc<Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        pub fn advance(&self, d: Duration) {
            if let Ok(mut e) = self.elapsed.lock() {
                *e = e.saturating_add(d);
            }
        }

        /// Total time advanced since construction.
        pub fn elapsed(&self) -> Duration {
            self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn clones_share_elapsed_time() {
            let clock = TestClock::new();
            let other = clock.clone();
            let t0 = clock.now();
            other.sleep(Duration::from_millis(250));
            clock.advance(Duration::from_millis(50));
            assert_eq!(clock.now() - t0, Duration::from_millis(300));
            assert_eq!(other.elapsed(), Duration::from_millis(300));
        }
    }
}
