//! Fixed rate clock.
use std::time::{Duration, Instant};

/// Timer to synchronize a thread with a fixed frequency.
///
/// Each scheduler task owns one clock. The task does its work, then calls
/// [`Clock::wait`] to block until the next tick is due.
pub(crate) struct Clock {
    interval: Duration,
    last: Instant,
}

impl Clock {
    /// Creates a new clock with the current time as internal state.
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// Set the clock state back to zero.
    pub(crate) fn reset(&mut self) {
        self.last = Instant::now()
    }

    /// Block the current thread until the next clock cycle.
    pub(crate) fn wait(&mut self) {
        let elapsed = self.last.elapsed();
        if elapsed < self.interval {
            // Plain thread sleep does not have enough resolution
            // for the CPU rate, and causes the clock to run slow.
            spin_sleep::sleep(self.interval - elapsed);
        }

        // Reset back to zero, rather than trying to catch up.
        //
        // If the host stalled the thread for a long time, the
        // machine should simply continue at its usual speed.
        self.reset();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wait_interval() {
        let interval = Duration::from_millis(5);
        let start = Instant::now();
        let mut clock = Clock::new(interval);

        for _ in 0..3 {
            clock.wait();
        }

        assert!(start.elapsed() >= interval * 3);
    }
}
