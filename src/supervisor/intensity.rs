//! Restart intensity: a sliding window of restart timestamps.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct RestartWindow {
    max: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl RestartWindow {
    pub(crate) fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            stamps: VecDeque::with_capacity(max + 1),
        }
    }

    /// Records a restart at `now`.
    ///
    /// Returns the number of restarts inside the window as the error when it would
    /// exceed the limit; the rejected restart is not kept.
    pub(crate) fn record(&mut self, now: Instant) -> Result<(), usize> {
        while let Some(first) = self.stamps.front() {
            if now.duration_since(*first) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
        if self.stamps.len() + 1 > self.max {
            return Err(self.stamps.len() + 1);
        }
        self.stamps.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_applies_inside_window_only() {
        let start = Instant::now();
        let mut window = RestartWindow::new(2, Duration::from_secs(10));
        assert!(window.record(start).is_ok());
        assert!(window.record(start + Duration::from_secs(1)).is_ok());
        assert_eq!(window.record(start + Duration::from_secs(2)), Err(3));

        // the first stamp has aged out
        assert!(window.record(start + Duration::from_secs(10)).is_ok());
        assert_eq!(window.record(start + Duration::from_secs(10)), Err(3));
    }

    #[test]
    fn zero_limit_rejects_every_restart() {
        let mut window = RestartWindow::new(0, Duration::from_secs(1));
        assert_eq!(window.record(Instant::now()), Err(1));
    }
}
