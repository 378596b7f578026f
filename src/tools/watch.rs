//! Simple stopwatch for measuring elapsed time.

use std::time::{Duration, Instant};

/// A lightweight stopwatch.
///
/// [`Watch::elapsed_us`] saturates at `u32::MAX` (roughly 71 minutes), which is
/// plenty for request timing where longer durations indicate a problem anyway.
#[derive(Clone, Copy, Debug)]
pub struct Watch {
    start: Instant,
}

impl Watch {
    /// Starts a new stopwatch.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time since the watch was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the elapsed time in microseconds since the watch was started.
    pub fn elapsed_us(&self) -> u32 {
        u32::try_from(self.start.elapsed().as_micros()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn measures_elapsed_time() {
        let watch = Watch::start();
        thread::sleep(Duration::from_millis(10));

        assert!(watch.elapsed() >= Duration::from_millis(10));
        assert!(watch.elapsed_us() >= 9_000, "elapsed was {} µs", watch.elapsed_us());
    }
}
