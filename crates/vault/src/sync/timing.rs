//! Pass timing utilities for progress reporting
//!
//! Pure functions that can be tested without a mailbox.

use std::time::{Duration, Instant};

/// Wall-clock timer started at creation
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    started: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log-ready estimate of the time left
    pub fn eta(&self, processed: usize, left: usize) -> String {
        human_duration(estimate_time_left(processed, self.elapsed(), left))
    }
}

/// Linear extrapolation of the time needed for `left` more items
///
/// # Arguments
/// * `processed` - Items done so far
/// * `elapsed` - Time spent on them
/// * `left` - Items still to do
///
/// # Returns
/// Zero when nothing was processed yet or nothing is left
pub fn estimate_time_left(processed: usize, elapsed: Duration, left: usize) -> Duration {
    if processed == 0 || left == 0 {
        return Duration::ZERO;
    }
    elapsed.mul_f64(left as f64 / processed as f64)
}

/// Format a duration as `1h 02m 03s`, `4m 05s` or `6s`
pub fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_nothing_processed() {
        // No rate yet, so no estimate
        assert_eq!(estimate_time_left(0, Duration::from_secs(5), 100), Duration::ZERO);
    }

    #[test]
    fn test_estimate_nothing_left() {
        assert_eq!(estimate_time_left(50, Duration::from_secs(5), 0), Duration::ZERO);
    }

    #[test]
    fn test_estimate_is_linear() {
        // 50 items in 10s, 150 left at the same rate
        assert_eq!(
            estimate_time_left(50, Duration::from_secs(10), 150),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration(Duration::from_secs(6)), "6s");
        assert_eq!(human_duration(Duration::from_secs(245)), "4m 05s");
        assert_eq!(human_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }
}
