//! Sliding window ingress accounting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Rates are never computed over less than this, so a burst right after a connection opens
/// doesn't read as an absurd rate
const MIN_ELAPSED: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Ingress rate of {rate} bytes/sec exceeds the limit of {limit} bytes/sec")]
pub struct BandwidthExceeded {
    pub rate: u64,
    pub limit: u64,
}

/// Tracks how many bytes arrived over the most recent window of time
#[derive(Debug)]
pub struct BitrateTracker {
    window: Duration,
    started_at: Instant,
    samples: VecDeque<(Instant, usize)>,
    bytes_in_window: u64,
}

impl BitrateTracker {
    pub fn new(window: Duration) -> BitrateTracker {
        BitrateTracker::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, started_at: Instant) -> BitrateTracker {
        BitrateTracker {
            window,
            started_at,
            samples: VecDeque::new(),
            bytes_in_window: 0,
        }
    }

    pub fn add_bytes(&mut self, count: usize) {
        self.add_bytes_at(count, Instant::now());
    }

    pub fn add_bytes_at(&mut self, count: usize, now: Instant) {
        self.samples.push_back((now, count));
        self.bytes_in_window += count as u64;
        self.evict(now);
    }

    /// Bytes per second over the window
    pub fn rate(&mut self) -> u64 {
        self.rate_at(Instant::now())
    }

    pub fn rate_at(&mut self, now: Instant) -> u64 {
        self.evict(now);

        let elapsed = now.saturating_duration_since(self.started_at).min(self.window);
        let elapsed = elapsed.max(MIN_ELAPSED);

        (self.bytes_in_window as f64 / elapsed.as_secs_f64()) as u64
    }

    fn evict(&mut self, now: Instant) {
        while let Some((received_at, count)) = self.samples.front() {
            if now.saturating_duration_since(*received_at) < self.window {
                break;
            }

            self.bytes_in_window -= *count as u64;
            self.samples.pop_front();
        }
    }
}

/// Rejects ingress once the tracked rate goes over a fixed limit
#[derive(Debug)]
pub struct BandwidthLimiter {
    tracker: BitrateTracker,
    max_bytes_per_second: u64,
}

impl BandwidthLimiter {
    pub fn new(max_bytes_per_second: u64, window: Duration) -> BandwidthLimiter {
        BandwidthLimiter {
            tracker: BitrateTracker::new(window),
            max_bytes_per_second,
        }
    }

    pub fn with_tracker(max_bytes_per_second: u64, tracker: BitrateTracker) -> BandwidthLimiter {
        BandwidthLimiter {
            tracker,
            max_bytes_per_second,
        }
    }

    pub fn record(&mut self, count: usize) -> Result<(), BandwidthExceeded> {
        self.record_at(count, Instant::now())
    }

    pub fn record_at(&mut self, count: usize, now: Instant) -> Result<(), BandwidthExceeded> {
        self.tracker.add_bytes_at(count, now);

        let rate = self.tracker.rate_at(now);
        if rate > self.max_bytes_per_second {
            return Err(BandwidthExceeded {
                rate,
                limit: self.max_bytes_per_second,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: f64) -> Duration {
        Duration::from_secs_f64(value)
    }

    #[test]
    fn rate_divides_by_elapsed_time() {
        let start = Instant::now();
        let mut tracker = BitrateTracker::starting_at(secs(5.0), start);

        tracker.add_bytes_at(1000, start);
        tracker.add_bytes_at(1000, start + secs(1.5));

        assert_eq!(tracker.rate_at(start + secs(2.0)), 1000);
    }

    #[test]
    fn old_samples_leave_the_window() {
        let start = Instant::now();
        let mut tracker = BitrateTracker::starting_at(secs(5.0), start);

        tracker.add_bytes_at(5000, start);
        tracker.add_bytes_at(1000, start + secs(6.0));

        assert_eq!(tracker.rate_at(start + secs(6.0)), 200);
    }

    #[test]
    fn elapsed_time_is_floored_at_one_second() {
        let start = Instant::now();
        let mut tracker = BitrateTracker::starting_at(secs(5.0), start);

        tracker.add_bytes_at(500, start);

        assert_eq!(tracker.rate_at(start + secs(0.1)), 500);
    }

    #[test]
    fn empty_tracker_reports_zero() {
        let start = Instant::now();
        let mut tracker = BitrateTracker::starting_at(secs(5.0), start);

        assert_eq!(tracker.rate_at(start + secs(3.0)), 0);
    }

    #[test]
    fn limiter_rejects_once_rate_is_exceeded() {
        let start = Instant::now();
        let tracker = BitrateTracker::starting_at(secs(5.0), start);
        let mut limiter = BandwidthLimiter::with_tracker(1000, tracker);

        assert_eq!(limiter.record_at(500, start), Ok(()));
        assert_eq!(
            limiter.record_at(1000, start + secs(0.5)),
            Err(BandwidthExceeded {
                rate: 1500,
                limit: 1000
            })
        );
    }

    #[test]
    fn limiter_allows_steady_traffic_under_the_limit() {
        let start = Instant::now();
        let tracker = BitrateTracker::starting_at(secs(5.0), start);
        let mut limiter = BandwidthLimiter::with_tracker(1000, tracker);

        for second in 1..=20 {
            let result = limiter.record_at(900, start + secs(second as f64));
            assert_eq!(result, Ok(()), "Rejected at second {}", second);
        }
    }
}
