//! Spacing between consecutive recognition requests, with adaptive backoff.
//!
//! A session submits one request per window back to back; the limiter keeps
//! those submissions at least `current_interval` apart, doubling the
//! interval after a failed request and halving it again after a run of
//! successes.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

pub struct RateLimiter {
    name: String,
    last_request: Option<Instant>,
    current_interval: Duration,
    base_interval: Duration,
    max_interval: Duration,
    success_count: u32,
    successes_to_reduce: u32,
}

impl RateLimiter {
    /// * `name` - label for log messages
    /// * `base_interval` - minimum time between requests
    /// * `max_interval` - upper bound after repeated failures
    /// * `successes_to_reduce` - consecutive successes before halving the
    ///   interval; 0 disables the reduction
    pub fn new(
        name: &str,
        base_interval: Duration,
        max_interval: Duration,
        successes_to_reduce: u32,
    ) -> Self {
        RateLimiter {
            name: name.to_string(),
            last_request: None,
            current_interval: base_interval,
            base_interval,
            max_interval: max_interval.max(base_interval),
            success_count: 0,
            successes_to_reduce,
        }
    }

    /// Base interval in (fractional) seconds, max 16x base, reduce after 10 successes.
    pub fn from_secs_f64(name: &str, secs: f64) -> Self {
        let base = Duration::from_secs_f64(secs.max(0.0));
        Self::new(name, base, base * 16, 10)
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Time left before the next request may go out.
    pub fn remaining(&self) -> Duration {
        match self.last_request {
            Some(last) => self.current_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the next request may go out, then mark it as sent.
    pub fn wait_if_needed(&mut self) {
        let wait_time = self.remaining();
        if !wait_time.is_zero() {
            debug!(limiter = %self.name, wait_secs = wait_time.as_secs_f64(), "rate limiting");
            thread::sleep(wait_time);
        }
        self.last_request = Some(Instant::now());
    }

    pub fn report_success(&mut self) {
        if self.successes_to_reduce == 0 {
            return;
        }

        self.success_count += 1;
        if self.success_count >= self.successes_to_reduce
            && self.current_interval > self.base_interval
        {
            self.current_interval = (self.current_interval / 2).max(self.base_interval);
            info!(
                limiter = %self.name,
                interval_secs = self.current_interval.as_secs_f64(),
                successes = self.success_count,
                "request interval reduced"
            );
            self.success_count = 0;
        }
    }

    /// Double the interval, up to the maximum.
    pub fn report_failure(&mut self) {
        self.current_interval = (self.current_interval * 2).min(self.max_interval);
        info!(
            limiter = %self.name,
            interval_secs = self.current_interval.as_secs_f64(),
            "request interval increased after error"
        );
        self.success_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut limiter =
            RateLimiter::new("test", Duration::from_millis(10), Duration::from_millis(35), 2);
        limiter.report_failure();
        assert_eq!(limiter.current_interval(), Duration::from_millis(20));
        limiter.report_failure();
        assert_eq!(limiter.current_interval(), Duration::from_millis(35));
        limiter.report_failure();
        assert_eq!(limiter.current_interval(), Duration::from_millis(35));
    }

    #[test]
    fn test_successes_reduce_to_base() {
        let mut limiter =
            RateLimiter::new("test", Duration::from_millis(10), Duration::from_millis(80), 2);
        limiter.report_failure();
        limiter.report_failure();
        assert_eq!(limiter.current_interval(), Duration::from_millis(40));

        limiter.report_success();
        assert_eq!(limiter.current_interval(), Duration::from_millis(40));
        limiter.report_success();
        assert_eq!(limiter.current_interval(), Duration::from_millis(20));
        limiter.report_success();
        limiter.report_success();
        assert_eq!(limiter.current_interval(), Duration::from_millis(10));
        limiter.report_success();
        limiter.report_success();
        assert_eq!(limiter.current_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_wait_spaces_requests() {
        let mut limiter = RateLimiter::from_secs_f64("test", 0.02);
        assert_eq!(limiter.remaining(), Duration::ZERO);
        let start = Instant::now();
        limiter.wait_if_needed();
        limiter.wait_if_needed();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
