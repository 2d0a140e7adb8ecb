//! Retry/backoff schedule for provider generation calls (spec §4.3).
//!
//! Shaped after `graphweave::graph::retry::RetryPolicy` (exponential
//! schedule, pure data, no hidden state) but split into two independent
//! schedules — normal failures and rate-limit failures — per spec: a
//! rate-limit error does not consume a normal attempt and uses its own
//! bounds.

use std::time::Duration;

/// Pure value describing both backoff schedules used by
/// [`crate::agentcore::agent::Agent`]'s generate-with-retry loop.
///
/// Keeping this as plain data with no hidden state is what makes property
/// P6 ("provider.generate is called exactly N times") testable without
/// mocking a clock.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub rate_limit_max_attempts: usize,
    pub rate_limit_base_backoff: Duration,
    pub rate_limit_max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            rate_limit_max_attempts: 5,
            rate_limit_base_backoff: Duration::from_millis(500),
            rate_limit_max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
            max_backoff,
            ..Self::default()
        }
    }

    pub fn with_rate_limit_schedule(
        mut self,
        max_attempts: usize,
        base_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        self.rate_limit_max_attempts = max_attempts;
        self.rate_limit_base_backoff = base_backoff;
        self.rate_limit_max_backoff = max_backoff;
        self
    }

    /// `delay = min(baseBackoff * 2^(n-1), maxBackoff)` for attempt `n >= 1`.
    pub fn normal_backoff(&self, attempt: usize) -> Duration {
        exponential(self.base_backoff, self.max_backoff, attempt)
    }

    /// Same exponential shape as [`normal_backoff`](Self::normal_backoff)
    /// but over the rate-limit schedule's own bounds.
    pub fn rate_limit_backoff(&self, attempt: usize) -> Duration {
        exponential(self.rate_limit_base_backoff, self.rate_limit_max_backoff, attempt)
    }
}

fn exponential(base: Duration, cap: Duration, attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1) as u32;
    let scaled = base.as_secs_f64() * 2f64.powi(exponent as i32);
    let delay = Duration::from_secs_f64(scaled);
    delay.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(200),
            Duration::from_millis(900),
        );
        assert_eq!(policy.normal_backoff(1), Duration::from_millis(200));
        assert_eq!(policy.normal_backoff(2), Duration::from_millis(400));
        assert_eq!(policy.normal_backoff(3), Duration::from_millis(800));
        // would be 1600ms uncapped
        assert_eq!(policy.normal_backoff(4), Duration::from_millis(900));
    }

    #[test]
    fn rate_limit_schedule_is_independent_of_normal_schedule() {
        let policy = RetryPolicy::default()
            .with_rate_limit_schedule(3, Duration::from_secs(1), Duration::from_secs(4));
        assert_eq!(policy.rate_limit_backoff(1), Duration::from_secs(1));
        assert_eq!(policy.rate_limit_backoff(2), Duration::from_secs(2));
        assert_eq!(policy.rate_limit_backoff(3), Duration::from_secs(4));
        // normal schedule untouched
        assert_eq!(policy.normal_backoff(1), Duration::from_millis(200));
    }

    #[test]
    fn default_matches_spec_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_backoff, Duration::from_millis(200));
        assert_eq!(policy.max_backoff, Duration::from_secs(2));
    }
}
