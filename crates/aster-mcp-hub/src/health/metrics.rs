use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::HealthCheckResult;
use crate::types::duration_ms;

/// Rolling health counters for one target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    /// Reset by any success
    pub consecutive_failures: u32,
    #[serde(with = "duration_ms")]
    pub average_response_time: Duration,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HealthMetrics {
    pub fn record(&mut self, result: &HealthCheckResult) {
        self.total_checks += 1;
        let n = self.total_checks as u128;
        let avg = self.average_response_time.as_nanos();
        let mean = (avg * (n - 1) + result.response_time.as_nanos()) / n;
        self.average_response_time = Duration::from_nanos(mean.min(u64::MAX as u128) as u64);

        if result.healthy {
            self.successful_checks += 1;
            self.consecutive_failures = 0;
            self.last_success = Some(result.checked_at);
        } else {
            self.failed_checks += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure = Some(result.checked_at);
            self.last_error = result.error.clone();
        }
    }

    /// Share of successful checks in percent; 100 before any check
    pub fn availability(&self) -> f64 {
        if self.total_checks == 0 {
            return 100.0;
        }
        self.successful_checks as f64 * 100.0 / self.total_checks as f64
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_average() {
        let mut metrics = HealthMetrics::default();
        metrics.record(&HealthCheckResult::success(Duration::from_millis(10)));
        metrics.record(&HealthCheckResult::failure(Duration::from_millis(30), "down"));
        metrics.record(&HealthCheckResult::failure(Duration::from_millis(20), "down"));

        assert_eq!(metrics.total_checks, 3);
        assert_eq!(metrics.successful_checks, 1);
        assert_eq!(metrics.failed_checks, 2);
        assert_eq!(metrics.consecutive_failures, 2);
        assert_eq!(metrics.average_response_time, Duration::from_millis(20));
        assert_eq!(metrics.last_error.as_deref(), Some("down"));
        assert!((metrics.availability() - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut metrics = HealthMetrics::default();
        for _ in 0..4 {
            metrics.record(&HealthCheckResult::failure(Duration::ZERO, "x"));
        }
        metrics.record(&HealthCheckResult::success(Duration::ZERO));
        assert_eq!(metrics.consecutive_failures, 0);
        assert!(metrics.last_success.is_some());

        metrics.reset();
        assert_eq!(metrics, HealthMetrics::default());
        assert_eq!(metrics.availability(), 100.0);
    }
}
