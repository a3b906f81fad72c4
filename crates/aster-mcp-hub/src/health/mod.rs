//! Health monitoring for MCP servers
//!
//! A [`HealthMonitor`] checks one [`HealthTarget`] on an interval, keeps
//! rolling [`HealthMetrics`] and runs recovery when a target fails too often.
//!
//! ```text
//!  monitor:  Pending ──start──▶ Running ◀──resume/pause──▶ Paused
//!                                  │                         │
//!                                  └────────stop─────────────┴──▶ Stopped
//!
//!  target:   Healthy ──fail──▶ Unhealthy ──N fails──▶ Recovering ──▶ Healthy
//!               ▲                  │                      │
//!               └─────success──────┘                      └──▶ Unhealthy
//! ```

mod metrics;
mod monitor;

pub use metrics::HealthMetrics;
pub use monitor::{CustomCheck, HealthListener, HealthMonitor};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::McpResult;
use crate::types::duration_ms;

/// Something whose health can be observed
#[async_trait]
pub trait HealthTarget: Send + Sync {
    fn name(&self) -> &str;

    /// Active check. `None` when the target cannot be checked, in which case
    /// [`is_healthy`](Self::is_healthy) is consulted instead.
    async fn perform_health_check(&self) -> Option<McpResult<()>> {
        None
    }

    /// Passive health read
    fn is_healthy(&self) -> bool;

    /// Clear error state ahead of a recovery attempt
    async fn reset_error_state(&self) -> McpResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub healthy: bool,
    #[serde(with = "duration_ms")]
    pub response_time: Duration,
    pub checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn success(response_time: Duration) -> Self {
        Self {
            healthy: true,
            response_time,
            checked_at: Utc::now(),
            error: None,
        }
    }

    pub fn failure(response_time: Duration, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            response_time,
            checked_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Health classification of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Recovering,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Recovering => write!(f, "recovering"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Pending,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthEventKind {
    Healthy,
    Unhealthy,
    Recovered,
    CheckFailed,
    RecoveryStarted,
    RecoveryFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    /// First success after a failure
    Healthy {
        target: String,
        result: HealthCheckResult,
    },
    /// First failure after a success
    Unhealthy {
        target: String,
        result: HealthCheckResult,
    },
    /// A further consecutive failure
    CheckFailed {
        target: String,
        result: HealthCheckResult,
        consecutive_failures: u32,
    },
    RecoveryStarted {
        target: String,
    },
    Recovered {
        target: String,
        attempts: u32,
    },
    RecoveryFailed {
        target: String,
        attempts: u32,
    },
}

impl HealthEvent {
    pub fn kind(&self) -> HealthEventKind {
        match self {
            HealthEvent::Healthy { .. } => HealthEventKind::Healthy,
            HealthEvent::Unhealthy { .. } => HealthEventKind::Unhealthy,
            HealthEvent::CheckFailed { .. } => HealthEventKind::CheckFailed,
            HealthEvent::RecoveryStarted { .. } => HealthEventKind::RecoveryStarted,
            HealthEvent::Recovered { .. } => HealthEventKind::Recovered,
            HealthEvent::RecoveryFailed { .. } => HealthEventKind::RecoveryFailed,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            HealthEvent::Healthy { target, .. }
            | HealthEvent::Unhealthy { target, .. }
            | HealthEvent::CheckFailed { target, .. }
            | HealthEvent::RecoveryStarted { target }
            | HealthEvent::Recovered { target, .. }
            | HealthEvent::RecoveryFailed { target, .. } => target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthMonitorOptions {
    #[serde(with = "duration_ms")]
    pub check_interval: Duration,
    #[serde(with = "duration_ms")]
    pub check_timeout: Duration,
    /// Delay before the first check
    #[serde(with = "duration_ms")]
    pub grace_period: Duration,
    pub max_consecutive_failures: u32,
    pub max_recovery_attempts: u32,
    #[serde(with = "duration_ms")]
    pub recovery_delay: Duration,
}

impl Default for HealthMonitorOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(5),
            grace_period: Duration::ZERO,
            max_consecutive_failures: 3,
            max_recovery_attempts: 3,
            recovery_delay: Duration::from_secs(1),
        }
    }
}
