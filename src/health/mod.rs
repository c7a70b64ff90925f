/// Health checking and request metrics for backend adapters
pub mod collector;
pub mod monitor;

pub use collector::{ClusterMetrics, MetricsCollector, ServiceMetrics};
pub use monitor::{HealthHistory, HealthMonitor};

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Result of one active health check against an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub response_time: Duration,
    pub error_message: Option<String>,
    pub last_checked: SystemTime,
    pub consecutive_fails: u32,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.healthy, &self.error_message) {
            (true, _) => write!(f, "Healthy"),
            (false, Some(reason)) => write!(f, "Unhealthy: {}", reason),
            (false, None) => write!(f, "Unhealthy"),
        }
    }
}

impl HealthStatus {
    /// Status for a handle whose check could not run at all (error or timeout)
    pub fn failed<S: Into<String>>(reason: S, response_time: Duration) -> Self {
        Self {
            healthy: false,
            response_time,
            error_message: Some(reason.into()),
            last_checked: SystemTime::now(),
            consecutive_fails: 1,
        }
    }

    /// Check if the status represents a healthy backend
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

/// Health state owned by a single adapter
///
/// Only the owning adapter's health check writes here.
#[derive(Debug, Default)]
pub struct HealthTracker {
    state: Mutex<Option<HealthStatus>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the outcome of a check and return the resulting status
    pub fn record(&self, outcome: Result<(), String>, response_time: Duration) -> HealthStatus {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let previous_fails = state.as_ref().map_or(0, |s| s.consecutive_fails);

        let status = match outcome {
            Ok(()) => HealthStatus {
                healthy: true,
                response_time,
                error_message: None,
                last_checked: SystemTime::now(),
                consecutive_fails: 0,
            },
            Err(reason) => HealthStatus {
                healthy: false,
                response_time,
                error_message: Some(reason),
                last_checked: SystemTime::now(),
                consecutive_fails: previous_fails.saturating_add(1),
            },
        };

        *state = Some(status.clone());
        status
    }

    /// Most recent status, if a check has run
    pub fn last(&self) -> Option<HealthStatus> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
