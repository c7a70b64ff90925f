/// State shared by every adapter implementation
use crate::adapter::metrics::{Metrics, MetricsTracker};
use crate::config::ServiceConfig;
use crate::error::{ThroomError, ThroomResult};
use crate::health::{HealthStatus, HealthTracker};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Connection flag, metrics and health bookkeeping embedded in each adapter.
///
/// Concrete adapters funnel every network-touching operation through
/// [`AdapterCore::observe`] so the metrics stay consistent regardless of
/// which capability surface served the request.
#[derive(Debug)]
pub struct AdapterCore {
    config: ServiceConfig,
    connected: AtomicBool,
    metrics: MetricsTracker,
    health: HealthTracker,
}

impl AdapterCore {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            connected: AtomicBool::new(false),
            metrics: MetricsTracker::new(),
            health: HealthTracker::new(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn adapter_type(&self) -> &str {
        &self.config.service_type
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::AcqRel);
        if connected && !was {
            self.metrics.record_connection();
        }
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.snapshot()
    }

    pub fn record_request(&self, latency: Duration, success: bool) {
        self.metrics.record_request(latency, success);
    }

    /// Fail fast when the adapter has no live connection
    pub fn ensure_connected(&self) -> ThroomResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ThroomError::connection_failed(format!(
                "{} adapter at {} is not connected",
                self.config.service_type,
                self.config.address()
            )))
        }
    }

    /// Run `op` bounded by the service's operation timeout, counting it as an
    /// active request and recording its latency and outcome.
    pub async fn observe<T, F>(&self, operation: &str, op: F) -> ThroomResult<T>
    where
        F: Future<Output = ThroomResult<T>>,
    {
        let _active = self.metrics.begin_request();
        let started = Instant::now();

        let result = match tokio::time::timeout(self.config.operation_timeout(), op).await {
            Ok(result) => result,
            Err(_) => Err(ThroomError::timeout(format!(
                "{} on {}",
                operation,
                self.config.address()
            ))),
        };

        self.metrics.record_request(started.elapsed(), result.is_ok());
        result
    }

    /// Time a liveness check and stamp the adapter's health status
    pub async fn track_health<F>(&self, check: F) -> HealthStatus
    where
        F: Future<Output = ThroomResult<()>>,
    {
        let started = Instant::now();
        let outcome = check.await.map_err(|e| e.to_string());
        self.stamp_health(outcome, started.elapsed())
    }

    /// Stamp a check that could not run at all (crashed or timed out)
    pub fn health_failed(&self, reason: String, response_time: Duration) -> HealthStatus {
        self.stamp_health(Err(reason), response_time)
    }

    fn stamp_health(&self, outcome: Result<(), String>, response_time: Duration) -> HealthStatus {
        let status = self.health.record(outcome, response_time);

        if !status.healthy {
            tracing::warn!(
                adapter_type = %self.config.service_type,
                address = %self.config.address(),
                consecutive_fails = status.consecutive_fails,
                "Health check failed: {}",
                status
            );
        }

        status
    }

    pub fn last_health(&self) -> Option<HealthStatus> {
        self.health.last()
    }
}
