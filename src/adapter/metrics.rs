/// Per-adapter request metrics
///
/// Every adapter owns one [`MetricsTracker`]. Operations report their
/// latency and outcome through [`MetricsTracker::record_request`]; strategies
/// and monitoring read immutable [`Metrics`] snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Point-in-time copy of an adapter's counters
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Percentage of successful requests, 100 when nothing was recorded
    pub success_rate: f64,
    pub average_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Operations currently in flight
    pub active_connections: u64,
    /// Successful connects over the adapter's lifetime
    pub total_connections: u64,
    pub last_request_time: Option<SystemTime>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            failed_requests: 0,
            success_rate: 100.0,
            average_latency: Duration::ZERO,
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            active_connections: 0,
            total_connections: 0,
            last_request_time: None,
        }
    }
}

#[derive(Debug, Default)]
struct RequestCounters {
    total: u64,
    failed: u64,
    latency_sum_nanos: u128,
    min_latency: Duration,
    max_latency: Duration,
    last_request_time: Option<SystemTime>,
}

/// Synchronized metrics owned by a single adapter
#[derive(Debug, Default)]
pub struct MetricsTracker {
    requests: Mutex<RequestCounters>,
    active: AtomicU64,
    connections: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed operation attempt
    pub fn record_request(&self, latency: Duration, success: bool) {
        let mut counters = self.requests.lock().unwrap_or_else(|e| e.into_inner());

        counters.total += 1;
        if !success {
            counters.failed += 1;
        }

        // The first request seeds both bounds
        if counters.total == 1 {
            counters.min_latency = latency;
            counters.max_latency = latency;
        } else {
            counters.min_latency = counters.min_latency.min(latency);
            counters.max_latency = counters.max_latency.max(latency);
        }

        counters.latency_sum_nanos += latency.as_nanos();
        counters.last_request_time = Some(SystemTime::now());
    }

    /// Mark an operation as in flight until the returned guard is dropped
    pub fn begin_request(&self) -> ActiveRequest<'_> {
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveRequest { tracker: self }
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Metrics {
        let counters = self.requests.lock().unwrap_or_else(|e| e.into_inner());

        let (success_rate, average_latency) = if counters.total == 0 {
            (100.0, Duration::ZERO)
        } else {
            let succeeded = counters.total - counters.failed;
            let average = counters.latency_sum_nanos / counters.total as u128;
            (
                succeeded as f64 / counters.total as f64 * 100.0,
                Duration::from_nanos(u64::try_from(average).unwrap_or(u64::MAX)),
            )
        };

        Metrics {
            total_requests: counters.total,
            failed_requests: counters.failed,
            success_rate,
            average_latency,
            min_latency: counters.min_latency,
            max_latency: counters.max_latency,
            active_connections: self.active.load(Ordering::Relaxed),
            total_connections: self.connections.load(Ordering::Relaxed),
            last_request_time: counters.last_request_time,
        }
    }
}

/// In-flight marker returned by [`MetricsTracker::begin_request`]
#[derive(Debug)]
pub struct ActiveRequest<'a> {
    tracker: &'a MetricsTracker,
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::Relaxed);
    }
}
