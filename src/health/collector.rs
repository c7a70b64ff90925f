/// Per-cluster request metrics, exported in the Prometheus text format
///
/// The gateway records every routed request here with the cluster, the
/// service that served it and the backend type. Counters, a latency
/// histogram and an active-connection gauge live in the collector's own
/// registry; alongside them a per-service summary (success rate, latency
/// percentiles, recent errors) is kept for the CLI and for callers.
use super::HealthStatus;
use crate::error::{ThroomError, ThroomResult};
use crate::router::Router;
use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
    DEFAULT_BUCKETS,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

/// Latency samples kept per service for the percentiles
pub const LATENCY_SAMPLES: usize = 1000;

/// Error messages kept per service
pub const RECENT_ERRORS: usize = 10;

const SERVICE_LABELS: [&str; 3] = ["cluster_id", "service", "type"];
const ERROR_LABELS: [&str; 4] = ["cluster_id", "service", "type", "error_type"];

/// Request summary for one service of a cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMetrics {
    pub service: String,
    pub service_type: String,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Percentage of successful requests
    pub success_rate: f64,
    pub average_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub p95_latency: Duration,
    pub p99_latency: Duration,
    pub active_connections: u64,
    /// Outcome of the latest health check, `None` before the first one
    pub healthy: Option<bool>,
    pub last_request: Option<SystemTime>,
    /// Most recent error messages, oldest first
    pub errors: VecDeque<String>,
    samples: VecDeque<Duration>,
}

impl ServiceMetrics {
    fn new(service: &str, service_type: &str) -> Self {
        Self {
            service: service.to_string(),
            service_type: service_type.to_string(),
            total_requests: 0,
            failed_requests: 0,
            success_rate: 100.0,
            average_latency: Duration::ZERO,
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            p95_latency: Duration::ZERO,
            p99_latency: Duration::ZERO,
            active_connections: 0,
            healthy: None,
            last_request: None,
            errors: VecDeque::new(),
            samples: VecDeque::new(),
        }
    }

    fn record(&mut self, latency: Duration, error: Option<&ThroomError>) {
        self.total_requests += 1;
        if let Some(error) = error {
            self.failed_requests += 1;
            if self.errors.len() == RECENT_ERRORS {
                self.errors.pop_front();
            }
            self.errors.push_back(error.to_string());
        }
        self.success_rate = (self.total_requests - self.failed_requests) as f64
            / self.total_requests as f64
            * 100.0;

        if self.total_requests == 1 {
            self.min_latency = latency;
            self.max_latency = latency;
        } else {
            self.min_latency = self.min_latency.min(latency);
            self.max_latency = self.max_latency.max(latency);
        }
        self.average_latency = rolling_average(self.average_latency, latency, self.total_requests);

        if self.samples.len() == LATENCY_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        self.p95_latency = percentile(&sorted, 95);
        self.p99_latency = percentile(&sorted, 99);

        self.last_request = Some(SystemTime::now());
    }
}

/// Request summary for one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMetrics {
    pub cluster_id: String,
    pub services: BTreeMap<String, ServiceMetrics>,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub average_latency: Duration,
    pub last_updated: SystemTime,
}

impl ClusterMetrics {
    fn new(cluster_id: &str) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            services: BTreeMap::new(),
            total_requests: 0,
            failed_requests: 0,
            average_latency: Duration::ZERO,
            last_updated: SystemTime::now(),
        }
    }

    fn service(&mut self, service: &str, service_type: &str) -> &mut ServiceMetrics {
        self.services
            .entry(service.to_string())
            .or_insert_with(|| ServiceMetrics::new(service, service_type))
    }
}

fn rolling_average(average: Duration, latency: Duration, count: u64) -> Duration {
    let count = count.max(1) as f64;
    Duration::from_secs_f64(average.as_secs_f64() + (latency.as_secs_f64() - average.as_secs_f64()) / count)
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (sorted.len() * pct).div_ceil(100).max(1);
    sorted[rank - 1]
}

/// Prometheus-backed request metrics for every loaded cluster
pub struct MetricsCollector {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    errors_total: IntCounterVec,
    active_connections: IntGaugeVec,
    clusters: RwLock<BTreeMap<String, ClusterMetrics>>,
}

fn metrics_error(e: prometheus::Error) -> ThroomError {
    ThroomError::internal(format!("metrics registry: {}", e))
}

impl MetricsCollector {
    /// Collector with its own registry, so several gateways can coexist
    pub fn new() -> ThroomResult<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            opts!("throome_requests_total", "Total number of requests"),
            &SERVICE_LABELS,
        )
        .map_err(metrics_error)?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("throome_request_duration_seconds", "Request duration in seconds")
                .buckets(DEFAULT_BUCKETS.to_vec()),
            &SERVICE_LABELS,
        )
        .map_err(metrics_error)?;
        let errors_total = IntCounterVec::new(
            opts!("throome_errors_total", "Total number of errors"),
            &ERROR_LABELS,
        )
        .map_err(metrics_error)?;
        let active_connections = IntGaugeVec::new(
            opts!("throome_active_connections", "Number of active connections"),
            &SERVICE_LABELS,
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(requests_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(request_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(errors_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(active_connections.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            errors_total,
            active_connections,
            clusters: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count one request served by `service`; `error` marks it failed
    pub fn record_request(
        &self,
        cluster_id: &str,
        service: &str,
        service_type: &str,
        latency: Duration,
        error: Option<&ThroomError>,
    ) {
        let labels = [cluster_id, service, service_type];
        self.requests_total.with_label_values(&labels).inc();
        self.request_duration
            .with_label_values(&labels)
            .observe(latency.as_secs_f64());
        if let Some(error) = error {
            self.errors_total
                .with_label_values(&[cluster_id, service, service_type, error.kind()])
                .inc();
        }

        let mut clusters = self.clusters.write().unwrap_or_else(|e| e.into_inner());
        let cluster = clusters
            .entry(cluster_id.to_string())
            .or_insert_with(|| ClusterMetrics::new(cluster_id));
        cluster.service(service, service_type).record(latency, error);

        cluster.total_requests += 1;
        if error.is_some() {
            cluster.failed_requests += 1;
        }
        cluster.average_latency =
            rolling_average(cluster.average_latency, latency, cluster.total_requests);
        cluster.last_updated = SystemTime::now();
    }

    /// Count an error that happened outside a served request, such as a
    /// routing failure
    pub fn record_error(&self, cluster_id: &str, service: &str, service_type: &str, error_type: &str) {
        self.errors_total
            .with_label_values(&[cluster_id, service, service_type, error_type])
            .inc();
    }

    pub fn set_active_connections(&self, cluster_id: &str, service: &str, service_type: &str, count: u64) {
        self.active_connections
            .with_label_values(&[cluster_id, service, service_type])
            .set(i64::try_from(count).unwrap_or(i64::MAX));

        let mut clusters = self.clusters.write().unwrap_or_else(|e| e.into_inner());
        clusters
            .entry(cluster_id.to_string())
            .or_insert_with(|| ClusterMetrics::new(cluster_id))
            .service(service, service_type)
            .active_connections = count;
    }

    pub fn record_health(&self, cluster_id: &str, service: &str, service_type: &str, status: &HealthStatus) {
        let mut clusters = self.clusters.write().unwrap_or_else(|e| e.into_inner());
        clusters
            .entry(cluster_id.to_string())
            .or_insert_with(|| ClusterMetrics::new(cluster_id))
            .service(service, service_type)
            .healthy = Some(status.healthy);
    }

    /// Fold one health round of `router` in: connection gauges for every
    /// registered handle and the health outcome of each checked one
    pub async fn record_health_round(&self, router: &Router, results: &BTreeMap<String, HealthStatus>) {
        let cluster_id = router.cluster_id();
        for (service, handle) in router.list_adapters().await {
            let service_type = handle.adapter_type();
            self.set_active_connections(
                cluster_id,
                &service,
                service_type,
                handle.metrics().active_connections,
            );
            if let Some(status) = results.get(&service) {
                self.record_health(cluster_id, &service, service_type, status);
            }
        }
    }

    pub fn cluster_metrics(&self, cluster_id: &str) -> Option<ClusterMetrics> {
        self.clusters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(cluster_id)
            .cloned()
    }

    pub fn service_metrics(&self, cluster_id: &str, service: &str) -> Option<ServiceMetrics> {
        self.clusters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(cluster_id)
            .and_then(|cluster| cluster.services.get(service))
            .cloned()
    }

    pub fn all_metrics(&self) -> BTreeMap<String, ClusterMetrics> {
        self.clusters.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drop a cluster's summary and its connection gauges
    pub fn forget_cluster(&self, cluster_id: &str) {
        let removed = self
            .clusters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(cluster_id);

        for service in removed.iter().flat_map(|cluster| cluster.services.values()) {
            // the gauge only exists once a health round has set it
            let _ = self.active_connections.remove_label_values(&[
                cluster_id,
                &service.service,
                &service.service_type,
            ]);
        }
    }

    /// Drop every summary; Prometheus counters keep their totals
    pub fn clear(&self) {
        self.clusters.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn gather_text(&self) -> ThroomResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| ThroomError::internal(e.to_string()))
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clusters = self.clusters.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MetricsCollector")
            .field("clusters", &clusters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
