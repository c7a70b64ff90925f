/// Periodic health monitoring across every loaded cluster
use super::HealthStatus;
use crate::config::HealthConfig;
use crate::gateway::Gateway;
use crate::router::Router;
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Statuses kept per service
pub const HISTORY_LIMIT: usize = 100;

/// Rolling record of one service's health checks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthHistory {
    pub total_checks: u64,
    pub failed_checks: u64,
    pub consecutive_fails: u32,
    pub consecutive_successes: u32,
    pub last_healthy: Option<SystemTime>,
    pub last_unhealthy: Option<SystemTime>,
    /// Most recent statuses, oldest first
    pub recent: VecDeque<HealthStatus>,
}

impl HealthHistory {
    fn record(&mut self, status: &HealthStatus) {
        self.total_checks += 1;

        if status.healthy {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_fails = 0;
            self.last_healthy = Some(status.last_checked);
        } else {
            self.consecutive_fails = self.consecutive_fails.saturating_add(1);
            self.consecutive_successes = 0;
            self.failed_checks += 1;
            self.last_unhealthy = Some(status.last_checked);
        }

        if self.recent.len() == HISTORY_LIMIT {
            self.recent.pop_front();
        }
        self.recent.push_back(status.clone());
    }

    /// Percentage of checks that passed, 100 before the first check
    pub fn availability(&self) -> f64 {
        if self.total_checks == 0 {
            return 100.0;
        }
        (self.total_checks - self.failed_checks) as f64 / self.total_checks as f64 * 100.0
    }
}

/// Runs aggregate health checks on an interval and keeps per-service
/// histories keyed by cluster and service name
#[derive(Debug)]
pub struct HealthMonitor {
    interval: Duration,
    timeout: Duration,
    failure_threshold: u32,
    histories: RwLock<BTreeMap<String, BTreeMap<String, HealthHistory>>>,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            interval: config.interval().max(Duration::from_secs(1)),
            timeout: config.timeout(),
            failure_threshold: config.failure_threshold.max(1),
            histories: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Check every handle of `router` once and record the outcomes
    pub async fn check_router(&self, router: &Router) -> BTreeMap<String, HealthStatus> {
        let results = router.health_check_all_with_timeout(self.timeout).await;
        for (service, status) in &results {
            self.record(router.cluster_id(), service, status);
        }
        results
    }

    /// Fold one status into the service's history
    pub fn record(&self, cluster: &str, service: &str, status: &HealthStatus) {
        let mut histories = self.histories.write().unwrap_or_else(|e| e.into_inner());
        let history = histories
            .entry(cluster.to_string())
            .or_default()
            .entry(service.to_string())
            .or_default();
        history.record(status);

        if !status.healthy && history.consecutive_fails >= self.failure_threshold {
            tracing::warn!(
                cluster = %cluster,
                service = %service,
                consecutive_fails = history.consecutive_fails,
                "Service unhealthy threshold exceeded: {}",
                status
            );
        } else if status.healthy && history.consecutive_successes == 1 && history.total_checks > 1 {
            tracing::info!(cluster = %cluster, service = %service, "Service recovered");
        }
    }

    pub fn history(&self, cluster: &str, service: &str) -> Option<HealthHistory> {
        self.histories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(cluster)
            .and_then(|services| services.get(service))
            .cloned()
    }

    /// Histories of every service in `cluster`
    pub fn cluster_histories(&self, cluster: &str) -> BTreeMap<String, HealthHistory> {
        self.histories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(cluster)
            .cloned()
            .unwrap_or_default()
    }

    /// Below the failure threshold; services never checked count as healthy
    pub fn is_healthy(&self, cluster: &str, service: &str) -> bool {
        self.history(cluster, service)
            .map_or(true, |h| h.consecutive_fails < self.failure_threshold)
    }

    pub fn forget_cluster(&self, cluster: &str) {
        self.histories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(cluster);
    }

    /// Check all of `gateway`'s clusters every interval until `shutdown`
    /// flips to true or its sender is dropped
    pub async fn run(&self, gateway: &Gateway, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.interval, "Health monitor started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    for router in gateway.routers().await {
                        let results = self.check_router(&router).await;
                        gateway.collector().record_health_round(&router, &results).await;
                        let unhealthy = results.values().filter(|s| !s.healthy).count();
                        tracing::debug!(
                            cluster = %router.cluster_id(),
                            checked = results.len(),
                            unhealthy,
                            "Health check round complete"
                        );
                    }
                }
            }
        }

        tracing::info!("Health monitor stopped");
    }
}
