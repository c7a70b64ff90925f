/// Multi-cluster gateway: one router per loaded cluster
use crate::adapter::{AdapterFactory, AdapterHandle, Capability};
use crate::config::{ClusterConfig, Config, ConfigError};
use crate::error::{ThroomError, ThroomResult};
use crate::health::{HealthMonitor, MetricsCollector};
use crate::retry::{retry, RetryConfig};
use crate::router::Router;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Owns the adapter factory, every cluster's router, the health monitor
/// and the request metrics
pub struct Gateway {
    factory: AdapterFactory,
    routers: RwLock<BTreeMap<String, Arc<Router>>>,
    monitor: Arc<HealthMonitor>,
    collector: Arc<MetricsCollector>,
    retry: RetryConfig,
    connect_timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl Gateway {
    pub fn new(config: &Config, factory: AdapterFactory) -> ThroomResult<Self> {
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            factory,
            routers: RwLock::new(BTreeMap::new()),
            monitor: Arc::new(HealthMonitor::new(&config.health)),
            collector: Arc::new(MetricsCollector::new()?),
            retry: config.retry,
            connect_timeout: config.gateway.connect_timeout(),
            shutdown,
        })
    }

    pub fn factory(&self) -> &AdapterFactory {
        &self.factory
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    /// Policy [`Gateway::execute`] retries routed requests with
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Build and connect every service of `cluster`, then publish its router.
    ///
    /// Services whose type is not registered or whose connect fails are
    /// logged and left out; the cluster still loads with the rest. Loading a
    /// cluster id that already exists replaces and shuts down the old router.
    pub async fn load_cluster(&self, cluster: ClusterConfig) -> ThroomResult<Arc<Router>> {
        cluster.validate()?;
        let cluster_id = cluster.cluster_id.clone();
        tracing::info!(cluster = %cluster_id, name = %cluster.name, "Initializing cluster");

        let id = cluster_id.as_str();
        let connects = cluster.services.iter().map(|(name, service)| async move {
            let handle = match self.factory.create(service) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!(cluster = %id, service = %name, "Failed to create adapter: {}", e);
                    return None;
                }
            };

            match handle.connect(self.connect_timeout).await {
                Ok(()) => {
                    tracing::info!(
                        cluster = %id,
                        service = %name,
                        adapter_type = %service.service_type,
                        "Connected to service"
                    );
                    Some((name.clone(), handle))
                }
                Err(e) => {
                    tracing::error!(cluster = %id, service = %name, "Failed to connect adapter: {}", e);
                    None
                }
            }
        });

        let adapters: BTreeMap<String, AdapterHandle> =
            join_all(connects).await.into_iter().flatten().collect();
        if adapters.len() < cluster.services.len() {
            tracing::warn!(
                cluster = %cluster_id,
                connected = adapters.len(),
                configured = cluster.services.len(),
                "Cluster loaded with missing services"
            );
        }

        let router = Arc::new(Router::new(cluster, adapters));
        let previous = self
            .routers
            .write()
            .await
            .insert(cluster_id.clone(), router.clone());

        if let Some(previous) = previous {
            tracing::info!(cluster = %cluster_id, "Replacing previously loaded cluster");
            previous.shutdown().await;
        }

        Ok(router)
    }

    /// Load every `*.toml` cluster document in `dir`, in file name order.
    ///
    /// A document that fails to parse or validate is logged and skipped.
    pub async fn load_dir<P: AsRef<Path>>(&self, dir: P) -> ThroomResult<Vec<String>> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        let io_error = |e: std::io::Error| ConfigError::IoError(format!("{}: {}", dir.display(), e));
        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            let cluster = match ClusterConfig::load_from_file(&path) {
                Ok(cluster) => cluster,
                Err(e) => {
                    tracing::error!(path = %path.display(), "Skipping cluster file: {}", e);
                    continue;
                }
            };
            let router = self.load_cluster(cluster).await?;
            loaded.push(router.cluster_id().to_string());
        }

        tracing::info!(dir = %dir.display(), count = loaded.len(), "Loaded clusters");
        Ok(loaded)
    }

    pub async fn router(&self, cluster_id: &str) -> ThroomResult<Arc<Router>> {
        self.routers
            .read()
            .await
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| ThroomError::cluster_not_found(cluster_id))
    }

    /// Direct lookup of a service handle inside a cluster
    pub async fn get_adapter(&self, cluster_id: &str, service: &str) -> ThroomResult<AdapterHandle> {
        self.router(cluster_id).await?.get_adapter(service).await
    }

    /// Route a request for `capability` in `cluster_id` and run `op` on the
    /// selected handle, retrying transient failures under the gateway's
    /// retry policy.
    ///
    /// Each attempt routes afresh, so a retry may land on another service.
    /// Every attempt is counted in the collector under the service that
    /// served it; routing failures are counted as errors.
    pub async fn execute<T, F, Fut>(
        &self,
        cluster_id: &str,
        capability: Capability,
        service: Option<&str>,
        op: F,
    ) -> ThroomResult<T>
    where
        F: Fn(AdapterHandle) -> Fut,
        Fut: Future<Output = ThroomResult<T>>,
    {
        let router = self.router(cluster_id).await?;
        let router = router.as_ref();
        let op = &op;
        retry(&self.retry, move || self.attempt(router, capability, service, op)).await
    }

    async fn attempt<T, F, Fut>(
        &self,
        router: &Router,
        capability: Capability,
        service: Option<&str>,
        op: &F,
    ) -> ThroomResult<T>
    where
        F: Fn(AdapterHandle) -> Fut,
        Fut: Future<Output = ThroomResult<T>>,
    {
        let (name, handle) = match router.route_entry(capability, service).await {
            Ok(entry) => entry,
            Err(e) => {
                self.collector.record_error(
                    router.cluster_id(),
                    service.unwrap_or("none"),
                    capability.as_str(),
                    e.kind(),
                );
                return Err(e);
            }
        };

        let service_type = handle.adapter_type().to_string();
        let started = Instant::now();
        let result = op(handle).await;
        self.collector.record_request(
            router.cluster_id(),
            &name,
            &service_type,
            started.elapsed(),
            result.as_ref().err(),
        );
        result
    }

    pub async fn routers(&self) -> Vec<Arc<Router>> {
        self.routers.read().await.values().cloned().collect()
    }

    /// Loaded cluster ids, sorted
    pub async fn cluster_ids(&self) -> Vec<String> {
        self.routers.read().await.keys().cloned().collect()
    }

    /// Unload a cluster, disconnecting all of its adapters
    pub async fn remove_cluster(&self, cluster_id: &str) -> ThroomResult<()> {
        let router = self
            .routers
            .write()
            .await
            .remove(cluster_id)
            .ok_or_else(|| ThroomError::cluster_not_found(cluster_id))?;

        router.shutdown().await;
        self.monitor.forget_cluster(cluster_id);
        self.collector.forget_cluster(cluster_id);
        tracing::info!(cluster = %cluster_id, "Cluster removed");
        Ok(())
    }

    /// Start the periodic health monitor; it stops on [`Gateway::shutdown`]
    pub fn spawn_health_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let monitor = gateway.monitor.clone();
            monitor.run(&gateway, shutdown).await;
        })
    }

    /// Stop the health monitor and tear down every cluster
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down gateway");
        self.shutdown.send_replace(true);

        let routers = std::mem::take(&mut *self.routers.write().await);
        join_all(routers.values().map(|router| router.shutdown())).await;

        for cluster_id in routers.keys() {
            self.monitor.forget_cluster(cluster_id);
            self.collector.forget_cluster(cluster_id);
        }
        tracing::info!(clusters = routers.len(), "Gateway shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::StubCache;
    use crate::adapter::{Adapter, Capability};
    use crate::config::ServiceConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn demo_cluster(id: &str) -> ClusterConfig {
        ClusterConfig::new(id, "Demo")
            .with_service("cache-a", ServiceConfig::new("memory_cache", "localhost", 1))
            .with_service("cache-b", ServiceConfig::new("memory_cache", "localhost", 2))
            .with_service("events", ServiceConfig::new("memory_queue", "localhost", 3))
    }

    fn gateway() -> Gateway {
        Gateway::new(&Config::default(), AdapterFactory::with_builtin()).unwrap()
    }

    #[tokio::test]
    async fn test_load_cluster() {
        let gateway = gateway();
        let router = gateway.load_cluster(demo_cluster("demo")).await.unwrap();

        assert_eq!(router.list_adapters().await.len(), 3);
        assert!(router.list_adapters().await.values().all(|h| h.is_connected()));
        assert_eq!(gateway.cluster_ids().await, vec!["demo"]);

        let queue = router.route(Capability::Queue, None).await.unwrap();
        assert_eq!(queue.adapter_type(), "memory_queue");

        let handle = gateway.get_adapter("demo", "cache-b").await.unwrap();
        assert_eq!(handle.config().port, 2);

        let err = gateway.router("nope").await.unwrap_err();
        assert!(matches!(err, ThroomError::ClusterNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unregistered_and_failing_services_are_skipped() {
        let gateway = Gateway::new(&Config::default(), {
            let mut factory = AdapterFactory::with_builtin();
            factory.register("flaky", |config| {
                let stub = StubCache::from_config(config.clone());
                Ok(AdapterHandle::cache(stub))
            });
            factory
        })
        .unwrap();

        // nothing listens on this port
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cluster = demo_cluster("mixed")
            .with_service("db", ServiceConfig::new("postgres", "localhost", 5432))
            .with_service("redis", ServiceConfig::new("redis", "127.0.0.1", port))
            .with_service("stub", ServiceConfig::new("flaky", "localhost", 9));

        let router = gateway.load_cluster(cluster).await.unwrap();
        let names: Vec<String> = router.list_adapters().await.into_keys().collect();
        assert_eq!(names, vec!["cache-a", "cache-b", "events", "stub"]);
    }

    #[tokio::test]
    async fn test_invalid_cluster_is_rejected() {
        let gateway = gateway();
        let err = gateway
            .load_cluster(ClusterConfig::new("empty", "No services"))
            .await
            .unwrap_err();
        assert!(matches!(err, ThroomError::Config(_)));
        assert!(gateway.cluster_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_replaces_router() {
        let gateway = gateway();
        let first = gateway.load_cluster(demo_cluster("demo")).await.unwrap();
        let old_handle = first.get_adapter("cache-a").await.unwrap();

        let second = gateway.load_cluster(demo_cluster("demo")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!old_handle.is_connected());
        assert!(first.list_adapters().await.is_empty());
        assert_eq!(gateway.cluster_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_dir() {
        let dir = tempdir().unwrap();
        demo_cluster("b-cluster")
            .save_to_file(dir.path().join("b.toml"))
            .unwrap();
        demo_cluster("a-cluster")
            .save_to_file(dir.path().join("a.toml"))
            .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "cluster_id = ").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let gateway = gateway();
        let loaded = gateway.load_dir(dir.path()).await.unwrap();
        assert_eq!(loaded, vec!["a-cluster", "b-cluster"]);
        assert_eq!(gateway.cluster_ids().await, vec!["a-cluster", "b-cluster"]);

        assert!(gateway.load_dir(dir.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_cluster() {
        let gateway = gateway();
        let router = gateway.load_cluster(demo_cluster("demo")).await.unwrap();
        let handle = router.get_adapter("events").await.unwrap();

        gateway.remove_cluster("demo").await.unwrap();
        assert!(!handle.is_connected());
        assert!(gateway.router("demo").await.is_err());
        assert!(matches!(
            gateway.remove_cluster("demo").await,
            Err(ThroomError::ClusterNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_rounds_and_shutdown() {
        let mut factory = AdapterFactory::with_builtin();
        let down = Arc::new(StubCache::at("down"));
        down.healthy.store(false, Ordering::SeqCst);
        let shared = down.clone();
        factory.register("scripted", move |_config| Ok(AdapterHandle::Cache(shared.clone())));

        let gateway = Arc::new(Gateway::new(&Config::default(), factory).unwrap());
        let cluster = demo_cluster("demo")
            .with_service("down", ServiceConfig::new("scripted", "localhost", 4));
        gateway.load_cluster(cluster).await.unwrap();

        let monitor_task = gateway.spawn_health_monitor();
        let interval = gateway.monitor().interval();

        // three rounds reach the default failure threshold
        for _ in 0..3 {
            tokio::time::sleep(interval).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let monitor = gateway.monitor();
        let history = monitor.history("demo", "down").unwrap();
        assert_eq!(history.total_checks, 3);
        assert_eq!(history.consecutive_fails, 3);
        assert!(!monitor.is_healthy("demo", "down"));
        assert!(monitor.is_healthy("demo", "cache-a"));
        assert_eq!(monitor.history("demo", "cache-a").unwrap().failed_checks, 0);

        let collector = gateway.collector();
        assert_eq!(collector.service_metrics("demo", "down").unwrap().healthy, Some(false));
        assert_eq!(collector.service_metrics("demo", "cache-a").unwrap().healthy, Some(true));
        assert!(collector
            .gather_text()
            .unwrap()
            .contains(r#"throome_active_connections{cluster_id="demo",service="events",type="memory_queue"} 0"#));

        gateway.shutdown().await;
        monitor_task.await.unwrap();
        assert!(gateway.cluster_ids().await.is_empty());
        assert!(!down.is_connected());
        assert!(collector.cluster_metrics("demo").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_transient_failures() {
        let mut config = Config::default();
        config.retry = RetryConfig::new(3, Duration::from_millis(10), Duration::from_millis(50), 2.0);
        let gateway = Gateway::new(&config, AdapterFactory::with_builtin()).unwrap();
        assert_eq!(gateway.retry_config(), &config.retry);
        gateway.load_cluster(demo_cluster("demo")).await.unwrap();

        let attempts = AtomicU32::new(0);
        let value = gateway
            .execute("demo", Capability::Cache, Some("cache-a"), |handle| {
                let attempts = &attempts;
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(ThroomError::connection_failed("connection reset"));
                    }
                    let cache = handle.as_cache()?;
                    cache.set("greeting", "hello", None).await?;
                    cache.get("greeting").await
                }
            })
            .await
            .unwrap();

        assert_eq!(value.as_deref(), Some("hello"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let metrics = gateway.collector().service_metrics("demo", "cache-a").unwrap();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.service_type, "memory_cache");
        assert!(gateway
            .collector()
            .gather_text()
            .unwrap()
            .contains(r#"error_type="connection_failed""#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_surfaces_permanent_failures() {
        let gateway = gateway();
        gateway.load_cluster(demo_cluster("demo")).await.unwrap();

        let attempts = AtomicU32::new(0);
        let err = gateway
            .execute("demo", Capability::Cache, None, |_handle| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ThroomError::backend("WRONGTYPE")) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ThroomError::Backend { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let err = gateway
            .execute("demo", Capability::Database, None, |_handle| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ThroomError::NoAvailableAdapters { .. }));
        assert!(gateway.collector().gather_text().unwrap().contains(
            r#"throome_errors_total{cluster_id="demo",error_type="no_available_adapters",service="none",type="database"} 1"#
        ));

        let err = gateway
            .execute("nope", Capability::Cache, None, |_handle| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ThroomError::ClusterNotFound { .. }));
    }
}
