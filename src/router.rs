/// Per-cluster routing: registry, strategy and aggregate health
use crate::adapter::{AdapterHandle, Capability};
use crate::config::ClusterConfig;
use crate::error::{ThroomError, ThroomResult};
use crate::health::HealthStatus;
use crate::strategy::{create_strategy, Strategy};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct RouterState {
    registry: BTreeMap<String, AdapterHandle>,
    strategy: Arc<dyn Strategy>,
}

/// Routes requests for one cluster to its registered adapter handles.
///
/// Lookups take the read lock only long enough to clone the candidate
/// handles and the strategy; selection and all network I/O happen after
/// the lock is released.
pub struct Router {
    cluster: ClusterConfig,
    state: RwLock<RouterState>,
}

impl Router {
    /// Router over `adapters`, using the cluster's configured strategy
    pub fn new(cluster: ClusterConfig, adapters: BTreeMap<String, AdapterHandle>) -> Self {
        let strategy = create_strategy(&cluster.routing.strategy);
        tracing::info!(
            cluster = %cluster.cluster_id,
            adapters = adapters.len(),
            strategy = strategy.name(),
            "Router created"
        );

        Self {
            cluster,
            state: RwLock::new(RouterState {
                registry: adapters,
                strategy,
            }),
        }
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster.cluster_id
    }

    /// Direct lookup by service name, connected or not
    pub async fn get_adapter(&self, service: &str) -> ThroomResult<AdapterHandle> {
        self.state
            .read()
            .await
            .registry
            .get(service)
            .cloned()
            .ok_or_else(|| ThroomError::service_not_found(service))
    }

    /// Pick a connected handle exposing `capability`.
    ///
    /// A named request bypasses the strategy and must name a present,
    /// connected handle.
    pub async fn route(
        &self,
        capability: Capability,
        service: Option<&str>,
    ) -> ThroomResult<AdapterHandle> {
        self.route_entry(capability, service)
            .await
            .map(|(_, handle)| handle)
    }

    /// Like [`Router::route`], also returning the selected service's name
    pub async fn route_entry(
        &self,
        capability: Capability,
        service: Option<&str>,
    ) -> ThroomResult<(String, AdapterHandle)> {
        self.route_matching(capability.as_str(), service, |h| h.capability() == capability)
            .await
    }

    /// Like [`Router::route`], filtering on the backend type (`redis`, ...)
    pub async fn route_type(
        &self,
        service_type: &str,
        service: Option<&str>,
    ) -> ThroomResult<AdapterHandle> {
        self.route_matching(service_type, service, |h| h.adapter_type() == service_type)
            .await
            .map(|(_, handle)| handle)
    }

    async fn route_matching<F>(
        &self,
        wanted: &str,
        service: Option<&str>,
        accept: F,
    ) -> ThroomResult<(String, AdapterHandle)>
    where
        F: Fn(&AdapterHandle) -> bool,
    {
        let (names, candidates, strategy) = {
            let state = self.state.read().await;

            if let Some(name) = service.filter(|name| !name.is_empty()) {
                return match state.registry.get(name) {
                    Some(handle) if handle.is_connected() => Ok((name.to_string(), handle.clone())),
                    _ => Err(ThroomError::service_unavailable(name)),
                };
            }

            let (names, candidates): (Vec<String>, Vec<AdapterHandle>) = state
                .registry
                .iter()
                .filter(|(_, h)| h.is_connected() && accept(h))
                .map(|(name, h)| (name.clone(), h.clone()))
                .unzip();
            (names, candidates, state.strategy.clone())
        };

        if candidates.is_empty() {
            return Err(ThroomError::no_available_adapters(wanted));
        }

        let selected = strategy.select(&candidates)?;
        tracing::debug!(
            cluster = %self.cluster.cluster_id,
            wanted,
            strategy = strategy.name(),
            address = %selected.config().address(),
            "Routed request"
        );

        let name = candidates
            .iter()
            .zip(names)
            .find(|(h, _)| h.same_adapter(&selected))
            .map(|(_, name)| name)
            .unwrap_or_default();
        Ok((name, selected))
    }

    /// Register `handle` under `name`, returning any handle it replaced
    pub async fn add_adapter<S: Into<String>>(
        &self,
        name: S,
        handle: AdapterHandle,
    ) -> Option<AdapterHandle> {
        let name = name.into();
        tracing::info!(
            cluster = %self.cluster.cluster_id,
            service = %name,
            adapter_type = %handle.adapter_type(),
            "Adapter added"
        );
        self.state.write().await.registry.insert(name, handle)
    }

    /// Unregister `name`. The handle is returned still connected; the
    /// caller decides when to disconnect it.
    pub async fn remove_adapter(&self, name: &str) -> Option<AdapterHandle> {
        let removed = self.state.write().await.registry.remove(name);
        if removed.is_some() {
            tracing::info!(cluster = %self.cluster.cluster_id, service = %name, "Adapter removed");
        }
        removed
    }

    /// Snapshot of the registry
    pub async fn list_adapters(&self) -> BTreeMap<String, AdapterHandle> {
        self.state.read().await.registry.clone()
    }

    /// Swap the active strategy; unknown names fall back to round-robin
    pub async fn set_strategy(&self, name: &str) {
        let strategy = create_strategy(name);
        tracing::info!(
            cluster = %self.cluster.cluster_id,
            strategy = strategy.name(),
            "Routing strategy updated"
        );
        self.state.write().await.strategy = strategy;
    }

    pub async fn strategy_name(&self) -> &'static str {
        self.state.read().await.strategy.name()
    }

    /// Health of every registered handle, each check bounded by the
    /// cluster's health timeout
    pub async fn health_check_all(&self) -> BTreeMap<String, HealthStatus> {
        self.health_check_all_with_timeout(self.cluster.health_timeout())
            .await
    }

    /// Run all checks concurrently. A failed or timed-out check becomes an
    /// unhealthy entry for that handle, counted in its own failure streak,
    /// and never affects the others.
    pub async fn health_check_all_with_timeout(
        &self,
        per_check: Duration,
    ) -> BTreeMap<String, HealthStatus> {
        let registry = self.list_adapters().await;

        let checks = registry.into_iter().map(|(name, handle)| async move {
            let started = Instant::now();
            let status = match tokio::time::timeout(per_check, handle.health_check()).await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => handle.health_check_failed(e.to_string(), started.elapsed()),
                Err(_) => handle.health_check_failed(
                    format!("health check timed out after {:?}", per_check),
                    started.elapsed(),
                ),
            };
            (name, status)
        });

        join_all(checks).await.into_iter().collect()
    }

    /// Disconnect every handle and empty the registry
    pub async fn shutdown(&self) {
        let registry = std::mem::take(&mut self.state.write().await.registry);

        let disconnects = registry.iter().map(|(name, handle)| async move {
            if let Err(e) = handle.disconnect().await {
                tracing::warn!(service = %name, "Failed to disconnect adapter: {}", e);
            }
        });
        join_all(disconnects).await;

        tracing::info!(
            cluster = %self.cluster.cluster_id,
            adapters = registry.len(),
            "Router shut down"
        );
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("cluster_id", &self.cluster.cluster_id)
            .field("strategy", &self.cluster.routing.strategy)
            .finish_non_exhaustive()
    }
}
