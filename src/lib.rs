/// Throome - a gateway control plane for cache, database and queue backends
///
/// A gateway owns one [`Router`] per cluster. Each router keeps a registry
/// of named backend handles built by the [`AdapterFactory`] and picks one
/// per request with a pluggable [`Strategy`]. Health checks run on demand
/// through the router or periodically through the [`HealthMonitor`], and
/// requests routed through [`Gateway::execute`] are retried and counted in
/// the gateway's [`MetricsCollector`].
pub mod adapter;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod retry;
pub mod router;
pub mod strategy;
pub mod utils;

pub use adapter::{
    Adapter, AdapterFactory, AdapterHandle, CacheAdapter, Capability, DatabaseAdapter, Metrics,
    QueueAdapter,
};
pub use config::{ClusterConfig, Config, ConfigError, ServiceConfig};
pub use error::{ThroomError, ThroomResult};
pub use gateway::Gateway;
pub use health::{HealthMonitor, HealthStatus, MetricsCollector};
pub use retry::{retry, retry_until, retry_with, RetryConfig};
pub use router::Router;
pub use strategy::{create_strategy, Strategy, StrategyKind};
