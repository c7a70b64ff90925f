/// Backend adapters: the capability contract every backend handle implements
///
/// A handle exposes a shared base contract ([`Adapter`]) plus exactly one
/// operation surface: [`DatabaseAdapter`], [`CacheAdapter`] or
/// [`QueueAdapter`]. The router and the strategies only ever touch the base
/// contract through [`AdapterHandle`].
pub mod base;
pub mod factory;
pub mod memory;
pub mod metrics;
pub mod redis;
pub mod resp;

pub use base::AdapterCore;
pub use factory::{AdapterConstructor, AdapterFactory};
pub use metrics::{Metrics, MetricsTracker};

use crate::config::ServiceConfig;
use crate::error::{ThroomError, ThroomResult};
use crate::health::HealthStatus;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Operation surface a handle exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Database,
    Cache,
    Queue,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Database => "database",
            Capability::Cache => "cache",
            Capability::Queue => "queue",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ThroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "database" | "db" => Ok(Capability::Database),
            "cache" => Ok(Capability::Cache),
            "queue" => Ok(Capability::Queue),
            other => Err(ThroomError::invalid_operation(format!(
                "unknown capability: {}",
                other
            ))),
        }
    }
}

/// Base contract shared by all backend handles
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Establish the connection, giving up after `timeout`
    async fn connect(&self, timeout: Duration) -> ThroomResult<()>;

    async fn disconnect(&self) -> ThroomResult<()>;

    /// Lightweight liveness check
    async fn ping(&self) -> ThroomResult<()>;

    /// Active check that also stamps the handle's health status.
    ///
    /// An unreachable backend is reported through the returned status;
    /// `Err` is reserved for checks that could not run at all.
    async fn health_check(&self) -> ThroomResult<HealthStatus>;

    /// Status for a check that crashed or timed out. Adapters that track
    /// health override this so the failure counts toward their streak.
    fn health_check_failed(&self, reason: String, response_time: Duration) -> HealthStatus {
        HealthStatus::failed(reason, response_time)
    }

    /// Backend type identifier, e.g. `redis`
    fn adapter_type(&self) -> &str;

    fn metrics(&self) -> Metrics;

    fn is_connected(&self) -> bool;

    fn config(&self) -> &ServiceConfig;
}

/// A single dynamically-typed column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
}

/// One result row with named columns
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Outcome of a statement that does not return rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// An open database transaction.
///
/// Dropping a transaction without committing leaves cleanup to the
/// backend; callers should `rollback` explicitly.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, statement: &str, args: &[Value]) -> ThroomResult<ExecResult>;

    async fn query(&mut self, statement: &str, args: &[Value]) -> ThroomResult<Vec<Row>>;

    async fn commit(self: Box<Self>) -> ThroomResult<()>;

    async fn rollback(self: Box<Self>) -> ThroomResult<()>;
}

/// Relational database surface
#[async_trait]
pub trait DatabaseAdapter: Adapter {
    async fn execute(&self, statement: &str, args: &[Value]) -> ThroomResult<ExecResult>;

    async fn query(&self, statement: &str, args: &[Value]) -> ThroomResult<Vec<Row>>;

    /// First row of `query`, if any
    async fn query_row(&self, statement: &str, args: &[Value]) -> ThroomResult<Option<Row>> {
        Ok(self.query(statement, args).await?.into_iter().next())
    }

    async fn begin(&self) -> ThroomResult<Box<dyn Transaction>>;
}

/// Remaining lifetime of a cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without expiry
    Persistent,
    Expires(Duration),
}

/// Key/value cache surface
#[async_trait]
pub trait CacheAdapter: Adapter {
    /// `None` when the key is absent
    async fn get(&self, key: &str) -> ThroomResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ThroomResult<()>;

    /// Returns whether a key was removed
    async fn delete(&self, key: &str) -> ThroomResult<bool>;

    async fn exists(&self, key: &str) -> ThroomResult<bool>;

    /// Keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> ThroomResult<Vec<String>>;

    async fn ttl(&self, key: &str) -> ThroomResult<KeyTtl>;

    /// Returns whether the key existed
    async fn expire(&self, key: &str, ttl: Duration) -> ThroomResult<bool>;
}

/// A delivered queue message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub headers: BTreeMap<String, String>,
    pub timestamp: SystemTime,
    pub offset: u64,
}

/// Callback invoked on the adapter's delivery task for each message
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ThroomResult<()>> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ThroomResult<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Topic creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicOptions {
    pub partitions: u32,
    pub replication_factor: u16,
    pub retention: Option<Duration>,
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            partitions: 1,
            replication_factor: 1,
            retention: None,
        }
    }
}

/// Publish/subscribe queue surface
#[async_trait]
pub trait QueueAdapter: Adapter {
    async fn publish(&self, topic: &str, payload: Bytes) -> ThroomResult<()>;

    /// Register `handler` for `topic`; deliveries run on a separate task
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> ThroomResult<()>;

    async fn unsubscribe(&self, topic: &str) -> ThroomResult<()>;

    async fn create_topic(&self, topic: &str, options: TopicOptions) -> ThroomResult<()>;

    async fn delete_topic(&self, topic: &str) -> ThroomResult<()>;

    async fn list_topics(&self) -> ThroomResult<Vec<String>>;
}

/// A registered backend handle, tagged by capability
#[derive(Clone)]
pub enum AdapterHandle {
    Database(Arc<dyn DatabaseAdapter>),
    Cache(Arc<dyn CacheAdapter>),
    Queue(Arc<dyn QueueAdapter>),
}

macro_rules! with_adapter {
    ($handle:expr, $adapter:ident => $body:expr) => {
        match $handle {
            AdapterHandle::Database($adapter) => $body,
            AdapterHandle::Cache($adapter) => $body,
            AdapterHandle::Queue($adapter) => $body,
        }
    };
}

impl AdapterHandle {
    pub fn database<A: DatabaseAdapter + 'static>(adapter: A) -> Self {
        AdapterHandle::Database(Arc::new(adapter))
    }

    pub fn cache<A: CacheAdapter + 'static>(adapter: A) -> Self {
        AdapterHandle::Cache(Arc::new(adapter))
    }

    pub fn queue<A: QueueAdapter + 'static>(adapter: A) -> Self {
        AdapterHandle::Queue(Arc::new(adapter))
    }

    pub fn capability(&self) -> Capability {
        match self {
            AdapterHandle::Database(_) => Capability::Database,
            AdapterHandle::Cache(_) => Capability::Cache,
            AdapterHandle::Queue(_) => Capability::Queue,
        }
    }

    pub async fn connect(&self, timeout: Duration) -> ThroomResult<()> {
        with_adapter!(self, a => a.connect(timeout).await)
    }

    pub async fn disconnect(&self) -> ThroomResult<()> {
        with_adapter!(self, a => a.disconnect().await)
    }

    pub async fn ping(&self) -> ThroomResult<()> {
        with_adapter!(self, a => a.ping().await)
    }

    pub async fn health_check(&self) -> ThroomResult<HealthStatus> {
        with_adapter!(self, a => a.health_check().await)
    }

    pub fn health_check_failed(&self, reason: String, response_time: Duration) -> HealthStatus {
        with_adapter!(self, a => a.health_check_failed(reason, response_time))
    }

    pub fn adapter_type(&self) -> &str {
        with_adapter!(self, a => a.adapter_type())
    }

    pub fn metrics(&self) -> Metrics {
        with_adapter!(self, a => a.metrics())
    }

    pub fn is_connected(&self) -> bool {
        with_adapter!(self, a => a.is_connected())
    }

    pub fn config(&self) -> &ServiceConfig {
        with_adapter!(self, a => a.config())
    }

    pub fn as_database(&self) -> ThroomResult<&Arc<dyn DatabaseAdapter>> {
        match self {
            AdapterHandle::Database(a) => Ok(a),
            other => Err(other.capability_mismatch(Capability::Database)),
        }
    }

    pub fn as_cache(&self) -> ThroomResult<&Arc<dyn CacheAdapter>> {
        match self {
            AdapterHandle::Cache(a) => Ok(a),
            other => Err(other.capability_mismatch(Capability::Cache)),
        }
    }

    pub fn as_queue(&self) -> ThroomResult<&Arc<dyn QueueAdapter>> {
        match self {
            AdapterHandle::Queue(a) => Ok(a),
            other => Err(other.capability_mismatch(Capability::Queue)),
        }
    }

    /// Whether both handles refer to the same adapter instance
    pub fn same_adapter(&self, other: &AdapterHandle) -> bool {
        match (self, other) {
            (AdapterHandle::Database(a), AdapterHandle::Database(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (AdapterHandle::Cache(a), AdapterHandle::Cache(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (AdapterHandle::Queue(a), AdapterHandle::Queue(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }

    fn capability_mismatch(&self, wanted: Capability) -> ThroomError {
        ThroomError::invalid_operation(format!(
            "{} adapter exposes the {} capability, not {}",
            self.adapter_type(),
            self.capability(),
            wanted
        ))
    }
}

impl fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("capability", &self.capability())
            .field("type", &self.adapter_type())
            .field("address", &self.config().address())
            .field("connected", &self.is_connected())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{StubCache, StubDatabase};
    use super::*;

    #[test]
    fn test_capability_parse_and_display() {
        assert_eq!("cache".parse::<Capability>().unwrap(), Capability::Cache);
        assert_eq!("DB".parse::<Capability>().unwrap(), Capability::Database);
        assert_eq!(Capability::Queue.to_string(), "queue");
        assert!("blob".parse::<Capability>().is_err());
    }

    #[test]
    fn test_handle_capability_accessors() {
        let handle = AdapterHandle::cache(StubCache::connected("redis"));
        assert_eq!(handle.capability(), Capability::Cache);
        assert_eq!(handle.adapter_type(), "redis");
        assert!(handle.is_connected());
        assert!(handle.as_cache().is_ok());

        let err = handle.as_queue().err().unwrap();
        assert!(matches!(err, ThroomError::InvalidOperation { .. }));
        assert!(err.to_string().contains("cache capability"));
    }

    #[test]
    fn test_same_adapter() {
        let a = AdapterHandle::cache(StubCache::connected("redis"));
        let b = AdapterHandle::cache(StubCache::connected("redis"));
        assert!(a.same_adapter(&a.clone()));
        assert!(!a.same_adapter(&b));
    }

    #[tokio::test]
    async fn test_handle_delegates_lifecycle() {
        let handle = AdapterHandle::cache(StubCache::new("redis"));
        assert!(!handle.is_connected());

        handle.connect(Duration::from_secs(1)).await.unwrap();
        assert!(handle.is_connected());
        assert_eq!(handle.metrics().total_connections, 1);

        let status = handle.health_check().await.unwrap();
        assert!(status.healthy);

        handle.disconnect().await.unwrap();
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_database_surface() {
        let handle = AdapterHandle::database(StubDatabase::connected());
        let db = handle.as_database().unwrap();

        let row = db.query_row("SELECT id, name FROM users WHERE id = $1", &[Value::Int(9)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("id"), Some(&Value::Int(9)));
        assert_eq!(row.get("name"), Some(&Value::Text("ada".to_string())));
        assert_eq!(row.get("missing"), None);

        let result = db.execute("DELETE FROM users", &[]).await.unwrap();
        assert_eq!(result.last_insert_id, Some(42));

        let mut tx = db.begin().await.unwrap();
        assert_eq!(tx.execute("INSERT", &[]).await.unwrap().rows_affected, 1);
        tx.commit().await.unwrap();

        assert_eq!(handle.metrics().total_requests, 2);
    }
}
