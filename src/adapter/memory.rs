/// In-process cache and queue backends
///
/// Both adapters keep their state in the gateway process. They serve demo
/// clusters and tests, and behave like a real backend as far as the router
/// is concerned: they must be connected before use and report metrics and
/// health the same way.
use crate::adapter::base::AdapterCore;
use crate::adapter::{
    Adapter, CacheAdapter, KeyTtl, Message, MessageHandler, Metrics, QueueAdapter, TopicOptions,
};
use crate::config::ServiceConfig;
use crate::error::{ThroomError, ThroomResult};
use crate::health::HealthStatus;
use crate::utils::glob_match;
use async_trait::async_trait;
use bytes::Bytes;
use fnv::FnvHashMap;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Key/value cache held in a process-local map with lazy expiry
pub struct MemoryCache {
    core: AdapterCore,
    entries: Mutex<FnvHashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            core: AdapterCore::new(config),
            entries: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Run `f` against the live entries, evicting `key` first if it expired
    fn with_entries<T>(
        &self,
        key: Option<&str>,
        f: impl FnOnce(&mut FnvHashMap<String, Entry>) -> T,
    ) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match key {
            Some(key) => {
                if entries.get(key).is_some_and(|e| !e.is_live(now)) {
                    entries.remove(key);
                }
            }
            None => entries.retain(|_, e| e.is_live(now)),
        }
        f(&mut entries)
    }

    pub fn len(&self) -> usize {
        self.with_entries(None, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Adapter for MemoryCache {
    async fn connect(&self, _timeout: Duration) -> ThroomResult<()> {
        self.core.set_connected(true);
        tracing::debug!(address = %self.core.config().address(), "Memory cache ready");
        Ok(())
    }

    async fn disconnect(&self) -> ThroomResult<()> {
        self.core.set_connected(false);
        Ok(())
    }

    async fn ping(&self) -> ThroomResult<()> {
        self.core.ensure_connected()
    }

    async fn health_check(&self) -> ThroomResult<HealthStatus> {
        Ok(self.core.track_health(self.ping()).await)
    }

    fn health_check_failed(&self, reason: String, response_time: Duration) -> HealthStatus {
        self.core.health_failed(reason, response_time)
    }

    fn adapter_type(&self) -> &str {
        self.core.adapter_type()
    }

    fn metrics(&self) -> Metrics {
        self.core.metrics()
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    fn config(&self) -> &ServiceConfig {
        self.core.config()
    }
}

#[async_trait]
impl CacheAdapter for MemoryCache {
    async fn get(&self, key: &str) -> ThroomResult<Option<String>> {
        self.core.ensure_connected()?;
        self.core
            .observe("GET", async {
                Ok(self.with_entries(Some(key), |entries| {
                    entries.get(key).map(|e| e.value.clone())
                }))
            })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ThroomResult<()> {
        self.core.ensure_connected()?;
        self.core
            .observe("SET", async {
                let entry = Entry {
                    value: value.to_string(),
                    expires_at: ttl.filter(|t| !t.is_zero()).map(|t| Instant::now() + t),
                };
                self.with_entries(Some(key), |entries| {
                    entries.insert(key.to_string(), entry);
                });
                Ok(())
            })
            .await
    }

    async fn delete(&self, key: &str) -> ThroomResult<bool> {
        self.core.ensure_connected()?;
        self.core
            .observe("DEL", async {
                Ok(self.with_entries(Some(key), |entries| entries.remove(key).is_some()))
            })
            .await
    }

    async fn exists(&self, key: &str) -> ThroomResult<bool> {
        self.core.ensure_connected()?;
        self.core
            .observe("EXISTS", async {
                Ok(self.with_entries(Some(key), |entries| entries.contains_key(key)))
            })
            .await
    }

    async fn keys(&self, pattern: &str) -> ThroomResult<Vec<String>> {
        self.core.ensure_connected()?;
        self.core
            .observe("KEYS", async {
                let mut keys = self.with_entries(None, |entries| {
                    entries
                        .keys()
                        .filter(|k| glob_match(pattern, k))
                        .cloned()
                        .collect::<Vec<_>>()
                });
                keys.sort();
                Ok(keys)
            })
            .await
    }

    async fn ttl(&self, key: &str) -> ThroomResult<KeyTtl> {
        self.core.ensure_connected()?;
        self.core
            .observe("PTTL", async {
                let now = Instant::now();
                Ok(self.with_entries(Some(key), |entries| match entries.get(key) {
                    None => KeyTtl::Missing,
                    Some(Entry {
                        expires_at: None, ..
                    }) => KeyTtl::Persistent,
                    Some(Entry {
                        expires_at: Some(at),
                        ..
                    }) => KeyTtl::Expires(at.saturating_duration_since(now)),
                }))
            })
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> ThroomResult<bool> {
        self.core.ensure_connected()?;
        self.core
            .observe("PEXPIRE", async {
                Ok(self.with_entries(Some(key), |entries| match entries.get_mut(key) {
                    Some(entry) => {
                        entry.expires_at = Some(Instant::now() + ttl);
                        true
                    }
                    None => false,
                }))
            })
            .await
    }
}

struct Topic {
    sender: broadcast::Sender<Message>,
    next_offset: u64,
    options: TopicOptions,
}

impl Topic {
    fn new(capacity: usize, options: TopicOptions) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_offset: 0,
            options,
        }
    }
}

/// Publish/subscribe queue backed by per-topic broadcast channels.
///
/// Each subscription owns a delivery task; publishing never waits on
/// handlers. A subscriber that falls more than `options.capacity` messages
/// behind skips the overflow and logs it.
pub struct MemoryQueue {
    core: AdapterCore,
    capacity: usize,
    topics: Mutex<FnvHashMap<String, Topic>>,
    subscriptions: Mutex<FnvHashMap<String, Vec<JoinHandle<()>>>>,
}

impl MemoryQueue {
    pub fn new(config: ServiceConfig) -> Self {
        let capacity = config
            .option_u64("capacity")
            .and_then(|c| usize::try_from(c).ok())
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        Self {
            core: AdapterCore::new(config),
            capacity,
            topics: Mutex::new(FnvHashMap::default()),
            subscriptions: Mutex::new(FnvHashMap::default()),
        }
    }

    fn topics(&self) -> std::sync::MutexGuard<'_, FnvHashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscriptions(&self) -> std::sync::MutexGuard<'_, FnvHashMap<String, Vec<JoinHandle<()>>>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions()
            .get(topic)
            .map_or(0, |tasks| tasks.iter().filter(|t| !t.is_finished()).count())
    }

    /// Partition count the topic was created with
    pub fn topic_partitions(&self, topic: &str) -> Option<u32> {
        self.topics().get(topic).map(|t| t.options.partitions)
    }

    fn abort_subscriptions(&self, topic: Option<&str>) -> usize {
        let mut subscriptions = self.subscriptions();
        let tasks: Vec<JoinHandle<()>> = match topic {
            Some(topic) => subscriptions.remove(topic).unwrap_or_default(),
            None => subscriptions.drain().flat_map(|(_, tasks)| tasks).collect(),
        };
        for task in &tasks {
            task.abort();
        }
        tasks.len()
    }
}

async fn deliver(topic: String, mut receiver: broadcast::Receiver<Message>, handler: MessageHandler) {
    loop {
        match receiver.recv().await {
            Ok(message) => {
                let offset = message.offset;
                if let Err(e) = handler(message).await {
                    tracing::warn!(topic = %topic, offset, "Message handler failed: {}", e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(topic = %topic, skipped, "Subscriber lagged, messages dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!(topic = %topic, "Topic closed, ending delivery");
                break;
            }
        }
    }
}

#[async_trait]
impl Adapter for MemoryQueue {
    async fn connect(&self, _timeout: Duration) -> ThroomResult<()> {
        self.core.set_connected(true);
        tracing::debug!(address = %self.core.config().address(), "Memory queue ready");
        Ok(())
    }

    async fn disconnect(&self) -> ThroomResult<()> {
        let stopped = self.abort_subscriptions(None);
        if stopped > 0 {
            tracing::debug!(stopped, "Stopped memory queue subscriptions");
        }
        self.core.set_connected(false);
        Ok(())
    }

    async fn ping(&self) -> ThroomResult<()> {
        self.core.ensure_connected()
    }

    async fn health_check(&self) -> ThroomResult<HealthStatus> {
        Ok(self.core.track_health(self.ping()).await)
    }

    fn health_check_failed(&self, reason: String, response_time: Duration) -> HealthStatus {
        self.core.health_failed(reason, response_time)
    }

    fn adapter_type(&self) -> &str {
        self.core.adapter_type()
    }

    fn metrics(&self) -> Metrics {
        self.core.metrics()
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    fn config(&self) -> &ServiceConfig {
        self.core.config()
    }
}

#[async_trait]
impl QueueAdapter for MemoryQueue {
    async fn publish(&self, topic: &str, payload: Bytes) -> ThroomResult<()> {
        self.core.ensure_connected()?;
        self.core
            .observe("publish", async {
                let mut topics = self.topics();
                let entry = topics
                    .entry(topic.to_string())
                    .or_insert_with(|| Topic::new(self.capacity, TopicOptions::default()));

                let message = Message {
                    topic: topic.to_string(),
                    key: None,
                    payload,
                    headers: BTreeMap::new(),
                    timestamp: SystemTime::now(),
                    offset: entry.next_offset,
                };
                entry.next_offset += 1;

                // no live subscribers is not an error
                let _ = entry.sender.send(message);
                Ok(())
            })
            .await
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> ThroomResult<()> {
        self.core.ensure_connected()?;
        self.core
            .observe("subscribe", async {
                let receiver = self
                    .topics()
                    .entry(topic.to_string())
                    .or_insert_with(|| Topic::new(self.capacity, TopicOptions::default()))
                    .sender
                    .subscribe();

                let task = tokio::spawn(deliver(topic.to_string(), receiver, handler));
                self.subscriptions()
                    .entry(topic.to_string())
                    .or_default()
                    .push(task);

                tracing::debug!(topic = %topic, "Subscribed");
                Ok(())
            })
            .await
    }

    async fn unsubscribe(&self, topic: &str) -> ThroomResult<()> {
        self.core.ensure_connected()?;
        self.core
            .observe("unsubscribe", async {
                let stopped = self.abort_subscriptions(Some(topic));
                tracing::debug!(topic = %topic, stopped, "Unsubscribed");
                Ok(())
            })
            .await
    }

    async fn create_topic(&self, topic: &str, options: TopicOptions) -> ThroomResult<()> {
        self.core.ensure_connected()?;
        self.core
            .observe("create_topic", async {
                if options.partitions == 0 {
                    return Err(ThroomError::invalid_operation(
                        "topic needs at least one partition",
                    ));
                }

                let mut topics = self.topics();
                if topics.contains_key(topic) {
                    return Err(ThroomError::backend(format!("topic {} already exists", topic)));
                }
                topics.insert(topic.to_string(), Topic::new(self.capacity, options));
                Ok(())
            })
            .await
    }

    async fn delete_topic(&self, topic: &str) -> ThroomResult<()> {
        self.core.ensure_connected()?;
        self.core
            .observe("delete_topic", async {
                if self.topics().remove(topic).is_none() {
                    return Err(ThroomError::backend(format!("unknown topic {}", topic)));
                }
                self.abort_subscriptions(Some(topic));
                Ok(())
            })
            .await
    }

    async fn list_topics(&self) -> ThroomResult<Vec<String>> {
        self.core.ensure_connected()?;
        self.core
            .observe("list_topics", async {
                let mut names: Vec<String> = self.topics().keys().cloned().collect();
                names.sort();
                Ok(names)
            })
            .await
    }
}

impl Drop for MemoryQueue {
    fn drop(&mut self) {
        self.abort_subscriptions(None);
    }
}
