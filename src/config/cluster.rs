/// Cluster and service configuration records
///
/// A cluster groups the backend services one router dispatches across.
/// These records are produced by configuration loading and are read-only
/// to the router and the adapters.

use super::ConfigError;
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// A cluster configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Per-check bound used by the router's aggregate health check, in milliseconds
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Service name -> connection parameters
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Connection parameters for one backend instance
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Backend type identifier (redis, postgres, kafka, memory_cache, ...)
    #[serde(rename = "type")]
    pub service_type: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Relative capacity used by the weighted strategy
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Backend-specific options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, toml::Value>,
}

/// Routing strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// round_robin, weighted, least_connections, ai
    pub strategy: String,
}

fn default_weight() -> u32 {
    1
}

fn default_health_timeout_ms() -> u64 {
    5000
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::RoundRobin.as_str().to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn new<S: Into<String>, H: Into<String>>(service_type: S, host: H, port: u16) -> Self {
        Self {
            service_type: service_type.into(),
            host: host.into(),
            port,
            username: None,
            password: None,
            database: None,
            weight: default_weight(),
            options: BTreeMap::new(),
        }
    }

    /// `host:port` form used for dialing
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options
            .get(key)
            .and_then(|v| v.as_integer())
            .and_then(|v| u64::try_from(v).ok())
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Per-operation deadline from `options.timeout_ms` (5s when unset)
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.option_u64("timeout_ms").unwrap_or(5000))
    }

    /// Validate a service configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_type.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "type cannot be empty".to_string(),
            ));
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "host cannot be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "port must be between 1 and 65535".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("service_type", &self.service_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("weight", &self.weight)
            .field("options", &self.options)
            .finish()
    }
}

impl ClusterConfig {
    pub fn new<S: Into<String>, N: Into<String>>(cluster_id: S, name: N) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            name: name.into(),
            description: String::new(),
            health_timeout_ms: default_health_timeout_ms(),
            routing: RoutingConfig::default(),
            services: BTreeMap::new(),
        }
    }

    pub fn with_service<S: Into<String>>(mut self, name: S, service: ServiceConfig) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    pub fn with_strategy<S: Into<String>>(mut self, strategy: S) -> Self {
        self.routing.strategy = strategy.into();
        self
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Load a cluster document from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: ClusterConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save a cluster document to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate the cluster configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_cluster_id(&self.cluster_id)?;
        validate_cluster_name(&self.name)?;

        if self.services.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one service is required".to_string(),
            ));
        }

        for (name, service) in &self.services {
            service.validate().map_err(|e| match e {
                ConfigError::ValidationError(msg) => {
                    ConfigError::ValidationError(format!("services.{}: {}", name, msg))
                }
                other => other,
            })?;
        }

        if self.routing.strategy.parse::<StrategyKind>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid routing strategy: {}",
                self.routing.strategy
            )));
        }

        if self.health_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "health_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Example cluster used by `throome config`
    pub fn example() -> Self {
        let mut redis = ServiceConfig::new("redis", "127.0.0.1", 6379);
        redis
            .options
            .insert("timeout_ms".to_string(), toml::Value::Integer(2000));

        ClusterConfig::new("demo", "Demo cluster")
            .with_strategy(StrategyKind::LeastConnections.as_str())
            .with_service("cache-a", ServiceConfig::new("memory_cache", "localhost", 1))
            .with_service("cache-b", ServiceConfig::new("memory_cache", "localhost", 2))
            .with_service("events", ServiceConfig::new("memory_queue", "localhost", 3))
            .with_service("redis-main", redis)
    }
}

const CLUSTER_ID_MIN_LEN: usize = 3;
const CLUSTER_ID_MAX_LEN: usize = 32;
const CLUSTER_NAME_MAX_LEN: usize = 64;

fn is_id_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

/// A cluster id is 3 to 32 lowercase letters, digits and hyphens, starting
/// and ending with a letter or digit
pub fn validate_cluster_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::ValidationError(
            "cluster_id cannot be empty".to_string(),
        ));
    }

    let len = id.chars().count();
    if !(CLUSTER_ID_MIN_LEN..=CLUSTER_ID_MAX_LEN).contains(&len) {
        return Err(ConfigError::ValidationError(format!(
            "cluster_id must be between {} and {} characters",
            CLUSTER_ID_MIN_LEN, CLUSTER_ID_MAX_LEN
        )));
    }

    let well_formed = id.chars().all(is_id_char) && !id.starts_with('-') && !id.ends_with('-');
    if !well_formed {
        let mut message = format!(
            "cluster_id {:?} must contain only lowercase letters, numbers and hyphens, \
             and must start and end with a letter or number",
            id
        );
        let suggestion = sanitize_cluster_id(id);
        if validate_cluster_id(&suggestion).is_ok() {
            message.push_str(&format!(" (try {:?})", suggestion));
        }
        return Err(ConfigError::ValidationError(message));
    }

    Ok(())
}

/// A cluster name is non-empty and at most 64 characters
pub fn validate_cluster_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "name cannot be empty".to_string(),
        ));
    }

    if name.chars().count() > CLUSTER_NAME_MAX_LEN {
        return Err(ConfigError::ValidationError(format!(
            "name cannot exceed {} characters",
            CLUSTER_NAME_MAX_LEN
        )));
    }

    Ok(())
}

/// Derive a valid cluster id from a free-form name: lowercased, spaces and
/// underscores become hyphens, other characters are dropped, hyphen runs
/// collapse, and the result is trimmed to 32 characters and padded to 3.
pub fn sanitize_cluster_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        let c = if c == ' ' || c == '_' { '-' } else { c };
        if !is_id_char(c) || (c == '-' && (id.is_empty() || id.ends_with('-'))) {
            continue;
        }
        id.push(c);
    }

    id.truncate(CLUSTER_ID_MAX_LEN);
    while id.ends_with('-') {
        id.pop();
    }

    if id.len() < CLUSTER_ID_MIN_LEN {
        if id.is_empty() {
            id.push_str("cluster");
        }
        id.push_str("-01");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_cluster_document() {
        let doc = r#"
            cluster_id = "prod"
            name = "Production"

            [routing]
            strategy = "weighted"

            [services.cache-a]
            type = "redis"
            host = "10.0.1.20"
            port = 6379
            password = "hunter2"
            weight = 3

            [services.cache-a.options]
            timeout_ms = 250

            [services.events]
            type = "memory_queue"
            host = "localhost"
            port = 1
        "#;

        let cluster: ClusterConfig = toml::from_str(doc).unwrap();
        assert!(cluster.validate().is_ok());
        assert_eq!(cluster.services.len(), 2);

        let cache = &cluster.services["cache-a"];
        assert_eq!(cache.service_type, "redis");
        assert_eq!(cache.weight, 3);
        assert_eq!(cache.operation_timeout(), Duration::from_millis(250));
        assert_eq!(cache.address(), "10.0.1.20:6379");

        let events = &cluster.services["events"];
        assert_eq!(events.weight, 1);
        assert_eq!(events.operation_timeout(), Duration::from_secs(5));
        assert_eq!(cluster.health_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut service = ServiceConfig::new("redis", "localhost", 6379);
        service.password = Some("hunter2".to_string());

        let rendered = format!("{:?}", service);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_cluster_validation() {
        assert!(ClusterConfig::example().validate().is_ok());

        let empty = ClusterConfig::new("c01", "empty");
        assert!(empty.validate().is_err());

        let no_id = ClusterConfig::new("", "x")
            .with_service("a", ServiceConfig::new("redis", "localhost", 6379));
        assert!(no_id.validate().is_err());

        let bad_port = ClusterConfig::new("c01", "x")
            .with_service("a", ServiceConfig::new("redis", "localhost", 0));
        let err = bad_port.validate().unwrap_err();
        assert!(err.to_string().contains("services.a"));

        let bad_strategy = ClusterConfig::new("c01", "x")
            .with_service("a", ServiceConfig::new("redis", "localhost", 6379))
            .with_strategy("fastest");
        assert!(bad_strategy.validate().is_err());
    }

    #[test]
    fn test_cluster_id_rules() {
        for id in ["test-cluster-01", "app123", "production", "a-b", "abc"] {
            assert!(validate_cluster_id(id).is_ok(), "{} should be valid", id);
        }

        let too_long = "a".repeat(33);
        for id in [
            "",
            "ab",
            too_long.as_str(),
            "TestCluster",
            "-test",
            "test-",
            "test@cluster",
            "test cluster",
            "test_cluster",
        ] {
            assert!(validate_cluster_id(id).is_err(), "{:?} should be invalid", id);
        }
        assert!(validate_cluster_id(&"a".repeat(32)).is_ok());

        let err = validate_cluster_id("Test Cluster").unwrap_err();
        assert!(err.to_string().contains("try \"test-cluster\""), "{}", err);

        let uppercase = ClusterConfig::new("Prod", "Production")
            .with_service("a", ServiceConfig::new("redis", "localhost", 6379));
        assert!(uppercase.validate().is_err());
    }

    #[test]
    fn test_cluster_name_rules() {
        assert!(validate_cluster_name("Production Cluster").is_ok());
        assert!(validate_cluster_name(&"n".repeat(64)).is_ok());
        assert!(validate_cluster_name("").is_err());
        assert!(validate_cluster_name("   ").is_err());
        assert!(validate_cluster_name(&"n".repeat(65)).is_err());

        let long_name = ClusterConfig::new("prod", "n".repeat(65))
            .with_service("a", ServiceConfig::new("redis", "localhost", 6379));
        assert!(long_name.validate().unwrap_err().to_string().contains("64"));
    }

    #[test]
    fn test_sanitize_cluster_id() {
        assert_eq!(sanitize_cluster_id("Test Cluster"), "test-cluster");
        assert_eq!(sanitize_cluster_id("my_app_cluster"), "my-app-cluster");
        assert_eq!(sanitize_cluster_id("Test@Cluster#123"), "testcluster123");
        assert_eq!(sanitize_cluster_id("--test--cluster--"), "test-cluster");
        assert_eq!(sanitize_cluster_id("ab"), "ab-01");
        assert_eq!(sanitize_cluster_id("@@"), "cluster-01");

        let long = sanitize_cluster_id(&"word ".repeat(20));
        assert!(long.len() <= 32);
        assert!(validate_cluster_id(&long).is_ok());
    }

    #[test]
    fn test_cluster_file_operations() {
        let cluster = ClusterConfig::example();
        let temp_file = NamedTempFile::new().unwrap();

        cluster.save_to_file(temp_file.path()).unwrap();
        let loaded = ClusterConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, cluster);
    }
}
