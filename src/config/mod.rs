/// Configuration management for throome
///
/// Two kinds of TOML documents are read here: the gateway configuration
/// (`throome.toml`) and one cluster document per cluster inside the
/// gateway's `clusters_dir`.
pub mod cluster;

pub use cluster::{
    sanitize_cluster_id, validate_cluster_id, validate_cluster_name, ClusterConfig, RoutingConfig,
    ServiceConfig,
};

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gateway configuration
    pub gateway: GatewayConfig,
    /// Health check configuration
    pub health: HealthConfig,
    /// Default retry policy handed to callers
    #[serde(default)]
    pub retry: RetryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Directory holding one TOML document per cluster
    pub clusters_dir: String,
    /// Upper bound for each adapter's `connect`, in milliseconds
    pub connect_timeout_ms: u64,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Health check interval in seconds
    pub interval_sec: u64,
    /// Health check timeout in seconds
    pub timeout_sec: u64,
    /// Number of consecutive failures before a service is reported unhealthy
    pub failure_threshold: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                clusters_dir: "clusters".to_string(),
                connect_timeout_ms: 5000,
            },
            health: HealthConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_sec: 10,
            timeout_sec: 5,
            failure_threshold: 3,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

impl GatewayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.clusters_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "clusters_dir cannot be empty".to_string(),
            ));
        }

        if self.gateway.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.health.interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec >= self.health.interval_sec {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be less than interval_sec".to_string(),
            ));
        }

        if self.health.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health check failure_threshold must be greater than 0".to_string(),
            ));
        }

        self.retry.validate()?;

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Write an example gateway configuration plus one example cluster into `dir`
    pub fn create_example_config<P: AsRef<Path>>(dir: P) -> Result<(), ConfigError> {
        let dir = dir.as_ref();
        let clusters_dir = dir.join("clusters");
        fs::create_dir_all(&clusters_dir).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config = Config {
            gateway: GatewayConfig {
                clusters_dir: clusters_dir.to_string_lossy().into_owned(),
                connect_timeout_ms: 5000,
            },
            ..Default::default()
        };
        config.save_to_file(dir.join("throome.toml"))?;

        ClusterConfig::example().save_to_file(clusters_dir.join("demo.toml"))
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
