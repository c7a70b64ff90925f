/// Unified error handling for the throome gateway
///
/// Every fallible operation in the crate returns a [`ThroomError`]. The
/// taxonomy separates registry and selection failures (raised by the router
/// and the factory) from backend failures (raised by adapters), and the
/// backend failures are further split into transient ones that the retry
/// executor may repeat and permanent ones it must surface immediately.

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::config::ConfigError;

/// Main error type for throome operations
#[derive(Debug, Error)]
pub enum ThroomError {
    /// No constructor registered for a backend type
    #[error("Adapter type not registered: {adapter_type}")]
    AdapterTypeNotRegistered { adapter_type: String },

    /// Named service is absent from the registry
    #[error("Service not found: {service}")]
    ServiceNotFound { service: String },

    /// Named service is absent or present but disconnected
    #[error("Service unavailable: {service}")]
    ServiceUnavailable { service: String },

    /// No connected adapter matches the requested capability or type
    #[error("No available adapters for: {target}")]
    NoAvailableAdapters { target: String },

    /// A strategy was invoked with an empty candidate list
    #[error("No candidates to select from")]
    NoCandidates,

    /// Cluster id unknown to the gateway
    #[error("Cluster not found: {cluster}")]
    ClusterNotFound { cluster: String },

    /// Connection could not be established or was lost
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Operation exceeded its deadline
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] io::Error),

    /// Malformed data on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Backend rejected the operation
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// Credentials rejected
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Operation not valid in the current state
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Caller cancelled while a retry was waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for throome operations
pub type ThroomResult<T> = Result<T, ThroomError>;

/// Convenience methods for creating specific error types
impl ThroomError {
    pub fn adapter_type_not_registered<S: Into<String>>(adapter_type: S) -> Self {
        ThroomError::AdapterTypeNotRegistered {
            adapter_type: adapter_type.into(),
        }
    }

    pub fn service_not_found<S: Into<String>>(service: S) -> Self {
        ThroomError::ServiceNotFound {
            service: service.into(),
        }
    }

    pub fn service_unavailable<S: Into<String>>(service: S) -> Self {
        ThroomError::ServiceUnavailable {
            service: service.into(),
        }
    }

    pub fn no_available_adapters<S: Into<String>>(target: S) -> Self {
        ThroomError::NoAvailableAdapters {
            target: target.into(),
        }
    }

    pub fn cluster_not_found<S: Into<String>>(cluster: S) -> Self {
        ThroomError::ClusterNotFound {
            cluster: cluster.into(),
        }
    }

    pub fn connection_failed<S: Into<String>>(message: S) -> Self {
        ThroomError::ConnectionFailed {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        ThroomError::Timeout {
            operation: operation.into(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        ThroomError::Protocol(message.into())
    }

    pub fn backend<S: Into<String>>(message: S) -> Self {
        ThroomError::Backend {
            message: message.into(),
        }
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        ThroomError::Unauthorized {
            message: message.into(),
        }
    }

    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        ThroomError::InvalidOperation {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        ThroomError::Internal {
            message: message.into(),
        }
    }

    /// Whether the retry executor may repeat the failed operation.
    ///
    /// Only transient conditions qualify: a lost or refused connection, a
    /// deadline, or a service that is momentarily unavailable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ThroomError::ConnectionFailed { .. }
                | ThroomError::Timeout { .. }
                | ThroomError::ServiceUnavailable { .. }
                | ThroomError::Network(_)
        )
    }

    /// Stable snake_case name of the variant, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            ThroomError::AdapterTypeNotRegistered { .. } => "adapter_type_not_registered",
            ThroomError::ServiceNotFound { .. } => "service_not_found",
            ThroomError::ServiceUnavailable { .. } => "service_unavailable",
            ThroomError::NoAvailableAdapters { .. } => "no_available_adapters",
            ThroomError::NoCandidates => "no_candidates",
            ThroomError::ClusterNotFound { .. } => "cluster_not_found",
            ThroomError::ConnectionFailed { .. } => "connection_failed",
            ThroomError::Timeout { .. } => "timeout",
            ThroomError::Network(_) => "network",
            ThroomError::Protocol(_) => "protocol",
            ThroomError::Backend { .. } => "backend",
            ThroomError::Unauthorized { .. } => "unauthorized",
            ThroomError::InvalidOperation { .. } => "invalid_operation",
            ThroomError::Config(_) => "config",
            ThroomError::Cancelled => "cancelled",
            ThroomError::Internal { .. } => "internal",
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ThroomError::Config(_) => ErrorSeverity::Critical,
            ThroomError::Internal { .. } => ErrorSeverity::Critical,
            ThroomError::NoCandidates => ErrorSeverity::Critical,
            ThroomError::Network(_) => ErrorSeverity::Warning,
            ThroomError::ConnectionFailed { .. } => ErrorSeverity::Warning,
            ThroomError::Timeout { .. } => ErrorSeverity::Warning,
            ThroomError::ServiceUnavailable { .. } => ErrorSeverity::Warning,
            ThroomError::Cancelled => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
