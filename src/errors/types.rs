//! # Error Types
//!
//! Error types for the routeplane control plane using `thiserror`.

use std::sync::Arc;

/// Custom result type for routeplane operations
pub type Result<T> = std::result::Result<T, RouteplaneError>;

/// Main error type for the routeplane control plane
#[derive(thiserror::Error, Debug)]
pub enum RouteplaneError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Upstream unreachable (connect failure, TLS failure, request timeout)
    #[error("Transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// Upstream answered with a non-success status
    #[error("Upstream {endpoint} returned HTTP {status}: {message}")]
    Upstream {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// Upstream payload could not be decoded
    #[error("Failed to decode {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// One or more critical endpoints failed during a native fetch
    #[error("Critical endpoints failed: {}", format_failures(.failures))]
    CriticalEndpoints { failures: Vec<(String, String)> },

    /// Fetch attempted before the minimum interval elapsed and nothing is cached
    #[error("Fetch throttled: retry in {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Timeout errors
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// An error produced once and handed to every deduplicated caller
    #[error(transparent)]
    Shared(#[from] Arc<RouteplaneError>),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(endpoint, message)| format!("{}: {}", endpoint, message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl RouteplaneError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database {
            source,
            context: context.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a transport error
    pub fn transport<E: Into<String>, S: Into<String>>(endpoint: E, message: S) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create an upstream status error
    pub fn upstream<E: Into<String>, S: Into<String>>(
        endpoint: E,
        status: u16,
        message: S,
    ) -> Self {
        Self::Upstream {
            endpoint: endpoint.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode<E: Into<String>, S: Into<String>>(endpoint: E, message: S) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a throttle error
    pub fn throttled(retry_after_ms: u64) -> Self {
        Self::Throttled { retry_after_ms }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// The error itself, or the original when it was fanned out to several callers
    pub fn root(&self) -> &RouteplaneError {
        match self {
            RouteplaneError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// True when the upstream could not be reached at all
    pub fn is_transport(&self) -> bool {
        matches!(
            self.root(),
            RouteplaneError::Transport { .. } | RouteplaneError::Timeout { .. }
        )
    }

    /// True for the non-fatal "called too early" condition
    pub fn is_throttled(&self) -> bool {
        matches!(self.root(), RouteplaneError::Throttled { .. })
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            RouteplaneError::Database { .. }
                | RouteplaneError::Io { .. }
                | RouteplaneError::Transport { .. }
                | RouteplaneError::Timeout { .. }
                | RouteplaneError::Throttled { .. }
        )
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self.root() {
            RouteplaneError::Validation { .. } | RouteplaneError::Serialization { .. } => 400,
            RouteplaneError::NotFound { .. } => 404,
            RouteplaneError::Timeout { .. } => 504,
            RouteplaneError::Throttled { .. } => 429,
            RouteplaneError::Transport { .. }
            | RouteplaneError::Upstream { .. }
            | RouteplaneError::Decode { .. }
            | RouteplaneError::CriticalEndpoints { .. } => 502,
            _ => 500,
        }
    }
}

impl From<sqlx::Error> for RouteplaneError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database {
            source: error,
            context: "Database operation failed".to_string(),
        }
    }
}

impl From<std::io::Error> for RouteplaneError {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            source: error,
            context: "I/O operation failed".to_string(),
        }
    }
}

impl From<serde_json::Error> for RouteplaneError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            source: error,
            context: "JSON serialization failed".to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for RouteplaneError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}
