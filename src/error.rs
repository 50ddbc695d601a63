//! Error types for cartwatch.
//!
//! Errors are strongly typed using thiserror. Very few of them ever reach a
//! caller: instrumentation failures are swallowed and at most logged, so the
//! public surface only returns errors from initialization and from event
//! stream receive operations.

use thiserror::Error;

/// Configuration errors detected while validating a `MonitorConfig`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Required field '{field}' is missing or empty")]
    MissingField {
        field: String,
    },

    #[error("Cart endpoint suffix at index {index} is blank")]
    BlankEndpoint {
        index: usize,
    },

    #[error("Invalid configuration document: {message}")]
    Malformed {
        message: String,
    },
}

/// Failure of an underlying network primitive.
///
/// These are produced by the host's primitives, never by the monitor, and are
/// propagated to the original caller unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Request to {url} failed: {message}")]
    Failed {
        url: String,
        message: String,
    },

    #[error("Request to {url} was aborted")]
    Aborted {
        url: String,
    },
}

impl NetworkError {
    /// Creates a generic request failure.
    #[must_use]
    pub fn failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// The URL of the request that failed.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Failed { url, .. } | Self::Aborted { url } => url,
        }
    }
}

/// Top-level error type for cartwatch.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Cart state request to {url} returned HTTP {status}")]
    HttpStatus {
        url: String,
        status: u16,
    },

    #[error("Failed to parse cart payload: {message}")]
    Parse {
        message: String,
    },

    #[error("Network primitives are already instrumented by '{owner}'")]
    AlreadyInstalled {
        owner: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}

impl MonitorError {
    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if the cart-state read failed (network, HTTP status or body).
    #[must_use]
    pub const fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::HttpStatus { .. } | Self::Parse { .. }
        )
    }

    /// Returns true if initialization was refused because another active
    /// interceptor holds the network primitives.
    #[must_use]
    pub const fn is_already_installed(&self) -> bool {
        matches!(self, Self::AlreadyInstalled { .. })
    }

    /// Returns true if this is a receive timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias for cartwatch operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
