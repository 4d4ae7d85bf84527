//! Adapter error types.
//!
//! Every adapter failure surfaces as an [`AdapterError`]. The orchestrator
//! does not inspect messages: it asks [`AdapterError::kind`] which bucket
//! of the step error taxonomy the failure belongs to.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unified error type for autoflow adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// A required configuration field is absent or empty.
    #[error("missing required field `{field}` for `{operation}`")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    /// A configuration field is present but unusable.
    #[error("invalid configuration for `{operation}`: {reason}")]
    InvalidConfig {
        operation: &'static str,
        reason: String,
    },

    /// No usable credential, or the service rejected it.
    #[error("{service} credential error: {reason}")]
    Credential {
        service: &'static str,
        reason: String,
    },

    /// The external service answered with a failure.
    #[error("{service} request failed{}: {reason}", status_suffix(.status))]
    ExternalService {
        service: &'static str,
        status: Option<u16>,
        reason: String,
    },

    /// The service answered HTTP 429.
    #[error("{service} rate limit exceeded")]
    RateLimited {
        service: &'static str,
        retry_after: Option<Duration>,
    },

    /// The service answered successfully but produced no usable content.
    #[error("{service} returned empty content")]
    EmptyContent { service: &'static str },

    /// An operation exceeded its time limit.
    #[error("timeout after {seconds}s: {reason}")]
    Timeout { seconds: u64, reason: String },

    /// The operation does not belong to the adapter it was sent to.
    #[error("operation `{operation}` is not supported by the {integration} adapter")]
    UnsupportedOperation {
        integration: &'static str,
        operation: String,
    },

    /// Transport-level HTTP failure (connect, TLS, body read). The request
    /// URL is stripped on conversion since some services carry the token
    /// in the path.
    #[error("http error: {0}")]
    Http(reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AdapterError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.without_url())
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Which class of failure a step ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Configuration,
    Credential,
    ExternalService,
    Timeout,
    Unsupported,
}

impl StepErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Credential => "credential",
            Self::ExternalService => "external_service",
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AdapterError {
    pub fn kind(&self) -> StepErrorKind {
        match self {
            Self::MissingField { .. } | Self::InvalidConfig { .. } => {
                StepErrorKind::Configuration
            }
            Self::Credential { .. } => StepErrorKind::Credential,
            Self::Timeout { .. } => StepErrorKind::Timeout,
            Self::Http(e) if e.is_timeout() => StepErrorKind::Timeout,
            Self::UnsupportedOperation { .. } => StepErrorKind::Unsupported,
            Self::ExternalService { .. }
            | Self::RateLimited { .. }
            | Self::EmptyContent { .. }
            | Self::Http(_)
            | Self::SerializationError(_) => StepErrorKind::ExternalService,
        }
    }

    /// Whether a retrying caller may try the same request again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::EmptyContent { .. } | Self::Http(_) => true,
            Self::Timeout { .. } => true,
            Self::ExternalService { status, .. } => status.is_none_or(|s| s >= 500),
            _ => false,
        }
    }
}
