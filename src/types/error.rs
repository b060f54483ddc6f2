//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//! Backend failures carry a [`FailureKind`] so they can be logged and
//! reported consistently regardless of which provider produced them.
//!
//! ## Failure Kinds
//!
//! - **Network**: Connectivity issues (connection refused, DNS, TLS)
//! - **Timeout**: The backend did not finish within its configured timeout
//! - **RateLimit**: Provider throttled the request
//! - **Auth**: Credential rejected
//! - **Provider**: Provider-side error (5xx, failed prediction)
//! - **BadResponse**: Response could not be interpreted (no image, bad JSON)

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Failure Kinds
// =============================================================================

/// Classification of a single backend attempt failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connectivity issue reaching the backend
    Network,
    /// Generation exceeded the backend's timeout
    Timeout,
    /// Provider throttled the request
    RateLimit,
    /// Credential missing or rejected
    Auth,
    /// Provider reported an error
    Provider,
    /// Response did not contain a usable image
    BadResponse,
    /// Unknown failure
    Unknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "NETWORK"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Provider => write!(f, "PROVIDER"),
            Self::BadResponse => write!(f, "BAD_RESPONSE"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// =============================================================================
// Backend Error
// =============================================================================

/// Typed failure of one generation attempt against one backend
#[derive(Debug, Clone)]
pub struct BackendError {
    /// Failure classification
    pub kind: FailureKind,
    /// Detailed error message
    pub message: String,
    /// Backend that produced the error
    pub backend: Option<String>,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(backend) = &self.backend {
            write!(f, "[{}:{}] {}", backend, self.kind, self.message)
        } else {
            write!(f, "[{}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for BackendError {}

impl BackendError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backend: None,
        }
    }

    /// Create error with backend context
    pub fn with_backend(
        kind: FailureKind,
        message: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            backend: Some(backend.into()),
        }
    }

    /// Attach backend context to an existing error
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps transport and HTTP failures onto [`FailureKind`]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an HTTP status code returned by a backend
    pub fn classify_http_status(status: u16, message: &str, backend: &str) -> BackendError {
        let kind = match status {
            429 => FailureKind::RateLimit,
            401 | 403 => FailureKind::Auth,
            408 | 504 => FailureKind::Timeout,
            400..=499 => FailureKind::BadResponse,
            500..=599 => FailureKind::Provider,
            _ => FailureKind::Unknown,
        };
        BackendError::with_backend(kind, format!("HTTP {status}: {message}"), backend)
    }

    /// Classify a transport-level reqwest failure
    pub fn classify_request(err: &reqwest::Error, backend: &str) -> BackendError {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() || err.is_request() {
            FailureKind::Network
        } else if err.is_decode() || err.is_body() {
            FailureKind::BadResponse
        } else if let Some(status) = err.status() {
            return Self::classify_http_status(status.as_u16(), &err.to_string(), backend);
        } else {
            FailureKind::Unknown
        };
        BackendError::with_backend(kind, err.to_string(), backend)
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A single backend attempt failed
    #[error("Backend error: {0}")]
    Backend(BackendError),

    /// Operation timeout with context
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Generation failed for {prompt_id}: {reason}")]
    Generation { prompt_id: String, reason: String },

    /// Batch estimate exceeded the remaining budget and was not approved
    #[error("Budget declined: planned ${planned_cost:.4} exceeds remaining ${remaining_budget:.4}")]
    BudgetDeclined {
        planned_cost: f64,
        remaining_budget: f64,
    },
}

impl From<BackendError> for ForgeError {
    fn from(err: BackendError) -> Self {
        ForgeError::Backend(err)
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;

impl ForgeError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a backend error without going through the classifier
    pub fn backend(kind: FailureKind, message: impl Into<String>, backend: &str) -> Self {
        Self::Backend(BackendError::with_backend(kind, message, backend))
    }

    /// Whether this error came from a backend attempt (as opposed to setup)
    pub fn is_attempt_failure(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(FailureKind::Timeout.to_string(), "TIMEOUT");
        assert_eq!(FailureKind::BadResponse.to_string(), "BAD_RESPONSE");
    }

    #[test]
    fn test_classify_http_status() {
        let rate_limit = ErrorClassifier::classify_http_status(429, "slow down", "replicate");
        assert_eq!(rate_limit.kind, FailureKind::RateLimit);

        let auth = ErrorClassifier::classify_http_status(401, "Unauthorized", "replicate");
        assert_eq!(auth.kind, FailureKind::Auth);

        let server = ErrorClassifier::classify_http_status(503, "busy", "local");
        assert_eq!(server.kind, FailureKind::Provider);

        let gateway = ErrorClassifier::classify_http_status(504, "gateway", "local");
        assert_eq!(gateway.kind, FailureKind::Timeout);

        let bad = ErrorClassifier::classify_http_status(422, "invalid input", "replicate");
        assert_eq!(bad.kind, FailureKind::BadResponse);
    }

    #[test]
    fn test_backend_context_attached_later() {
        let err = BackendError::new(FailureKind::Auth, "Invalid token").backend("replicate");
        assert_eq!(err.backend.as_deref(), Some("replicate"));
        assert_eq!(err.to_string(), "[replicate:AUTH] Invalid token");
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::with_backend(FailureKind::Network, "Connection refused", "local");
        assert_eq!(err.to_string(), "[local:NETWORK] Connection refused");

        let bare = BackendError::new(FailureKind::Provider, "prediction failed");
        assert_eq!(bare.to_string(), "[PROVIDER] prediction failed");
    }

    #[test]
    fn test_attempt_failure() {
        assert!(ForgeError::backend(FailureKind::Network, "down", "local").is_attempt_failure());
        assert!(ForgeError::timeout("poll", Duration::from_secs(1)).is_attempt_failure());
        assert!(!ForgeError::Config("bad".into()).is_attempt_failure());
    }

    #[test]
    fn test_budget_declined_display() {
        let err = ForgeError::BudgetDeclined {
            planned_cost: 0.015,
            remaining_budget: 0.002,
        };
        assert_eq!(
            err.to_string(),
            "Budget declined: planned $0.0150 exceeds remaining $0.0020"
        );
    }
}
