//! Error types for reconciliation.
//!
//! Remote failures are categorized so the adapter can decide whether to
//! retry, and engine errors carry an [`ErrorKind`] so every failed outcome
//! can be reported with a stable classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of remote API errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limiting, server errors and connection failures (retryable)
    Transient,
    /// The remote object does not exist
    NotFound,
    /// Non-retryable rejection of the request
    Permanent,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Transient remote failure",
            Self::NotFound => "Remote object not found",
            Self::Permanent => "Request rejected by remote API",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors returned by an [`ApiClient`](crate::client::ApiClient) call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// HTTP 429, optionally with a server-supplied wait.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Message from the remote API
        message: String,
        /// How long the server asked us to wait
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Message from the remote API
        message: String,
    },

    /// Connection, DNS or timeout failure before a response was received.
    #[error("connection error: {0}")]
    Connection(String),

    /// HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other 4xx.
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Message from the remote API
        message: String,
    },

    /// The response could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Classify an HTTP status code into an error.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            404 => Self::NotFound(message),
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Get the error category for retry logic.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } | Self::Server { .. } | Self::Connection(_) => {
                ErrorCategory::Transient
            }
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Rejected { .. } | Self::InvalidResponse(_) => ErrorCategory::Permanent,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the request may have been processed despite the error.
    ///
    /// A 429 is refused before any work happens; a 5xx or a dropped
    /// connection can arrive after the server committed the change.
    #[must_use]
    pub fn may_have_taken_effect(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Connection(_))
    }

    /// Whether the remote object is gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Server-supplied wait before the next attempt, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Stable classification carried by failed outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownKind,
    Validation,
    Transient,
    Permanent,
    CyclicDependency,
    PartialApply,
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownKind => "unknown kind",
            Self::Validation => "validation error",
            Self::Transient => "transient failure",
            Self::Permanent => "permanent failure",
            Self::CyclicDependency => "cyclic dependency",
            Self::PartialApply => "partial apply",
            Self::Storage => "state storage failure",
        };
        f.write_str(s)
    }
}

/// Errors produced by planning and applying.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No schema registered for the resource kind
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),

    /// Desired configuration violates the schema
    #[error("invalid configuration for {address}: {message}")]
    Validation {
        /// Address of the offending resource (or the schema kind)
        address: String,
        /// What is wrong
        message: String,
    },

    /// Schema registration was rejected
    #[error("invalid schema for {kind}: {message}")]
    Schema {
        /// Kind being registered
        kind: String,
        /// What is wrong
        message: String,
    },

    /// Retryable remote failure that outlived the backoff budget
    #[error("{source} (gave up after {attempts} attempts)")]
    Transient {
        /// Number of attempts made
        attempts: u32,
        /// Last error observed
        #[source]
        source: ApiError,
    },

    /// Non-retryable remote rejection
    #[error(transparent)]
    Permanent(ApiError),

    /// Reference graph contains a cycle
    #[error("cyclic dependency between {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Addresses participating in the cycle
        cycle: Vec<String>,
    },

    /// Remote state may no longer match configuration
    #[error("partial apply of {address}: {message}")]
    PartialApply {
        /// Address of the affected resource
        address: String,
        /// What was left behind
        message: String,
    },

    /// The state backend failed to load or persist
    #[error("state storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Create a validation error.
    pub fn validation(address: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Validation {
            address: address.to_string(),
            message: message.into(),
        }
    }

    /// Create a schema registration error.
    pub fn schema(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Wrap a remote error after retries were exhausted or skipped.
    pub fn from_api(err: ApiError, attempts: u32) -> Self {
        if err.is_retryable() {
            Self::Transient {
                attempts,
                source: err,
            }
        } else {
            Self::Permanent(err)
        }
    }

    /// Classification used in outcomes.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownKind(_) => ErrorKind::UnknownKind,
            Self::Validation { .. } | Self::Schema { .. } => ErrorKind::Validation,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            Self::PartialApply { .. } => ErrorKind::PartialApply,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the remote object this error refers to is gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Permanent(e) if e.is_not_found())
    }
}
