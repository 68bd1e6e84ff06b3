//! Error types
//!
//! Two layers:
//! - [`ErrorKind`]: what an execution adapter reports for a failed backend call.
//!   The fallback coordinator decides cascade-vs-fail from it.
//! - [`RoutingError`]: failures of the routing core itself.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Failure classification produced by an execution adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    AuthenticationError,
    InvalidRequest,
    ModelNotFound,
    ContextLengthExceeded,
    ServerError,
    Timeout,
    Unknown,
}

/// How a failure affects the remaining candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeClass {
    /// Scoped to the failed backend; move on immediately.
    BackendScoped,
    /// Only backends with a larger context window may help.
    ContextWindow,
    /// Likely a credentials or request defect; cascade at most once.
    ConfigurationDefect,
    /// Unclassified; cascade within the global attempt budget.
    Unknown,
}

impl ErrorKind {
    pub fn cascade_class(&self) -> CascadeClass {
        match self {
            Self::RateLimited | Self::ServerError | Self::Timeout | Self::ModelNotFound => {
                CascadeClass::BackendScoped
            }
            Self::ContextLengthExceeded => CascadeClass::ContextWindow,
            Self::AuthenticationError | Self::InvalidRequest => CascadeClass::ConfigurationDefect,
            Self::Unknown => CascadeClass::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::AuthenticationError => write!(f, "authentication_error"),
            Self::InvalidRequest => write!(f, "invalid_request"),
            Self::ModelNotFound => write!(f, "model_not_found"),
            Self::ContextLengthExceeded => write!(f, "context_length_exceeded"),
            Self::ServerError => write!(f, "server_error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Errors raised by the routing core
#[derive(Error, Debug)]
pub enum RoutingError {
    /// No profile satisfies the task's capability and budget constraints
    #[error("No eligible backend for task {task_id}")]
    NoEligibleBackend { task_id: TaskId },

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile already registered: {0}")]
    DuplicateProfile(String),

    #[error("Invalid profile {backend_id}: {reason}")]
    InvalidProfile { backend_id: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Task was removed from the queue before admission
    #[error("Task {0} was cancelled")]
    Cancelled(TaskId),

    /// Executor dropped the task without producing an outcome
    #[error("Executor closed before the task completed")]
    ExecutorClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for RoutingError {
    fn from(err: toml::de::Error) -> Self {
        Self::Toml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_classes() {
        assert_eq!(
            ErrorKind::RateLimited.cascade_class(),
            CascadeClass::BackendScoped
        );
        assert_eq!(ErrorKind::Timeout.cascade_class(), CascadeClass::BackendScoped);
        assert_eq!(
            ErrorKind::ContextLengthExceeded.cascade_class(),
            CascadeClass::ContextWindow
        );
        assert_eq!(
            ErrorKind::InvalidRequest.cascade_class(),
            CascadeClass::ConfigurationDefect
        );
        assert_eq!(ErrorKind::Unknown.cascade_class(), CascadeClass::Unknown);
    }

    #[test]
    fn test_error_kind_serde_matches_display() {
        for kind in [
            ErrorKind::RateLimited,
            ErrorKind::AuthenticationError,
            ErrorKind::ContextLengthExceeded,
            ErrorKind::Unknown,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_no_eligible_message() {
        let err = RoutingError::NoEligibleBackend {
            task_id: TaskId::from("t-1"),
        };
        assert_eq!(err.to_string(), "No eligible backend for task t-1");
    }
}
