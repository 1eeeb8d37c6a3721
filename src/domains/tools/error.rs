//! Tool-specific error types.
//!
//! Two layers live here:
//! - [`AdapterError`] is what an adapter raises from `execute`.
//! - [`ErrorKind`] and [`ToolFailure`] form the stable, normalized shape
//!   callers branch on, regardless of which adapter failed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors an adapter may raise while executing.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The arguments passed the schema but are semantically unusable
    /// (bad URL scheme, disallowed host, ...).
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The adapter's external dependency failed.
    #[error("Upstream failure: {message}")]
    Upstream {
        message: String,
        details: Option<Map<String, Value>>,
    },

    /// An unexpected failure inside the adapter itself.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// Create a new "invalid arguments" error.
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Create a new "upstream" error without details.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
            details: None,
        }
    }

    /// Create a new "upstream" error carrying structured details.
    pub fn upstream_with(msg: impl Into<String>, details: Map<String, Value>) -> Self {
        Self::Upstream {
            message: msg.into(),
            details: Some(details),
        }
    }

    /// Create a new "internal" error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        let mut details = Map::new();
        if let Some(status) = err.status() {
            details.insert("status".to_string(), Value::from(status.as_u16()));
        }
        details.insert("timeout".to_string(), Value::Bool(err.is_timeout()));
        details.insert("connect".to_string(), Value::Bool(err.is_connect()));
        Self::upstream_with(err.to_string(), details)
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        Self::upstream(err.to_string())
    }
}

/// The fixed failure taxonomy returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Input failed schema checks.
    Validation,
    /// Unknown or disabled tool.
    NotFound,
    /// The tool's rate window is exhausted.
    RateLimited,
    /// The adapter's external dependency failed.
    Upstream,
    /// The invocation exceeded its allotted time.
    Timeout,
    /// The adapter misbehaved (bad output, panic, unexpected failure).
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "Validation",
            Self::NotFound => "NotFound",
            Self::RateLimited => "RateLimited",
            Self::Upstream => "Upstream",
            Self::Timeout => "Timeout",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized failure: `(kind, message, details)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl ToolFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attach a detail entry, creating the details map if needed.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Look up a detail entry.
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.as_ref().and_then(|d| d.get(key))
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_by_name() {
        let json = serde_json::to_value(ErrorKind::RateLimited).unwrap();
        assert_eq!(json, Value::String("RateLimited".to_string()));
        assert_eq!(ErrorKind::Upstream.to_string(), "Upstream");
    }

    #[test]
    fn test_failure_details() {
        let failure = ToolFailure::new(ErrorKind::Timeout, "too slow").with_detail("timeout_ms", 50);
        assert_eq!(failure.detail("timeout_ms"), Some(&Value::from(50)));
        assert_eq!(failure.to_string(), "Timeout: too slow");
    }

    #[test]
    fn test_failure_without_details_omits_field() {
        let failure = ToolFailure::new(ErrorKind::NotFound, "Tool not found: x");
        let json = serde_json::to_value(&failure).unwrap();
        assert!(json.get("details").is_none());
    }
}
