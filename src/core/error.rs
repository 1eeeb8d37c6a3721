//! Error types and handling for the tool server.
//!
//! Startup and infrastructure failures are collected into one error type.
//! Failures of individual tool invocations are not errors at this level;
//! they are returned to callers as normalized results.

use thiserror::Error;

use super::transport::TransportError;
use crate::domains::tools::RegistryError;

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the tool server.
#[derive(Debug, Error)]
pub enum Error {
    /// A tool could not be registered.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The transport failed to start or stopped abnormally.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err: Error = TransportError::bind("127.0.0.1:8080", io).into();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().starts_with("Transport error: Failed to bind to 127.0.0.1:8080"));
    }
}
