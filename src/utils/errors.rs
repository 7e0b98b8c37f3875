// src/utils/errors.rs
//! Engine error types
//!
//! Validation failures inside the processor are *not* errors: they are
//! `ResultCode`s. Everything here is either a host-side fault (corrupt state,
//! storage I/O, configuration) or a sandbox fault that is reported for a
//! single user.

use crate::sandbox::SandboxFault;
use crate::schema::SchemaError;
use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Binary room state could not be decoded or encoded
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A user's sandbox faulted
    #[error("sandbox fault: {0}")]
    Sandbox(#[from] SandboxFault),

    /// Registration attempted after the registry was frozen
    #[error("registry is frozen; registrations must happen before the first tick")]
    RegistryFrozen,

    /// Persistence read/write failed
    #[error("storage failed: {0}")]
    StorageFailed(String),

    /// A blob key contained characters outside the safe set
    #[error("unsafe blob key: {0:?}")]
    UnsafeKey(String),

    /// Requested blob or entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Anything else that went wrong at runtime
    #[error("runtime error: {0}")]
    RuntimeError(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::StorageFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_converts() {
        let err: EngineError = SchemaError::Truncated {
            offset: 4,
            needed: 8,
            len: 6,
        }
        .into();
        assert!(matches!(err, EngineError::Schema(_)));
        assert!(err.to_string().contains("schema error"));
    }

    #[test]
    fn test_io_error_is_storage_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::StorageFailed(_)));
    }
}
