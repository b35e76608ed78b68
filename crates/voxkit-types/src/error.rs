//! Shared error types for the voxkit system.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Machine-readable error category carried in a `FunctionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Schema/type mismatch or a missing required parameter.
    InvalidArgument,
    /// Unknown service, function, event or agent name.
    NotFound,
    /// Operation not legal for the current lifecycle state or chat mode.
    InvalidState,
    /// A scheduled operation exceeded its deadline.
    Timeout,
    /// Unexpected handler or worker failure.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "invalid_argument"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::InvalidState => write!(f, "invalid_state"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Error returned by service functions and the contract layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// A parameter or item failed schema validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The named function, event, service or agent does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not legal right now.
    #[error("Invalid state '{current}' for operation '{operation}'")]
    InvalidState {
        /// What the system was doing when the operation was refused.
        current: String,
        /// The operation that was attempted.
        operation: String,
    },

    /// The operation did not complete before its deadline.
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// An unexpected failure inside a handler or worker.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Build an `InvalidState` error from anything printable.
    pub fn invalid_state(current: impl ToString, operation: impl ToString) -> Self {
        Self::InvalidState {
            current: current.to_string(),
            operation: operation.to_string(),
        }
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::InvalidState { .. } => ErrorKind::InvalidState,
            ServiceError::Timeout { .. } => ErrorKind::Timeout,
            ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Errors raised by the task scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The scheduler configuration cannot be used.
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// The scheduler is stopping or stopped and accepts no more work.
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    /// A worker thread could not be created.
    #[error("Failed to spawn worker '{name}': {source}")]
    Spawn {
        /// Worker name.
        name: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config '{path}': {reason}")]
    Read {
        /// Path that was read.
        path: String,
        /// Why the read failed.
        reason: String,
    },

    /// The TOML could not be parsed or deserialized.
    #[error("Failed to parse config '{path}': {reason}")]
    Parse {
        /// Path that was parsed.
        path: String,
        /// Parser message.
        reason: String,
    },

    /// An `include` entry was rejected.
    #[error("Config include rejected: {0}")]
    Include(String),

    /// The parsed configuration is semantically invalid.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Alias for Result with ServiceError.
pub type ServiceResult<T> = Result<T, ServiceError>;
