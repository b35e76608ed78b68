//! Kernel-level error type.

use thiserror::Error;
use voxkit_types::error::{ConfigError, SchedulerError, ServiceError};

/// Errors surfaced by kernel assembly and shutdown.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The kernel failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
