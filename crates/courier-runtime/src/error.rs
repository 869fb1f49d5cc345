//! Runtime error types.

use std::io;

use thiserror::Error;

use courier_core::RegistrationError;
use courier_framework::PoolError;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur while building or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The worker pool could not be created.
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// Installing an OS signal handler failed.
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
