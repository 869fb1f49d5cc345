//! Configuration module for the Courier runtime.
//!
//! Layered loading with figment, the configuration schema, and validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    BotConfig, CourierConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    RegistryConfig, ShutdownConfig, SpanEventConfig,
};
pub use validation::validate_config;
