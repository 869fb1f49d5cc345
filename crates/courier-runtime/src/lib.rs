//! # Courier Runtime
//!
//! Everything around the dispatch core that a deployed bot needs:
//!
//! - **Configuration**: layered `courier.toml` / environment loading with
//!   figment ([`config`])
//! - **Logging**: tracing-subscriber setup driven by the `[logging]` section
//!   ([`logging`])
//! - **Orchestration**: [`CourierRuntime`] wires the registry, worker pool and
//!   drain scheduler together and runs an event stream until shutdown
//!
//! ```rust,ignore
//! use courier_runtime::CourierRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = CourierRuntime::new();
//!     runtime.register(Registration::command(["ping"], ping))?;
//!     runtime.start()?.run(event_source()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{BotConfig, ConfigError, ConfigLoader, ConfigResult, CourierConfig, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{CourierRuntime, RunningRuntime, RuntimeBuilder, RuntimeStats};

pub use tracing;
pub use tracing_subscriber;

/// Logging macros, for handler code that does not depend on `tracing` itself.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
