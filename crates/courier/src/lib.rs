//! # Courier
//!
//! Event dispatch for chat bots, with per-conversation rate limiting.
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌──────────┐     ┌───────────────────────┐
//! │ event stream │────▶│ Dispatcher │────▶│ Registry │────▶│ Executor              │
//! └──────────────┘     └────────────┘     └──────────┘     │  inline / worker pool │
//!                                                          │  rate limiter (FIFO)  │
//!                                                          └───────────────────────┘
//! ```
//!
//! - **Handlers** are async functions whose parameters are extractors
//!   ([`Args`](prelude::Args), [`Conversation`](prelude::Conversation),
//!   [`Dep`](prelude::Dep), ...)
//! - **Registrations** bind a handler to commands, callback actions, text,
//!   content kinds or replies, with an execution policy
//! - **Rate limits** are sliding windows counted per conversation; excess
//!   invocations queue in order instead of being dropped
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use courier::prelude::*;
//!
//! async fn mute(args: Args, Conversation(chat): Conversation) {
//!     info!(chat, target = ?args.first(), "muting");
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = CourierRuntime::new();
//!     runtime.register(
//!         Registration::command(["mute"], mute)
//!             .run_async()
//!             .rate_limit(1, Duration::from_secs(60)),
//!     )?;
//!
//!     runtime.start()?.run(updates()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: load `courier.toml`
//! - `yaml-config`: load `courier.yaml`
//! - `json-log`: JSON log output

pub use courier_core as core;
pub use courier_framework as framework;
pub use courier_runtime as runtime;

/// Commonly used types for writing and wiring handlers.
pub mod prelude {
    pub use courier_runtime::{CourierRuntime, RunningRuntime, RuntimeStats};

    pub use courier_framework::{
        Args, Conversation, Dep, DispatchReport, Event, FromContext, HandlerResult,
        Registration, Sender,
    };

    pub use courier_core::{
        CallbackData, ContentKind, ConversationId, HandlerCategory, NormalizedEvent, UserId,
        parse_command,
    };

    pub use courier_runtime::prelude::*;
}
