//! # Courier Core
//!
//! Foundation types for the Courier bot dispatch engine.
//!
//! - **Events**: [`NormalizedEvent`], the platform-independent inbound update,
//!   and its [`ContentKind`]/[`ContentSet`] content description
//! - **Routing vocabulary**: [`HandlerCategory`] and the per-handler
//!   [`ExecutionPolicy`] / [`RateLimit`]
//! - **Helpers**: [`CallbackData`] and [`parse_command`] for simple event sources
//! - **Errors**: registration errors and configuration warnings shared by the
//!   framework and runtime layers
//!
//! Nothing in this crate performs I/O or spawns tasks.

pub mod callback;
pub mod category;
pub mod command;
pub mod content;
pub mod error;
pub mod event;
pub mod policy;

pub use callback::{CallbackData, MAX_CALLBACK_DATA_BYTES};
pub use category::HandlerCategory;
pub use command::{CommandLine, parse_command};
pub use content::{ContentKind, ContentSet};
pub use error::{
    CallbackDataTooLong, ConfigurationWarning, RegistrationError, RegistrationResult,
    UnknownContentKind,
};
pub use event::{ConversationId, NormalizedEvent, UserId};
pub use policy::{ExecutionPolicy, RateLimit};
