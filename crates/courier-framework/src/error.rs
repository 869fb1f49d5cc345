//! Error types for the Courier framework.

use std::any::Any;

use thiserror::Error;

use courier_core::{ConversationId, HandlerCategory};

pub use tower::BoxError;

/// What a handler invocation produces once its return value is normalized.
pub type HandlerResult = Result<(), BoxError>;

/// Errors that can occur while extracting handler parameters.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// A `Dep<T>` parameter names a resource that was never provided.
    #[error("no resource of type '{0}' has been provided")]
    MissingResource(&'static str),

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// A handler body panicked; carried through the service stack as an error.
#[derive(Debug, Clone, Error)]
#[error("handler panicked: {0}")]
pub struct HandlerPanicked(pub String);

impl HandlerPanicked {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self(message)
    }
}

/// Errors from the bounded worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The queue is full and no further workers may be started.
    #[error("worker pool saturated: {workers} workers busy and {queued} tasks queued")]
    Saturated { workers: usize, queued: usize },

    /// The pool no longer accepts tasks.
    #[error("worker pool is shut down")]
    ShutDown,

    /// The pool was created outside of a tokio runtime.
    #[error("worker pool requires a running tokio runtime")]
    NoRuntime,
}

/// A failure isolated to one handler invocation.
///
/// These never abort a dispatch; they are logged with enough context to find
/// the handler and conversation involved.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{category} handler '{handler}' failed in conversation {conversation}: {source}")]
    HandlerFailed {
        category: HandlerCategory,
        handler: String,
        conversation: ConversationId,
        #[source]
        source: BoxError,
    },

    #[error("{category} handler '{handler}' panicked in conversation {conversation}: {message}")]
    HandlerPanicked {
        category: HandlerCategory,
        handler: String,
        conversation: ConversationId,
        message: String,
    },

    #[error("{category} handler '{handler}' was rejected in conversation {conversation}: {source}")]
    Rejected {
        category: HandlerCategory,
        handler: String,
        conversation: ConversationId,
        #[source]
        source: PoolError,
    },
}

impl DispatchError {
    pub fn category(&self) -> HandlerCategory {
        match self {
            Self::HandlerFailed { category, .. }
            | Self::HandlerPanicked { category, .. }
            | Self::Rejected { category, .. } => *category,
        }
    }

    pub fn handler(&self) -> &str {
        match self {
            Self::HandlerFailed { handler, .. }
            | Self::HandlerPanicked { handler, .. }
            | Self::Rejected { handler, .. } => handler,
        }
    }

    pub fn conversation(&self) -> ConversationId {
        match self {
            Self::HandlerFailed { conversation, .. }
            | Self::HandlerPanicked { conversation, .. }
            | Self::Rejected { conversation, .. } => *conversation,
        }
    }
}
