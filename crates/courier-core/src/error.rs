//! Error and warning types shared by every layer.

use std::fmt;

use thiserror::Error;

use crate::category::HandlerCategory;

/// A content filter name that does not correspond to any [`ContentKind`](crate::ContentKind).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown content kind: {0}")]
pub struct UnknownContentKind(pub String);

/// A callback action too large to be attached to a button.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("callback data is {len} bytes, exceeding the 64 byte limit: {action}")]
pub struct CallbackDataTooLong {
    pub action: String,
    pub len: usize,
}

/// A registration that cannot be accepted.
///
/// Rejected handlers are excluded from the registry; startup continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The handler's parameters cannot be supplied at dispatch time.
    #[error("handler '{handler}' has an unsupported signature: {reason}")]
    InvalidSignature { handler: String, reason: String },

    /// A keyed registration collided with an existing one and the registry
    /// is configured to reject duplicates.
    #[error("{category} key '{key}' is already handled by '{existing}', rejected '{handler}'")]
    DuplicateKey {
        category: HandlerCategory,
        key: String,
        existing: String,
        handler: String,
    },
}

/// Result type for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// A non-fatal problem found while registering a handler.
///
/// Warnings are logged; depending on the variant either the whole
/// registration or only the offending attribute is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationWarning {
    /// A command registration declared no command strings.
    NoCommandKeys { handler: String },
    /// A callback registration declared an empty action key.
    EmptyCallbackAction { handler: String },
    /// A content filter name was not recognized and was ignored.
    UnknownContentFilter { handler: String, filter: String },
    /// Content filters were declared on a category that does not use them.
    FiltersIgnored {
        handler: String,
        category: HandlerCategory,
    },
    /// A rate limit with zero calls or a zero window was dropped.
    DegenerateRateLimit { handler: String },
}

impl ConfigurationWarning {
    /// Returns `true` if the warning excludes the registration entirely.
    pub fn skips_registration(&self) -> bool {
        matches!(
            self,
            Self::NoCommandKeys { .. } | Self::EmptyCallbackAction { .. }
        )
    }
}

impl fmt::Display for ConfigurationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCommandKeys { handler } => {
                write!(f, "command handler '{handler}' declares no commands")
            }
            Self::EmptyCallbackAction { handler } => {
                write!(f, "callback handler '{handler}' declares an empty action")
            }
            Self::UnknownContentFilter { handler, filter } => {
                write!(f, "handler '{handler}' uses unknown content filter '{filter}'")
            }
            Self::FiltersIgnored { handler, category } => {
                write!(f, "content filters on {category} handler '{handler}' are ignored")
            }
            Self::DegenerateRateLimit { handler } => {
                write!(f, "rate limit on handler '{handler}' never applies and was dropped")
            }
        }
    }
}
