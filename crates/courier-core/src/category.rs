//! Handler categories.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which kind of inbound event a handler reacts to.
///
/// The category selects the registry bucket and the condition under which the
/// dispatcher considers the handler at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerCategory {
    /// A prefixed command such as `/ban`, routed by exact key.
    Command,
    /// Any message with non-empty text.
    Text,
    /// Any message carrying recognized content, narrowed by content filters.
    AnyMessage,
    /// A message replying to one the bot itself sent.
    ReplyToBotMessage,
    /// A callback action from an inline button, routed by exact key.
    CallbackAction,
}

impl HandlerCategory {
    pub const ALL: [HandlerCategory; 5] = [
        HandlerCategory::Command,
        HandlerCategory::Text,
        HandlerCategory::AnyMessage,
        HandlerCategory::ReplyToBotMessage,
        HandlerCategory::CallbackAction,
    ];

    /// Returns `true` for categories routed to exactly one handler by key.
    pub fn is_keyed(self) -> bool {
        matches!(self, Self::Command | Self::CallbackAction)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Text => "text",
            Self::AnyMessage => "any_message",
            Self::ReplyToBotMessage => "reply_to_bot_message",
            Self::CallbackAction => "callback_action",
        }
    }
}

impl fmt::Display for HandlerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
