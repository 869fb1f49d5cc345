//! The normalized inbound event.
//!
//! Whatever the chat platform delivers (a message, a media group item, a button
//! press) is flattened into one [`NormalizedEvent`] by the event source before
//! it reaches the dispatcher. The event is immutable and lives for exactly one
//! dispatch cycle, shared behind an `Arc` by every handler that fires for it.

use serde::{Deserialize, Serialize};

use crate::content::{ContentKind, ContentSet};

/// Identifies a conversation (chat, group or channel). This is the unit of
/// rate limiting and ordering.
pub type ConversationId = i64;

/// Identifies the user who produced the event.
pub type UserId = i64;

/// A platform-independent view of one inbound update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    /// Command name without prefix, lower-cased.
    #[serde(default)]
    pub command: Option<String>,
    /// Whitespace-separated tokens following the command.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content_types: ContentSet,
    #[serde(default)]
    pub is_reply_to_bot_message: bool,
    #[serde(default)]
    pub is_callback: bool,
    #[serde(default)]
    pub callback_action: Option<String>,
}

impl NormalizedEvent {
    /// An event with no content, used as the starting point of the builders.
    pub fn new(conversation_id: ConversationId, user_id: UserId) -> Self {
        Self {
            conversation_id,
            user_id,
            ..Default::default()
        }
    }

    /// A plain text message.
    pub fn text_message(
        conversation_id: ConversationId,
        user_id: UserId,
        text: impl Into<String>,
    ) -> Self {
        Self::new(conversation_id, user_id).with_text(text)
    }

    /// A command message. The text is rebuilt as `/<command> <args…>`.
    pub fn command_message<I, S>(
        conversation_id: ConversationId,
        user_id: UserId,
        command: impl Into<String>,
        args: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = command.into();
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut text = format!("/{command}");
        for arg in &args {
            text.push(' ');
            text.push_str(arg);
        }

        let mut event = Self::new(conversation_id, user_id).with_text(text);
        event.command = Some(command);
        event.args = args;
        event
    }

    /// A callback (button press) carrying `action`.
    pub fn callback(
        conversation_id: ConversationId,
        user_id: UserId,
        action: impl Into<String>,
    ) -> Self {
        Self {
            is_callback: true,
            callback_action: Some(action.into()),
            ..Self::new(conversation_id, user_id)
        }
    }

    /// Sets the text and marks the event as carrying [`ContentKind::Text`].
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.content_types.insert(ContentKind::Text);
        }
        self.text = Some(text);
        self
    }

    pub fn with_content(mut self, kind: ContentKind) -> Self {
        self.content_types.insert(kind);
        self
    }

    pub fn replying_to_bot(mut self) -> Self {
        self.is_reply_to_bot_message = true;
        self
    }

    /// The command name, if present and non-empty.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.is_empty())
    }

    /// The text, if present and non-empty.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// The callback action, only for callback events.
    pub fn action(&self) -> Option<&str> {
        if self.is_callback {
            self.callback_action.as_deref()
        } else {
            None
        }
    }

    /// Returns `true` if the message carries any recognized content.
    pub fn has_content(&self) -> bool {
        !self.content_types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_message_carries_text_content() {
        let event = NormalizedEvent::command_message(7, 1, "mute", ["@spam", "10m"]);

        assert_eq!(event.command(), Some("mute"));
        assert_eq!(event.text(), Some("/mute @spam 10m"));
        assert!(event.content_types.contains(ContentKind::Text));
        assert_eq!(event.action(), None);
    }

    #[test]
    fn callback_has_no_content() {
        let event = NormalizedEvent::callback(7, 1, "approve");

        assert_eq!(event.action(), Some("approve"));
        assert!(!event.has_content());
        assert_eq!(event.command(), None);
    }

    #[test]
    fn deserializes_with_defaults() {
        let event: NormalizedEvent = serde_json::from_str(
            r#"{"conversation_id": 42, "user_id": 9, "content_types": ["photo"]}"#,
        )
        .unwrap();

        assert_eq!(event.conversation_id, 42);
        assert!(event.content_types.contains(ContentKind::Photo));
        assert!(!event.is_callback);
        assert!(event.args.is_empty());
    }
}
