//! Callback payloads attached to inline buttons.

use std::fmt;

use crate::error::CallbackDataTooLong;

/// Maximum encoded size of a callback payload, in UTF-8 bytes.
pub const MAX_CALLBACK_DATA_BYTES: usize = 64;

/// The action string carried by a button press.
///
/// Decoding accepts any payload; encoding enforces the platform's 64-byte
/// limit so an oversized action is caught before a button is ever shown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackData {
    action: String,
}

impl CallbackData {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
        }
    }

    /// Decodes a payload received from the platform, without validation.
    pub fn decode(data: &str) -> Self {
        Self::new(data)
    }

    /// Encodes the payload for sending.
    pub fn encode(&self) -> Result<&str, CallbackDataTooLong> {
        let len = self.action.len();
        if len > MAX_CALLBACK_DATA_BYTES {
            return Err(CallbackDataTooLong {
                action: self.action.clone(),
                len,
            });
        }
        Ok(&self.action)
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl fmt::Display for CallbackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.action)
    }
}
