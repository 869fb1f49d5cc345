//! Execution policy attached to every registration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sliding-window limit: at most `max_calls` task starts within any trailing
/// `window`, counted per conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self { max_calls, window }
    }

    /// Shorthand for a window expressed in whole seconds.
    pub fn per_seconds(max_calls: u32, window_secs: u64) -> Self {
        Self::new(max_calls, Duration::from_secs(window_secs))
    }

    /// A limit that can never admit anything, or never limits anything.
    pub fn is_degenerate(&self) -> bool {
        self.max_calls == 0 || self.window.is_zero()
    }
}

/// How a matched handler is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Run on the worker pool instead of the dispatching task.
    pub is_async: bool,
    pub rate_limit: Option<RateLimit>,
    /// Pause applied right before the handler body runs.
    pub fixed_delay: Duration,
}

impl ExecutionPolicy {
    /// Synchronous, unlimited, undelayed.
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn has_delay(&self) -> bool {
        !self.fixed_delay.is_zero()
    }
}
