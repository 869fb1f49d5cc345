//! Declarative handler registrations.
//!
//! A [`Registration`] binds a handler to a category, optional keys and an
//! execution policy. It is inert until handed to
//! [`HandlerRegistry::register`](crate::registry::HandlerRegistry::register):
//!
//! ```rust,ignore
//! registry.register(
//!     Registration::command(["mute"], mute)
//!         .rate_limit(1, Duration::from_secs(60))
//!         .run_async(),
//! )?;
//! registry.register(
//!     Registration::any_message(archive).filters([ContentKind::Photo, ContentKind::Video]),
//! )?;
//! ```

use std::any::type_name;
use std::time::Duration;

use courier_core::{ContentKind, ContentSet, ExecutionPolicy, HandlerCategory, RateLimit};

use crate::error::ExtractResult;
use crate::handler::{BoxedHandler, Handler, into_handler};
use crate::resources::Resources;

/// A handler together with everything needed to route and execute it.
pub struct Registration {
    pub(crate) category: HandlerCategory,
    pub(crate) keys: Vec<String>,
    pub(crate) handler: BoxedHandler,
    pub(crate) verify: fn(&Resources) -> ExtractResult<()>,
    pub(crate) name: String,
    pub(crate) policy: ExecutionPolicy,
    pub(crate) filters: ContentSet,
    pub(crate) unknown_filters: Vec<String>,
}

impl Registration {
    fn new<F, T>(category: HandlerCategory, keys: Vec<String>, handler: F) -> Self
    where
        F: Handler<T>,
        T: 'static,
    {
        Self {
            category,
            keys,
            handler: into_handler(handler),
            verify: <F as Handler<T>>::verify,
            name: short_type_name(type_name::<F>()),
            policy: ExecutionPolicy::immediate(),
            filters: ContentSet::empty(),
            unknown_filters: Vec::new(),
        }
    }

    /// A handler for one or more command names (without prefix).
    pub fn command<I, S, F, T>(commands: I, handler: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Handler<T>,
        T: 'static,
    {
        let keys = commands.into_iter().map(Into::into).collect();
        Self::new(HandlerCategory::Command, keys, handler)
    }

    /// A handler for one callback action.
    pub fn callback<F, T>(action: impl Into<String>, handler: F) -> Self
    where
        F: Handler<T>,
        T: 'static,
    {
        Self::new(HandlerCategory::CallbackAction, vec![action.into()], handler)
    }

    /// A handler for every message with non-empty text, commands included.
    pub fn text<F, T>(handler: F) -> Self
    where
        F: Handler<T>,
        T: 'static,
    {
        Self::new(HandlerCategory::Text, Vec::new(), handler)
    }

    /// A handler for every message carrying content. Narrow it with
    /// [`filter`](Self::filter) or [`filters`](Self::filters).
    pub fn any_message<F, T>(handler: F) -> Self
    where
        F: Handler<T>,
        T: 'static,
    {
        Self::new(HandlerCategory::AnyMessage, Vec::new(), handler)
    }

    /// A handler for replies to messages the bot sent.
    pub fn reply_to_bot<F, T>(handler: F) -> Self
    where
        F: Handler<T>,
        T: 'static,
    {
        Self::new(HandlerCategory::ReplyToBotMessage, Vec::new(), handler)
    }

    /// Overrides the name used in logs. Defaults to the handler's type name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Runs the handler on the worker pool instead of the dispatching task.
    pub fn run_async(mut self) -> Self {
        self.policy.is_async = true;
        self
    }

    /// Admits at most `max_calls` starts per conversation within any
    /// trailing `window`. Excess invocations are queued, never dropped.
    pub fn rate_limit(mut self, max_calls: u32, window: Duration) -> Self {
        self.policy.rate_limit = Some(RateLimit::new(max_calls, window));
        self
    }

    /// Pauses for `delay` before each invocation.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.policy.fixed_delay = delay;
        self
    }

    /// Replaces the whole execution policy.
    pub fn policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Adds one content kind to the filter. Several kinds match if the
    /// message carries any of them.
    pub fn filter(mut self, kind: ContentKind) -> Self {
        self.filters.insert(kind);
        self
    }

    pub fn filters(mut self, kinds: impl IntoIterator<Item = ContentKind>) -> Self {
        self.filters.extend(kinds);
        self
    }

    /// Adds content kinds by name, as found in configuration files.
    /// Unrecognized names are reported when the registration is processed.
    pub fn filter_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            match name.as_ref().parse::<ContentKind>() {
                Ok(kind) => self.filters.insert(kind),
                Err(_) => self.unknown_filters.push(name.as_ref().to_string()),
            }
        }
        self
    }

    pub fn category(&self) -> HandlerCategory {
        self.category
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn handler_name(&self) -> &str {
        &self.name
    }

    pub fn execution_policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn content_filters(&self) -> ContentSet {
        self.filters
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("category", &self.category)
            .field("keys", &self.keys)
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// `my_bot::handlers::ban` → `handlers::ban`; closures keep their
/// `{{closure}}` marker so they remain recognizable.
fn short_type_name(full: &str) -> String {
    let mut segments = full.rsplit("::");
    match (segments.next(), segments.next()) {
        (Some(last), Some(parent)) => format!("{parent}::{last}"),
        (Some(last), None) => last.to_string(),
        _ => full.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ban() {}

    #[test]
    fn builder_sets_policy() {
        let registration = Registration::command(["ban", "kick"], ban)
            .rate_limit(1, Duration::from_secs(60))
            .delay(Duration::from_millis(250))
            .run_async();

        assert_eq!(registration.category(), HandlerCategory::Command);
        assert_eq!(registration.keys(), ["ban", "kick"]);
        assert!(registration.handler_name().ends_with("ban"));

        let policy = registration.execution_policy();
        assert!(policy.is_async);
        assert_eq!(policy.rate_limit, Some(RateLimit::per_seconds(1, 60)));
        assert_eq!(policy.fixed_delay, Duration::from_millis(250));
    }

    #[test]
    fn filter_names_collects_unknown() {
        let registration = Registration::any_message(ban)
            .filter(ContentKind::Sticker)
            .filter_names(["photo", "Audio"]);

        assert_eq!(
            registration.content_filters(),
            ContentSet::from([ContentKind::Sticker, ContentKind::Photo])
        );
        assert_eq!(registration.unknown_filters, ["Audio"]);
    }

    #[test]
    fn short_names() {
        assert_eq!(short_type_name("bot::handlers::ban"), "handlers::ban");
        assert_eq!(short_type_name("ban"), "ban");
    }
}
