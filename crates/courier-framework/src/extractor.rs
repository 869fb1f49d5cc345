//! Extractor system for handler parameters.
//!
//! The [`FromContext`] trait defines how a type is pulled out of a
//! [`HandlerContext`]. Any combination of extractors may appear as handler
//! parameters, in any order:
//!
//! ```rust,ignore
//! async fn mute(args: Args, conversation: Conversation, sender: Dep<dyn MessageService>) {
//!     sender.send(conversation.0, &format!("muted {}", args.join(" "))).await;
//! }
//! ```
//!
//! Extractors that depend on resources report it through
//! [`FromContext::verify`], so a handler asking for something that was never
//! provided is rejected when it is registered rather than when it first fires.

use std::any::type_name;
use std::ops::Deref;
use std::sync::Arc;

use courier_core::{ConversationId, NormalizedEvent, UserId};

use crate::context::HandlerContext;
use crate::error::{ExtractError, ExtractResult};
use crate::resources::Resources;

/// A trait for types that can be extracted from a [`HandlerContext`].
pub trait FromContext: Sized {
    /// Attempts to extract this type from the given context.
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self>;

    /// Checks at registration time that extraction can succeed with the
    /// given resources. Extractors that only read the event keep the default.
    fn verify(_resources: &Resources) -> ExtractResult<()> {
        Ok(())
    }
}

/// The whole event.
#[derive(Debug, Clone)]
pub struct Event(pub Arc<NormalizedEvent>);

impl Deref for Event {
    type Target = NormalizedEvent;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromContext for Event {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(Event(ctx.event().clone()))
    }
}

impl FromContext for Arc<NormalizedEvent> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(ctx.event().clone())
    }
}

/// The command arguments, empty for non-command events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args(pub Vec<String>);

impl Deref for Args {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromContext for Args {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(Args(ctx.event().args.clone()))
    }
}

/// The conversation the event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversation(pub ConversationId);

impl FromContext for Conversation {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(Conversation(ctx.event().conversation_id))
    }
}

/// The user who produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sender(pub UserId);

impl FromContext for Sender {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(Sender(ctx.event().user_id))
    }
}

/// A shared resource provided at startup.
///
/// `T` may be unsized, so trait objects work:
///
/// ```rust,ignore
/// async fn ban(args: Args, messages: Dep<dyn MessageService>) { /* ... */ }
/// ```
pub struct Dep<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> Clone for Dep<T> {
    fn clone(&self) -> Self {
        Dep(self.0.clone())
    }
}

impl<T: ?Sized> Deref for Dep<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: ?Sized + Send + Sync + 'static> FromContext for Dep<T> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        ctx.resources()
            .get::<T>()
            .map(Dep)
            .ok_or(ExtractError::MissingResource(type_name::<T>()))
    }

    fn verify(resources: &Resources) -> ExtractResult<()> {
        if resources.contains::<T>() {
            Ok(())
        } else {
            Err(ExtractError::MissingResource(type_name::<T>()))
        }
    }
}

/// Optional parameters never fail, so they never fail verification either.
impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}
