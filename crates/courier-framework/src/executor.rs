//! Policy-driven handler execution.
//!
//! | async | rate limited | behavior                                                   |
//! |-------|--------------|------------------------------------------------------------|
//! | no    | no           | runs on the dispatching task before dispatch continues    |
//! | yes   | no           | submitted to the worker pool                               |
//! | no    | yes          | admitted now and awaited, or queued and run by a drain     |
//! | yes   | yes          | admitted now or later, then submitted to the worker pool   |
//!
//! A fixed delay is part of the handler's service stack, so it always starts
//! after the rate limiter has admitted the invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::ServiceExt;
use tracing::{error, trace};

use courier_core::{ConversationId, HandlerCategory};

use crate::context::HandlerContext;
use crate::error::{BoxError, DispatchError, HandlerPanicked};
use crate::limiter::{Admission, DrainScheduler, LimitedTask, RateLimiter};
use crate::pool::TaskExecutor;
use crate::registry::{HandlerRegistry, RegisteredHandler, RegistrationId};

/// What became of one matched handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Ran to completion on the dispatching task.
    Completed,
    /// Handed to the worker pool.
    Spawned,
    /// Waiting for its rate limit window.
    Queued {
        position: usize,
        retry_after: Duration,
    },
}

/// Applies each registration's execution policy.
pub struct HandlerExecutor {
    pool: Arc<dyn TaskExecutor>,
    limiters: HashMap<RegistrationId, Arc<RateLimiter>>,
}

impl HandlerExecutor {
    /// Creates one rate limiter per rate-limited registration in `registry`.
    pub fn new(
        registry: &HandlerRegistry,
        pool: Arc<dyn TaskExecutor>,
        scheduler: &DrainScheduler,
    ) -> Self {
        let limiters = registry
            .iter()
            .filter_map(|handler| {
                let limit = handler.policy().rate_limit?;
                let limiter = RateLimiter::new(handler.name(), limit, scheduler).ok()?;
                Some((handler.id(), limiter))
            })
            .collect();

        Self { pool, limiters }
    }

    /// The limiter of a rate-limited registration.
    pub fn limiter(&self, id: RegistrationId) -> Option<&Arc<RateLimiter>> {
        self.limiters.get(&id)
    }

    pub fn limiters(&self) -> impl Iterator<Item = &Arc<RateLimiter>> {
        self.limiters.values()
    }

    /// Executes `handler` under its policy.
    ///
    /// Errors returned here were observed directly: a synchronous handler
    /// failing, or the pool rejecting an asynchronous one. Failures of
    /// deferred invocations are logged where they happen.
    pub async fn execute(
        &self,
        handler: &Arc<RegisteredHandler>,
        ctx: Arc<HandlerContext>,
    ) -> Result<Execution, DispatchError> {
        let policy = handler.policy();
        let limiter = policy
            .rate_limit
            .and_then(|_| self.limiters.get(&handler.id()));

        match (policy.is_async, limiter) {
            (false, None) => {
                invoke(handler, ctx).await?;
                Ok(Execution::Completed)
            }
            (true, None) => {
                let conversation = ctx.event().conversation_id;
                self.pool
                    .execute(logged_invocation(handler.clone(), ctx))
                    .map_err(|source| DispatchError::Rejected {
                        category: handler.category(),
                        handler: handler.name().to_string(),
                        conversation,
                        source,
                    })?;
                Ok(Execution::Spawned)
            }
            (is_async, Some(limiter)) => {
                let conversation = ctx.event().conversation_id;
                let task = if is_async {
                    pooled_task(self.pool.clone(), handler.clone(), ctx)
                } else {
                    inline_task(handler.clone(), ctx)
                };

                Ok(match limiter.submit(conversation, task).await {
                    Admission::Immediate if is_async => Execution::Spawned,
                    Admission::Immediate => Execution::Completed,
                    Admission::Queued {
                        position,
                        retry_after,
                    } => Execution::Queued {
                        position,
                        retry_after,
                    },
                })
            }
        }
    }
}

impl std::fmt::Debug for HandlerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerExecutor")
            .field("limiters", &self.limiters.len())
            .finish_non_exhaustive()
    }
}

/// Runs the handler's service stack once.
async fn invoke(handler: &RegisteredHandler, ctx: Arc<HandlerContext>) -> Result<(), DispatchError> {
    let conversation = ctx.event().conversation_id;
    trace!(handler = %handler.name(), conversation, "Invoking handler");

    handler
        .service()
        .oneshot(ctx)
        .await
        .map_err(|source| failure(handler.category(), handler.name(), conversation, source))
}

fn failure(
    category: HandlerCategory,
    handler: &str,
    conversation: ConversationId,
    source: BoxError,
) -> DispatchError {
    match source.downcast::<HandlerPanicked>() {
        Ok(panicked) => DispatchError::HandlerPanicked {
            category,
            handler: handler.to_string(),
            conversation,
            message: panicked.0,
        },
        Err(source) => DispatchError::HandlerFailed {
            category,
            handler: handler.to_string(),
            conversation,
            source,
        },
    }
}

/// Logs an isolated handler failure with its context.
pub(crate) fn log_failure(error: &DispatchError) {
    error!(
        category = %error.category(),
        handler = %error.handler(),
        conversation = error.conversation(),
        error = %error,
        "Handler failed"
    );
}

fn logged_invocation(handler: Arc<RegisteredHandler>, ctx: Arc<HandlerContext>) -> BoxFuture<'static, ()> {
    async move {
        if let Err(e) = invoke(&handler, ctx).await {
            log_failure(&e);
        }
    }
    .boxed()
}

fn inline_task(handler: Arc<RegisteredHandler>, ctx: Arc<HandlerContext>) -> LimitedTask {
    Box::new(move || logged_invocation(handler, ctx))
}

fn pooled_task(
    pool: Arc<dyn TaskExecutor>,
    handler: Arc<RegisteredHandler>,
    ctx: Arc<HandlerContext>,
) -> LimitedTask {
    Box::new(move || {
        async move {
            let conversation = ctx.event().conversation_id;
            let (category, name) = (handler.category(), handler.shared_name());
            if let Err(source) = pool.execute(logged_invocation(handler, ctx)) {
                log_failure(&DispatchError::Rejected {
                    category,
                    handler: name.to_string(),
                    conversation,
                    source,
                });
            }
        }
        .boxed()
    })
}
