//! Tower services wrapping handlers.
//!
//! [`HandlerService`] is the innermost building block: it invokes one boxed
//! handler and turns a panic in the handler body into an ordinary error.
//! Per-registration behavior is stacked on top as tower layers; currently
//! that is the fixed pre-run delay of [`DelayLayer`].
//!
//! ```text
//! ServiceBuilder::new()
//!     .option_layer(delay)          ← DelayLayer when fixed_delay > 0
//!     .service(HandlerService)      ← catch_unwind around the handler
//! ```
//!
//! The composed stack is type-erased into [`BoxedHandlerService`] and stored
//! alongside the registration.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Layer, Service, ServiceBuilder};

use crate::context::HandlerContext;
use crate::error::HandlerPanicked;
use crate::handler::traits::BoxedHandler;

/// A type-erased, `Clone + Send + Sync` tower service that processes
/// `Arc<HandlerContext>`.
pub type BoxedHandlerService = BoxCloneSyncService<Arc<HandlerContext>, (), BoxError>;

/// Builds the invocation stack for a handler.
pub(crate) fn build_service(handler: BoxedHandler, delay: Duration) -> BoxedHandlerService {
    let delay = (!delay.is_zero()).then(|| DelayLayer::new(delay));
    let service = ServiceBuilder::new()
        .option_layer(delay)
        .service(HandlerService::new(handler));
    BoxCloneSyncService::new(service)
}

// ============================================================================
// HandlerService
// ============================================================================

/// A tower [`Service`] that calls a single boxed handler.
#[derive(Clone)]
pub struct HandlerService {
    handler: BoxedHandler,
}

impl HandlerService {
    pub fn new(handler: BoxedHandler) -> Self {
        Self { handler }
    }
}

impl Service<Arc<HandlerContext>> for HandlerService {
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<HandlerContext>) -> Self::Future {
        let handler = self.handler.clone();
        Box::pin(async move {
            match AssertUnwindSafe(handler(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(Box::new(HandlerPanicked::from_payload(payload)) as BoxError),
            }
        })
    }
}

// ============================================================================
// DelayLayer
// ============================================================================

/// Sleeps for a fixed duration before calling the inner service.
///
/// The delay runs wherever the service is called, so for rate-limited
/// handlers it starts only after the limiter admitted the invocation.
#[derive(Debug, Clone, Copy)]
pub struct DelayLayer {
    delay: Duration,
}

impl DelayLayer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl<S> Layer<S> for DelayLayer {
    type Service = DelayService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DelayService {
            inner,
            delay: self.delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DelayService<S> {
    inner: S,
    delay: Duration,
}

impl<S> Service<Arc<HandlerContext>> for DelayService<S>
where
    S: Service<Arc<HandlerContext>, Response = (), Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, ctx: Arc<HandlerContext>) -> Self::Future {
        let mut inner = self.inner.clone();
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            inner.call(ctx).await
        })
    }
}
