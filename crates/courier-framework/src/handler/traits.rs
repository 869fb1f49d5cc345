//! The [`Handler`] trait and its blanket implementations.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::HandlerContext;
use crate::error::{BoxError, ExtractResult, HandlerResult};
use crate::extractor::FromContext;
use crate::resources::Resources;

// ============================================================================
// HandlerResponse - Normalize handler return values
// ============================================================================

/// A trait for values a handler may return.
#[async_trait]
pub trait HandlerResponse: Send {
    async fn into_result(self, ctx: Arc<HandlerContext>) -> HandlerResult;
}

#[async_trait]
impl HandlerResponse for () {
    async fn into_result(self, _ctx: Arc<HandlerContext>) -> HandlerResult {
        Ok(())
    }
}

/// `None` is treated like `()`.
#[async_trait]
impl<T: HandlerResponse> HandlerResponse for Option<T> {
    async fn into_result(self, ctx: Arc<HandlerContext>) -> HandlerResult {
        match self {
            Some(t) => t.into_result(ctx).await,
            None => Ok(()),
        }
    }
}

/// On `Err` the error is reported as a failed invocation.
#[async_trait]
impl<T, E> HandlerResponse for Result<T, E>
where
    T: HandlerResponse,
    E: Into<BoxError> + Send,
{
    async fn into_result(self, ctx: Arc<HandlerContext>) -> HandlerResult {
        match self {
            Ok(t) => t.into_result(ctx).await,
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// The core trait for event handlers.
///
/// Automatically implemented for async functions that take 0-12 parameters
/// implementing [`FromContext`] and return a [`HandlerResponse`].
#[async_trait]
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// Call the handler with the given context.
    async fn call(self, ctx: Arc<HandlerContext>) -> HandlerResult;

    /// Checks that every parameter can be supplied from `resources`.
    fn verify(resources: &Resources) -> ExtractResult<()>;
}

// ============================================================================
// BoxedHandler - Type-erased handler stored in the registry
// ============================================================================

/// A type-erased handler.
///
/// Internally a closure that captures the wrapped handler and calls it
/// with a cloned copy on each invocation.
pub type BoxedHandler =
    Arc<dyn Fn(Arc<HandlerContext>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Convert a handler function into a boxed handler.
pub fn into_handler<F, T>(f: F) -> BoxedHandler
where
    F: Handler<T>,
    T: 'static,
{
    Arc::new(move |ctx| f.clone().call(ctx))
}

// ============================================================================
// Handler implementations for functions
// ============================================================================

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        #[async_trait]
        impl<F, Fut, Res, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: HandlerResponse + 'static,
            $( $ty: FromContext + Send + 'static, )*
        {
            async fn call(self, ctx: Arc<HandlerContext>) -> HandlerResult {
                $(
                    let $ty = $ty::from_context(&ctx)?;
                )*

                let res = (self)($($ty,)*).await;
                res.into_result(ctx).await
            }

            fn verify(resources: &Resources) -> ExtractResult<()> {
                $(
                    $ty::verify(resources)?;
                )*
                Ok(())
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
