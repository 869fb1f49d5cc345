//! Handler and service system.
//!
//! - **Handler** ([`traits`]): the [`Handler`] trait, implemented for async
//!   functions whose parameters are all [`FromContext`](crate::FromContext)
//!   extractors, plus [`HandlerResponse`] for normalizing return values
//! - **Service** ([`service`]): [`HandlerService`] adapts a handler to
//!   `tower::Service`, and [`DelayLayer`] applies a fixed pre-run delay
//!
//! ```rust,ignore
//! // No return value
//! async fn greet(event: Event) {}
//!
//! // Errors are logged with the handler name and conversation
//! async fn ban(args: Args, store: Dep<BanList>) -> anyhow::Result<()> {
//!     store.add(&args[0])?;
//!     Ok(())
//! }
//! ```

pub mod service;
pub mod traits;

pub use service::{BoxedHandlerService, DelayLayer, DelayService, HandlerService};
pub use traits::{BoxedHandler, Handler, HandlerResponse, into_handler};
