//! # Courier Framework
//!
//! Dispatch machinery for the Courier bot engine:
//!
//! - **Handlers**: async functions whose parameters are [`FromContext`]
//!   extractors, wrapped as tower services ([`handler`])
//! - **Registry**: [`Registration`] declarations validated and indexed by
//!   [`HandlerRegistry`]
//! - **Execution**: [`HandlerExecutor`] applies each handler's policy using
//!   the [`WorkerPool`] and per-conversation [`RateLimiter`]s
//! - **Dispatch**: [`Dispatcher`] routes every [`NormalizedEvent`] to the
//!   handlers it matches
//!
//! [`NormalizedEvent`]: courier_core::NormalizedEvent

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod handler;
pub mod limiter;
pub mod pool;
pub mod registration;
pub mod registry;
pub mod resources;

pub use context::HandlerContext;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{
    BoxError, DispatchError, ExtractError, ExtractResult, HandlerPanicked, HandlerResult,
    PoolError,
};
pub use executor::{Execution, HandlerExecutor};
pub use extractor::{Args, Conversation, Dep, Event, FromContext, Sender};
pub use handler::{
    BoxedHandler, BoxedHandlerService, DelayLayer, Handler, HandlerResponse, HandlerService,
    into_handler,
};
pub use limiter::{
    Admission, DrainScheduler, LimitedTask, LimiterStats, RateLimiter, SchedulerConfig,
    SlidingWindow,
};
pub use pool::{PoolStats, Task, TaskExecutor, WorkerPool, WorkerPoolConfig};
pub use registration::Registration;
pub use registry::{
    DuplicateKeyPolicy, HandlerRegistry, RegisteredHandler, RegistrationId, RegistrationOutcome,
};
pub use resources::Resources;
