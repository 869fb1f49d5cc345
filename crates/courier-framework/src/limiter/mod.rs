//! Per-conversation sliding-window rate limiting.
//!
//! Every rate-limited registration owns one [`RateLimiter`]. The limiter keeps
//! a [`SlidingWindow`] per conversation: the start times of recent
//! invocations plus a FIFO queue of invocations waiting for capacity.
//!
//! Invocations that find capacity run at once. The rest are queued and later
//! released by drain attempts, which the shared [`DrainScheduler`] fires at
//! the moment the oldest recorded start leaves the window. A drain releases
//! at most one queued invocation and then schedules the next attempt after a
//! short drain interval, so a backlog is paced rather than burst out.
//!
//! Time is read from `tokio::time::Instant`, so tests drive the limiter with
//! a paused clock.

mod rate_limiter;
mod scheduler;
mod window;

pub use rate_limiter::{Admission, LimitedTask, LimiterStats, RateLimiter};
pub use scheduler::{DrainScheduler, SchedulerConfig};
pub use window::SlidingWindow;
