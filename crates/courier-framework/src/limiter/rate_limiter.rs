use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use courier_core::{ConfigurationWarning, ConversationId, RateLimit};

use super::scheduler::{Drain, DrainScheduler};
use super::window::SlidingWindow;

/// A deferred invocation. It is only built into a future once admitted, so
/// queued work holds no running state.
pub type LimitedTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// How a submission was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The task was started right away.
    Immediate,
    /// The task was queued behind `position - 1` others. `retry_after` is the
    /// earliest time the window frees up.
    Queued {
        position: usize,
        retry_after: Duration,
    },
}

/// Occupancy across all conversations of one limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    pub conversations: usize,
    pub pending: usize,
}

/// Sliding-window limiter for one registration.
///
/// Conversations are independent: each has its own window and queue behind
/// its own lock, and a busy conversation never delays another.
pub struct RateLimiter {
    name: String,
    limit: RateLimit,
    drain_interval: Duration,
    states: DashMap<ConversationId, Mutex<SlidingWindow<LimitedTask>>>,
    scheduler: DrainScheduler,
    this: Weak<RateLimiter>,
}

enum DrainStep {
    Run(LimitedTask),
    Retry(Duration),
    Done,
}

impl RateLimiter {
    /// Creates a limiter driven by `scheduler`.
    ///
    /// A limit that can never admit anything is rejected, since its queue
    /// would never drain.
    pub fn new(
        name: impl Into<String>,
        limit: RateLimit,
        scheduler: &DrainScheduler,
    ) -> Result<Arc<Self>, ConfigurationWarning> {
        let name = name.into();
        if limit.is_degenerate() {
            return Err(ConfigurationWarning::DegenerateRateLimit { handler: name });
        }

        let limiter = Arc::new_cyclic(|this| Self {
            name,
            limit,
            drain_interval: scheduler.config().drain_interval,
            states: DashMap::new(),
            scheduler: scheduler.clone(),
            this: this.clone(),
        });
        let tracked: Weak<dyn Drain> = Arc::downgrade(&limiter) as Weak<dyn Drain>;
        scheduler.track(tracked);
        Ok(limiter)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> &RateLimit {
        &self.limit
    }

    /// Runs `f` on the state of `conversation`, creating it on first use.
    ///
    /// The map entry stays borrowed for the duration of `f`, so the idle
    /// sweep cannot remove a state that is in use.
    fn with_state<R>(
        &self,
        conversation: ConversationId,
        f: impl FnOnce(&mut SlidingWindow<LimitedTask>) -> R,
    ) -> R {
        if let Some(state) = self.states.get(&conversation) {
            return f(&mut state.lock());
        }
        let state = self.states.entry(conversation).or_default();
        let mut window = state.lock();
        f(&mut window)
    }

    /// Starts `task` now if the conversation's window allows it, otherwise
    /// queues it.
    ///
    /// An immediately admitted task is awaited before this returns. A queued
    /// one will be started by a later drain attempt, in submission order.
    pub async fn submit(&self, conversation: ConversationId, task: LimitedTask) -> Admission {
        let now = Instant::now();
        let decision = self.with_state(conversation, |window| {
            if window.try_admit(&self.limit, now) {
                Ok(task)
            } else {
                let position = window.enqueue(task);
                let retry_after = window.wait_time(&self.limit, now);
                Err((position, retry_after, window.claim_drain()))
            }
        });

        match decision {
            Ok(task) => {
                trace!(limiter = %self.name, conversation, "Admitted immediately");
                task().await;
                Admission::Immediate
            }
            Err((position, retry_after, schedule)) => {
                debug!(
                    limiter = %self.name,
                    conversation,
                    position,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limited, queued"
                );
                if schedule {
                    self.schedule_drain(conversation, retry_after);
                }
                Admission::Queued {
                    position,
                    retry_after,
                }
            }
        }
    }

    fn schedule_drain(&self, conversation: ConversationId, delay: Duration) {
        let target: Weak<dyn Drain> = self.this.clone() as Weak<dyn Drain>;
        self.scheduler.schedule(target, conversation, delay);
    }

    /// One drain attempt: release at most one queued task, then arrange the
    /// next attempt while anything is still queued.
    async fn drain_once(&self, conversation: ConversationId) {
        let now = Instant::now();
        let step = self.with_state(conversation, |window| {
            match window.admit_next(&self.limit, now) {
                Some(task) => DrainStep::Run(task),
                None if window.pending() == 0 => {
                    window.release_drain();
                    DrainStep::Done
                }
                None => DrainStep::Retry(window.wait_time(&self.limit, now)),
            }
        });

        match step {
            DrainStep::Run(task) => {
                trace!(limiter = %self.name, conversation, "Releasing queued task");
                task().await;
                let more = self.with_state(conversation, |window| {
                    if window.pending() == 0 {
                        window.release_drain();
                        false
                    } else {
                        true
                    }
                });
                if more {
                    self.schedule_drain(conversation, self.drain_interval);
                }
            }
            DrainStep::Retry(wait) => self.schedule_drain(conversation, wait),
            DrainStep::Done => {}
        }
    }

    /// Removes conversations with no queued work and no start left in the
    /// window. Returns how many were removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, state| !state.get_mut().is_idle(&self.limit, now));
        before.saturating_sub(self.states.len())
    }

    /// Number of tasks waiting in `conversation`.
    pub fn pending(&self, conversation: ConversationId) -> usize {
        self.states
            .get(&conversation)
            .map(|state| state.lock().pending())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> LimiterStats {
        self.states
            .iter()
            .fold(LimiterStats::default(), |mut stats, state| {
                stats.conversations += 1;
                stats.pending += state.lock().pending();
                stats
            })
    }
}

#[async_trait]
impl Drain for RateLimiter {
    async fn drain(self: Arc<Self>, conversation: ConversationId) {
        self.drain_once(conversation).await;
    }

    fn evict_idle(&self, now: Instant) -> usize {
        RateLimiter::evict_idle(self, now)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::limiter::SchedulerConfig;

    fn record(tx: &mpsc::UnboundedSender<(u32, Instant)>, id: u32) -> LimitedTask {
        let tx = tx.clone();
        Box::new(move || {
            async move {
                let _ = tx.send((id, Instant::now()));
            }
            .boxed()
        })
    }

    fn scheduler() -> DrainScheduler {
        DrainScheduler::start(SchedulerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn queued_tasks_start_when_window_frees() {
        let scheduler = scheduler();
        let limiter = assert_ok!(RateLimiter::new("test", RateLimit::new(2, Duration::from_secs(1)), &scheduler));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let t0 = Instant::now();

        assert_eq!(limiter.submit(1, record(&tx, 1)).await, Admission::Immediate);
        assert_eq!(limiter.submit(1, record(&tx, 2)).await, Admission::Immediate);

        tokio::time::advance(Duration::from_millis(50)).await;
        let admission = limiter.submit(1, record(&tx, 3)).await;
        assert_eq!(
            admission,
            Admission::Queued {
                position: 1,
                retry_after: Duration::from_millis(950)
            }
        );

        for expected in 1..=3 {
            let (id, at) = rx.recv().await.unwrap();
            assert_eq!(id, expected);
            if id == 3 {
                assert!(at - t0 >= Duration::from_secs(1));
            }
        }
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn queue_preserves_submission_order() {
        let scheduler = scheduler();
        let limiter = assert_ok!(RateLimiter::new("test", RateLimit::new(1, Duration::from_secs(1)), &scheduler));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for id in 0..5 {
            limiter.submit(9, record(&tx, id)).await;
        }
        assert_eq!(limiter.pending(9), 4);

        let mut starts = Vec::new();
        for expected in 0..5 {
            let (id, at) = rx.recv().await.unwrap();
            assert_eq!(id, expected);
            starts.push(at);
        }
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
        assert_eq!(limiter.stats().pending, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn conversations_are_independent() {
        let scheduler = scheduler();
        let limiter = assert_ok!(RateLimiter::new("test", RateLimit::new(1, Duration::from_secs(60)), &scheduler));
        let runs = Arc::new(AtomicUsize::new(0));

        let count = |runs: &Arc<AtomicUsize>| -> LimitedTask {
            let runs = runs.clone();
            Box::new(move || {
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            })
        };

        assert_eq!(limiter.submit(1, count(&runs)).await, Admission::Immediate);
        assert!(matches!(limiter.submit(1, count(&runs)).await, Admission::Queued { .. }));
        assert_eq!(limiter.submit(2, count(&runs)).await, Admission::Immediate);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(
            limiter.stats(),
            LimiterStats {
                conversations: 2,
                pending: 1
            }
        );
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn limits_that_never_admit_are_rejected() {
        let scheduler = scheduler();

        let err = assert_err!(RateLimiter::new("zero", RateLimit::per_seconds(0, 10), &scheduler));
        assert_eq!(
            err,
            ConfigurationWarning::DegenerateRateLimit {
                handler: "zero".to_string()
            }
        );
        assert_err!(RateLimiter::new("instant", RateLimit::new(3, Duration::ZERO), &scheduler));
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_conversations_are_evicted() {
        let scheduler = scheduler();
        let limiter = assert_ok!(RateLimiter::new("test", RateLimit::new(1, Duration::from_secs(1)), &scheduler));
        let (tx, _rx) = mpsc::unbounded_channel();

        limiter.submit(1, record(&tx, 1)).await;
        assert_eq!(limiter.evict_idle(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.evict_idle(Instant::now()), 1);
        assert_eq!(limiter.stats().conversations, 0);
        scheduler.shutdown().await;
    }
}
