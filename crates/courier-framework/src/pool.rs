//! Bounded worker pool for asynchronous handlers.
//!
//! The pool keeps `core_workers` tasks alive for its whole lifetime. Work
//! goes through a bounded queue; when the queue is full the pool grows up to
//! `max_workers`, and the extra workers retire again after sitting idle for
//! `keep_alive`. Beyond that, submissions are rejected with
//! [`PoolError::Saturated`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{HandlerPanicked, PoolError};

/// A unit of work for the pool.
pub type Task = BoxFuture<'static, ()>;

/// Something that can run tasks in the background.
///
/// The executor only talks to this trait, so tests and embedders can swap
/// the pool for their own scheduling.
pub trait TaskExecutor: Send + Sync {
    /// Accepts `task` for execution or rejects it immediately.
    fn execute(&self, task: Task) -> Result<(), PoolError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Workers kept alive for the lifetime of the pool.
    pub core_workers: usize,
    /// Upper bound on workers, reached only when the queue is full.
    pub max_workers: usize,
    pub queue_capacity: usize,
    /// Idle time after which a worker above `core_workers` retires.
    #[serde(rename = "keep_alive_secs", with = "secs")]
    pub keep_alive: Duration,
    /// Prefix of worker names in logs.
    pub name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            core_workers: 4,
            max_workers: 10,
            queue_capacity: 50,
            keep_alive: Duration::from_secs(60),
            name_prefix: "courier-worker".to_string(),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub queued: usize,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>;

struct PoolInner {
    config: WorkerPoolConfig,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: SharedReceiver,
    workers: Mutex<JoinSet<()>>,
    worker_count: Arc<AtomicUsize>,
    next_worker: AtomicUsize,
    handle: Handle,
}

/// A cloneable handle to a bounded worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Starts the core workers on the current tokio runtime.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        let handle = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));

        let pool = Self {
            inner: Arc::new(PoolInner {
                sender: Mutex::new(Some(sender)),
                receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
                workers: Mutex::new(JoinSet::new()),
                worker_count: Arc::new(AtomicUsize::new(0)),
                next_worker: AtomicUsize::new(0),
                handle,
                config,
            }),
        };

        for _ in 0..pool.inner.config.core_workers {
            pool.inner.worker_count.fetch_add(1, Ordering::SeqCst);
            pool.spawn_worker(None, None);
        }

        info!(
            workers = pool.inner.config.core_workers,
            max_workers = pool.inner.config.max_workers,
            queue_capacity = pool.inner.config.queue_capacity,
            "Worker pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PoolStats {
        let queued = self
            .inner
            .sender
            .lock()
            .as_ref()
            .map(|sender| sender.max_capacity() - sender.capacity())
            .unwrap_or(0);
        PoolStats {
            workers: self.inner.worker_count.load(Ordering::SeqCst),
            queued,
        }
    }

    /// Spawns one worker. Extra workers carry an idle timeout and may start
    /// with the task that triggered their creation.
    fn spawn_worker(&self, first: Option<Task>, keep_alive: Option<Duration>) {
        let index = self.inner.next_worker.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}-{index}", self.inner.config.name_prefix);
        let receiver = self.inner.receiver.clone();
        let count = self.inner.worker_count.clone();

        let mut workers = self.inner.workers.lock();
        // Retired extra workers stay in the set until joined.
        while workers.try_join_next().is_some() {}

        workers.spawn_on(
            async move {
                debug!(worker = %name, "Worker started");
                if let Some(task) = first {
                    run_task(&name, task).await;
                }
                worker_loop(&name, receiver, keep_alive).await;
                count.fetch_sub(1, Ordering::SeqCst);
                debug!(worker = %name, "Worker stopped");
            },
            &self.inner.handle,
        );
    }

    /// Worker handles held by the pool, finished ones included.
    #[cfg(test)]
    fn tracked_workers(&self) -> usize {
        self.inner.workers.lock().len()
    }

    /// Reserves a worker slot above the core size, if any remain.
    fn try_reserve_extra(&self) -> bool {
        let max = self.inner.config.max_workers;
        self.inner
            .worker_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    /// Stops accepting tasks and waits up to `grace` for queued and running
    /// tasks to finish. Whatever is still running afterwards is aborted.
    ///
    /// Returns `true` if everything finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if self.inner.sender.lock().take().is_none() {
            return true;
        }
        let mut workers = std::mem::take(&mut *self.inner.workers.lock());

        let drained = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if drained {
            info!("Worker pool stopped");
        } else {
            warn!(
                remaining = workers.len(),
                grace_secs = grace.as_secs_f64(),
                "Worker pool did not drain in time, aborting remaining tasks"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
        drained
    }
}

impl TaskExecutor for WorkerPool {
    fn execute(&self, task: Task) -> Result<(), PoolError> {
        let sender = self.inner.sender.lock().clone().ok_or(PoolError::ShutDown)?;

        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                if self.try_reserve_extra() {
                    self.spawn_worker(Some(task), Some(self.inner.config.keep_alive));
                    Ok(())
                } else {
                    Err(PoolError::Saturated {
                        workers: self.inner.worker_count.load(Ordering::SeqCst),
                        queued: sender.max_capacity(),
                    })
                }
            }
            Err(TrySendError::Closed(_)) => Err(PoolError::ShutDown),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn worker_loop(name: &str, receiver: SharedReceiver, keep_alive: Option<Duration>) {
    loop {
        let next = async { receiver.lock().await.recv().await };
        let task = match keep_alive {
            Some(idle) => match tokio::time::timeout(idle, next).await {
                Ok(task) => task,
                Err(_) => {
                    debug!(worker = %name, "Idle worker retiring");
                    return;
                }
            },
            None => next.await,
        };

        match task {
            Some(task) => run_task(name, task).await,
            None => return,
        }
    }
}

async fn run_task(name: &str, task: Task) {
    if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
        let panicked = HandlerPanicked::from_payload(payload);
        error!(worker = %name, error = %panicked, "Task panicked");
    }
}
