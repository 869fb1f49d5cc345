use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, trace};

use courier_core::ConversationId;

/// Something the scheduler can fire drain attempts at.
#[async_trait]
pub(crate) trait Drain: Send + Sync {
    async fn drain(self: Arc<Self>, conversation: ConversationId);

    fn evict_idle(&self, now: Instant) -> usize;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between releasing one queued task and attempting the next.
    #[serde(rename = "drain_interval_ms", with = "millis")]
    pub drain_interval: Duration,
    /// How often idle conversation state is swept. `None` disables the sweep.
    #[serde(rename = "idle_sweep_secs", with = "optional_secs")]
    pub idle_sweep: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(100),
            idle_sweep: Some(Duration::from_secs(300)),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.map_or(0, |d| d.as_secs()))
    }

    /// Zero turns the sweep off.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }
}

enum Command {
    Drain {
        target: Weak<dyn Drain>,
        conversation: ConversationId,
        delay: Duration,
    },
    Track(Weak<dyn Drain>),
}

/// The single timer task behind every rate limiter.
///
/// It only decides *when* a drain attempt happens; each attempt runs on its
/// own spawned task, so handler code never executes on the scheduler. Drains
/// are addressed through weak references and silently dropped once their
/// limiter is gone.
#[derive(Clone)]
pub struct DrainScheduler {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    config: SchedulerConfig,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DrainScheduler {
    /// Spawns the scheduler task on the current tokio runtime.
    pub fn start(config: SchedulerConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(receiver, cancel.clone(), config.idle_sweep));

        Self {
            commands,
            cancel,
            config,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn schedule(&self, target: Weak<dyn Drain>, conversation: ConversationId, delay: Duration) {
        let command = Command::Drain {
            target,
            conversation,
            delay,
        };
        if self.commands.send(command).is_err() {
            debug!(conversation, "Scheduler stopped, drain dropped");
        }
    }

    pub(crate) fn track(&self, target: Weak<dyn Drain>) {
        let _ = self.commands.send(Command::Track(target));
    }

    /// Stops the scheduler. Pending drain attempts are discarded, so tasks
    /// still queued in a limiter never start.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
            info!("Drain scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for DrainScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainScheduler")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run(
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    idle_sweep: Option<Duration>,
) {
    let mut queue: DelayQueue<(Weak<dyn Drain>, ConversationId)> = DelayQueue::new();
    let mut tracked: Vec<Weak<dyn Drain>> = Vec::new();

    let period = idle_sweep.unwrap_or(Duration::from_secs(3600));
    let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(Command::Drain { target, conversation, delay }) => {
                    queue.insert((target, conversation), delay);
                }
                Some(Command::Track(target)) => tracked.push(target),
                None => break,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let (target, conversation) = expired.into_inner();
                if let Some(target) = target.upgrade() {
                    trace!(limiter = %target.name(), conversation, "Drain attempt");
                    tokio::spawn(target.drain(conversation));
                }
            }
            _ = sweep.tick(), if idle_sweep.is_some() => {
                tracked.retain(|target| target.strong_count() > 0);
                let now = Instant::now();
                for target in tracked.iter().filter_map(Weak::upgrade) {
                    let evicted = target.evict_idle(now);
                    if evicted > 0 {
                        debug!(limiter = %target.name(), evicted, "Evicted idle conversations");
                    }
                }
            }
        }
    }

    if !queue.is_empty() {
        debug!(pending = queue.len(), "Discarding scheduled drain attempts");
    }
}
