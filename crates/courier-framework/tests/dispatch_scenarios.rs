//! End-to-end dispatch scenarios on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use courier_core::{ConversationId, NormalizedEvent};
use courier_framework::{
    Args, Conversation, Dep, DispatchReport, Dispatcher, DrainScheduler, HandlerRegistry,
    Registration, SchedulerConfig, WorkerPool, WorkerPoolConfig,
};

type Entry = (&'static str, ConversationId, Vec<String>, Instant);

struct Recorder(mpsc::UnboundedSender<Entry>);

impl Recorder {
    fn record(&self, name: &'static str, conversation: ConversationId, args: &[String]) {
        let _ = self.0.send((name, conversation, args.to_vec(), Instant::now()));
    }
}

async fn ban(args: Args, Conversation(conversation): Conversation, recorder: Dep<Recorder>) {
    recorder.record("ban", conversation, &args);
}

async fn mute(args: Args, Conversation(conversation): Conversation, recorder: Dep<Recorder>) {
    recorder.record("mute", conversation, &args);
}

struct Bot {
    dispatcher: Dispatcher,
    pool: WorkerPool,
    scheduler: DrainScheduler,
    entries: mpsc::UnboundedReceiver<Entry>,
}

impl Bot {
    fn new(build: impl FnOnce(&mut HandlerRegistry)) -> Self {
        let (tx, entries) = mpsc::unbounded_channel();
        let mut registry = HandlerRegistry::new();
        registry.provide(Recorder(tx));
        build(&mut registry);

        let pool = WorkerPool::new(WorkerPoolConfig::default()).unwrap();
        let scheduler = DrainScheduler::start(SchedulerConfig::default());
        let dispatcher = Dispatcher::new(registry, Arc::new(pool.clone()), &scheduler);
        Self {
            dispatcher,
            pool,
            scheduler,
            entries,
        }
    }

    async fn command(&self, conversation: ConversationId, name: &str, args: &[&str]) -> DispatchReport {
        let event = NormalizedEvent::command_message(conversation, 1, name, args.iter().copied());
        self.dispatcher.dispatch(event).await
    }

    async fn next(&mut self) -> Entry {
        self.entries.recv().await.unwrap()
    }

    async fn stop(self) {
        self.scheduler.shutdown().await;
        self.pool.shutdown(Duration::from_secs(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn moderation_commands_respect_mute_limit() {
    let mut bot = Bot::new(|registry| {
        registry.register(Registration::command(["ban"], ban)).unwrap();
        registry
            .register(Registration::command(["mute"], mute).rate_limit(1, Duration::from_secs(60)))
            .unwrap();
    });
    let t0 = Instant::now();

    let report = bot.command(42, "ban", &["@spam"]).await;
    assert_eq!(report.completed, 1);
    let (name, conversation, args, _) = bot.next().await;
    assert_eq!((name, conversation), ("ban", 42));
    assert_eq!(args, ["@spam"]);

    assert_eq!(bot.command(42, "mute", &["@spam", "10m"]).await.completed, 1);
    assert_eq!(bot.next().await.0, "mute");

    tokio::time::advance(Duration::from_secs(1)).await;
    let report = bot.command(42, "mute", &["@troll"]).await;
    assert_eq!(report.queued, 1);

    // Another conversation is not affected by conversation 42's window.
    assert_eq!(bot.command(7, "mute", &["@other"]).await.completed, 1);
    let (_, conversation, _, _) = bot.next().await;
    assert_eq!(conversation, 7);

    // Bans are never limited.
    assert_eq!(bot.command(42, "ban", &["@troll"]).await.completed, 1);
    assert_eq!(bot.next().await.0, "ban");

    let (name, conversation, args, at) = bot.next().await;
    assert_eq!((name, conversation), ("mute", 42));
    assert_eq!(args, ["@troll"]);
    assert!(at - t0 >= Duration::from_secs(60));
    assert!(at - t0 < Duration::from_secs(61));

    bot.stop().await;
}

#[tokio::test(start_paused = true)]
async fn window_never_exceeded_under_burst() {
    let mut bot = Bot::new(|registry| {
        registry
            .register(Registration::command(["ping"], mute).rate_limit(2, Duration::from_secs(1)))
            .unwrap();
    });

    let mut queued = 0;
    for _ in 0..6 {
        queued += bot.command(5, "ping", &[]).await.queued;
    }
    assert_eq!(queued, 4);

    let mut starts = Vec::new();
    for _ in 0..6 {
        starts.push(bot.next().await.3);
    }
    for (i, start) in starts.iter().enumerate() {
        let in_window = starts[..=i]
            .iter()
            .filter(|earlier| *start - **earlier < Duration::from_secs(1))
            .count();
        assert!(in_window <= 2, "more than two starts within one second");
    }

    bot.stop().await;
}

#[tokio::test(start_paused = true)]
async fn delay_starts_after_admission() {
    let mut bot = Bot::new(|registry| {
        registry
            .register(
                Registration::command(["slow"], mute)
                    .rate_limit(1, Duration::from_secs(1))
                    .delay(Duration::from_millis(500)),
            )
            .unwrap();
    });
    let t0 = Instant::now();

    bot.command(3, "slow", &["first"]).await;
    bot.command(3, "slow", &["second"]).await;

    let (_, _, args, first) = bot.next().await;
    assert_eq!(args, ["first"]);
    assert!(first - t0 >= Duration::from_millis(500));
    assert!(first - t0 < Duration::from_secs(1));

    let (_, _, args, second) = bot.next().await;
    assert_eq!(args, ["second"]);
    assert!(second - t0 >= Duration::from_millis(1500));

    bot.stop().await;
}

#[tokio::test(start_paused = true)]
async fn async_limited_handlers_go_through_pool() {
    let mut bot = Bot::new(|registry| {
        registry
            .register(
                Registration::command(["report"], ban)
                    .rate_limit(1, Duration::from_secs(10))
                    .run_async(),
            )
            .unwrap();
    });
    let t0 = Instant::now();

    assert_eq!(bot.command(9, "report", &["a"]).await.spawned, 1);
    assert_eq!(bot.command(9, "report", &["b"]).await.queued, 1);

    assert_eq!(bot.next().await.2, ["a"]);
    let (_, _, args, at) = bot.next().await;
    assert_eq!(args, ["b"]);
    assert!(at - t0 >= Duration::from_secs(10));

    bot.stop().await;
}
