//! Runtime orchestration.
//!
//! [`CourierRuntime`] collects configuration, resources and registrations.
//! [`CourierRuntime::start`] freezes the registry and starts the worker pool
//! and drain scheduler, returning a [`RunningRuntime`] that pulls events from
//! any [`Stream`] until it ends or a shutdown signal arrives.
//!
//! ```rust,ignore
//! let mut runtime = CourierRuntime::builder().profile("production").build()?;
//! runtime.provide(MessageService::connect(token));
//! runtime.register(Registration::command(["ban"], ban))?;
//! runtime.register(Registration::command(["mute"], mute).run_async().rate_limit(1, Duration::from_secs(60)))?;
//!
//! let stats = runtime.start()?.run(updates).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::signal;
use tracing::{debug, info, warn};

use courier_core::{HandlerCategory, NormalizedEvent, RegistrationResult};
use courier_framework::{
    DispatchReport, Dispatcher, DrainScheduler, HandlerRegistry, Registration,
    RegistrationOutcome, WorkerPool,
};

use crate::config::{ConfigLoader, ConfigResult, CourierConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// A runtime being assembled: configuration loaded, handlers being registered.
pub struct CourierRuntime {
    config: CourierConfig,
    registry: HandlerRegistry,
}

impl CourierRuntime {
    /// Loads configuration from the default locations, falling back to the
    /// built-in defaults if that fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new().load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config ({e}), using defaults");
            CourierConfig::default()
        });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Initializes logging and an empty registry from `config`.
    ///
    /// The `[bot]` section is provided to handlers as a
    /// [`BotConfig`](crate::config::BotConfig) resource.
    pub fn from_config(config: &CourierConfig) -> Self {
        logging::init_from_config(&config.logging);

        let mut registry = HandlerRegistry::new().duplicate_keys(config.registry.duplicate_keys);
        registry.provide(config.bot.clone());

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            duplicate_keys = ?config.registry.duplicate_keys,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            registry,
        }
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Makes `value` available to handlers through `Dep<T>`.
    ///
    /// Resources must be provided before the handlers that depend on them
    /// are registered.
    pub fn provide<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.registry.provide(value);
        self
    }

    /// Like [`provide`](Self::provide), for trait objects and shared values.
    pub fn provide_arc<T: ?Sized + Send + Sync + 'static>(&mut self, value: Arc<T>) -> &mut Self {
        self.registry.provide_arc(value);
        self
    }

    pub fn register(&mut self, registration: Registration) -> RegistrationResult<RegistrationOutcome> {
        self.registry.register(registration)
    }

    /// Registers every declaration, continuing past rejected ones.
    ///
    /// Returns the number of handlers that ended up registered.
    pub fn register_all(&mut self, registrations: impl IntoIterator<Item = Registration>) -> usize {
        registrations
            .into_iter()
            .map(|registration| self.registry.register(registration))
            .filter(|outcome| outcome.as_ref().is_ok_and(RegistrationOutcome::is_registered))
            .count()
    }

    /// Starts the worker pool and drain scheduler.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> RuntimeResult<RunningRuntime> {
        let pool = WorkerPool::new(self.config.worker_pool.clone())?;
        let scheduler = DrainScheduler::start(self.config.rate_limiter);

        if self.registry.is_empty() {
            warn!("Starting without any registered handlers");
        }
        let dispatcher = Dispatcher::new(self.registry, Arc::new(pool.clone()), &scheduler);

        info!(
            core_workers = self.config.worker_pool.core_workers,
            max_workers = self.config.worker_pool.max_workers,
            "Courier runtime started"
        );

        Ok(RunningRuntime {
            dispatcher: Arc::new(dispatcher),
            pool,
            scheduler,
            grace_period: self.config.shutdown.grace_period(),
            counters: Counters::default(),
        })
    }
}

impl Default for CourierRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Totals over the lifetime of a [`RunningRuntime`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub events: u64,
    /// Events no handler matched.
    pub unmatched: u64,
    pub completed: u64,
    pub spawned: u64,
    pub queued: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    unmatched: AtomicU64,
    completed: AtomicU64,
    spawned: AtomicU64,
    queued: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, report: &DispatchReport) {
        self.events.fetch_add(1, Ordering::Relaxed);
        if !report.any_matched() {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
        }
        self.completed
            .fetch_add(report.completed as u64, Ordering::Relaxed);
        self.spawned.fetch_add(report.spawned as u64, Ordering::Relaxed);
        self.queued.fetch_add(report.queued as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            events: self.events.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            spawned: self.spawned.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// A started runtime.
pub struct RunningRuntime {
    dispatcher: Arc<Dispatcher>,
    pool: WorkerPool,
    scheduler: DrainScheduler,
    grace_period: Duration,
    counters: Counters,
}

impl RunningRuntime {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn has_handler(&self, category: HandlerCategory, key: Option<&str>) -> bool {
        self.dispatcher.has_handler(category, key)
    }

    pub fn stats(&self) -> RuntimeStats {
        self.counters.snapshot()
    }

    /// Dispatches a single event.
    pub async fn dispatch(&self, event: impl Into<Arc<NormalizedEvent>>) -> DispatchReport {
        let report = self.dispatcher.dispatch(event).await;
        self.counters.record(&report);
        report
    }

    /// Dispatches events until the stream ends or Ctrl+C / SIGTERM arrives,
    /// then shuts down.
    pub async fn run<S>(self, events: S) -> RuntimeResult<RuntimeStats>
    where
        S: Stream<Item = NormalizedEvent>,
    {
        let signal = shutdown_signal()?;
        info!("Courier runtime is now running. Press Ctrl+C to stop.");
        Ok(self.run_until(events, signal).await)
    }

    /// Dispatches events until the stream ends or `shutdown` completes, then
    /// shuts down.
    ///
    /// Events are dispatched one at a time in arrival order.
    pub async fn run_until<S, F>(self, events: S, shutdown: F) -> RuntimeStats
    where
        S: Stream<Item = NormalizedEvent>,
        F: Future<Output = ()>,
    {
        tokio::pin!(events);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.next() => match event {
                    Some(event) => {
                        self.dispatch(event).await;
                    }
                    None => {
                        info!("Event source ended");
                        break;
                    }
                },
            }
        }

        self.shutdown().await
    }

    /// Stops the drain scheduler, then drains the worker pool for up to the
    /// configured grace period.
    ///
    /// Invocations still waiting in a rate-limiter queue are dropped.
    pub async fn shutdown(self) -> RuntimeStats {
        let discarded: usize = self
            .dispatcher
            .executor()
            .limiters()
            .map(|limiter| limiter.stats().pending)
            .sum();
        if discarded > 0 {
            warn!(discarded, "Dropping queued rate-limited invocations");
        }

        self.scheduler.shutdown().await;
        let drained = self.pool.shutdown(self.grace_period).await;
        debug!(drained, "Shutdown complete");

        let stats = self.stats();
        info!(
            events = stats.events,
            unmatched = stats.unmatched,
            failed = stats.failed,
            "Courier runtime stopped"
        );
        stats
    }
}

/// Resolves on Ctrl+C or SIGTERM.
#[cfg(unix)]
fn shutdown_signal() -> RuntimeResult<impl Future<Output = ()>> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(RuntimeError::Signal)?;

    Ok(async move {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Ctrl+C handler failed");
                }
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    })
}

/// Resolves on Ctrl+C.
#[cfg(not(unix))]
fn shutdown_signal() -> RuntimeResult<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler failed");
        }
        info!("Received Ctrl+C, shutting down");
    })
}

/// Builder for a [`CourierRuntime`] with explicit configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: CourierConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<CourierRuntime> {
        let config = self.config_loader.load()?;
        Ok(CourierRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::stream;
    use tokio_test::{assert_err, assert_ok};

    use courier_framework::{Args, Dep, PoolError};

    use super::*;
    use crate::config::BotConfig;

    #[derive(Default)]
    struct Calls(AtomicUsize);

    impl Calls {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    async fn count(calls: Dep<Calls>) {
        calls.hit();
    }

    fn runtime_with(calls: &Arc<Calls>) -> CourierRuntime {
        let mut runtime = CourierRuntime::from_config(&CourierConfig::default());
        runtime.provide_arc(calls.clone());
        runtime
    }

    #[test]
    fn start_requires_tokio() {
        let runtime = CourierRuntime::from_config(&CourierConfig::default());
        let result = runtime.start();
        assert!(matches!(
            result,
            Err(RuntimeError::Pool(PoolError::NoRuntime))
        ));
    }

    #[test]
    fn registration_errors_are_returned() {
        let calls = Arc::new(Calls::default());
        let mut runtime = runtime_with(&calls);
        runtime
            .registry
            .set_duplicate_keys(courier_framework::DuplicateKeyPolicy::Reject);

        assert_ok!(runtime.register(Registration::command(["ping"], count)));
        assert_err!(runtime.register(Registration::command(["PING"], count)));
        assert_eq!(runtime.registry().len(), 1);
    }

    #[test]
    fn register_all_counts_accepted_handlers() {
        let calls = Arc::new(Calls::default());
        let mut runtime = runtime_with(&calls);

        async fn needs_missing(_service: Dep<std::net::TcpStream>) {}

        let registered = runtime.register_all([
            Registration::command(["ping"], count),
            Registration::command(Vec::<String>::new(), count),
            Registration::text(needs_missing),
            Registration::callback("ack", count),
        ]);
        assert_eq!(registered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_stream_ends() {
        let calls = Arc::new(Calls::default());
        let mut runtime = runtime_with(&calls);
        assert_ok!(runtime.register(Registration::command(["ping"], count)));
        let running = assert_ok!(runtime.start());

        let events = stream::iter([
            NormalizedEvent::command_message(1, 1, "ping", Vec::<String>::new()),
            NormalizedEvent::text_message(1, 1, "hello"),
            NormalizedEvent::command_message(2, 1, "ping", Vec::<String>::new()),
        ]);
        let stats = running.run_until(events, std::future::pending()).await;

        assert_eq!(calls.count(), 2);
        assert_eq!(stats.events, 3);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_future_stops_the_loop() {
        let runtime = CourierRuntime::from_config(&CourierConfig::default());
        let running = assert_ok!(runtime.start());

        let stats = running
            .run_until(stream::pending::<NormalizedEvent>(), async {})
            .await;
        assert_eq!(stats, RuntimeStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_invocations_are_dropped_at_shutdown() {
        let calls = Arc::new(Calls::default());
        let mut runtime = runtime_with(&calls);
        assert_ok!(runtime.register(
            Registration::command(["mute"], count).rate_limit(1, Duration::from_secs(60))
        ));
        let running = assert_ok!(runtime.start());

        let mute = || NormalizedEvent::command_message(5, 1, "mute", ["@spam"]);
        running.dispatch(mute()).await;
        let report = running.dispatch(mute()).await;
        assert_eq!(report.queued, 1);

        let stats = running.shutdown().await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(calls.count(), 1);
        assert_eq!(stats.queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_settings_are_a_resource() {
        let mut config = CourierConfig::default();
        config.bot.command_prefix = "!".to_string();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let mut runtime = CourierRuntime::from_config(&config);
        runtime.provide(tx);
        assert_ok!(runtime.register(Registration::command(
            ["prefix"],
            |bot: Dep<BotConfig>, args: Args, tx: Dep<tokio::sync::mpsc::UnboundedSender<String>>| async move {
                let _ = tx.send(format!("{}{}", bot.command_prefix, args.join(" ")));
            },
        )));

        let running = assert_ok!(runtime.start());
        running
            .dispatch(NormalizedEvent::command_message(1, 1, "prefix", ["help"]))
            .await;

        assert_eq!(rx.recv().await.as_deref(), Some("!help"));
        running.shutdown().await;
    }
}
