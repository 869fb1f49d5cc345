//! Event dispatcher.
//!
//! The [`Dispatcher`] routes each [`NormalizedEvent`] through the registry in
//! a fixed order:
//!
//! 1. reply-to-bot handlers, if the message replies to the bot
//! 2. any-message handlers whose content filter matches, if the message
//!    carries content
//! 3. text handlers, if the message has non-empty text
//! 4. the handler bound to the command, if there is one
//! 5. the handler bound to the callback action, if this is a callback
//!
//! Every matching handler is executed under its own policy. A failing
//! handler is logged and counted; it never stops the remaining steps.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new(registry, Arc::new(pool), &scheduler);
//! let report = dispatcher.dispatch(NormalizedEvent::command_message(42, 7, "ban", ["@spam"])).await;
//! assert!(report.any_matched());
//! ```

use std::sync::Arc;

use tracing::{Instrument, debug, debug_span, info, trace, warn};

use courier_core::{HandlerCategory, NormalizedEvent};

use crate::context::HandlerContext;
use crate::error::DispatchError;
use crate::executor::{Execution, HandlerExecutor, log_failure};
use crate::limiter::DrainScheduler;
use crate::pool::TaskExecutor;
use crate::registry::{HandlerRegistry, RegisteredHandler};

/// Counts of what happened to the handlers matched by one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub completed: usize,
    pub spawned: usize,
    pub queued: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn any_matched(&self) -> bool {
        self.matched > 0
    }

    fn record(&mut self, result: &Result<Execution, DispatchError>) {
        self.matched += 1;
        match result {
            Ok(Execution::Completed) => self.completed += 1,
            Ok(Execution::Spawned) => self.spawned += 1,
            Ok(Execution::Queued { .. }) => self.queued += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Routes events to registered handlers.
///
/// `Dispatcher` is `Send + Sync`; concurrent `dispatch` calls are allowed and
/// share rate-limit state.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    executor: HandlerExecutor,
}

impl Dispatcher {
    /// Freezes `registry` and prepares the rate limiters it needs.
    pub fn new(
        registry: HandlerRegistry,
        pool: Arc<dyn TaskExecutor>,
        scheduler: &DrainScheduler,
    ) -> Self {
        let executor = HandlerExecutor::new(&registry, pool, scheduler);
        info!(
            handlers = registry.len(),
            commands = registry.keyed_count(HandlerCategory::Command),
            callbacks = registry.keyed_count(HandlerCategory::CallbackAction),
            rate_limited = executor.limiters().count(),
            "Registration complete"
        );
        Self {
            registry: Arc::new(registry),
            executor,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &HandlerExecutor {
        &self.executor
    }

    /// See [`HandlerRegistry::has_handler`].
    pub fn has_handler(&self, category: HandlerCategory, key: Option<&str>) -> bool {
        self.registry.has_handler(category, key)
    }

    /// Dispatches one event.
    ///
    /// Returns once every synchronous, immediately admitted handler has
    /// finished; queued and pooled invocations continue in the background.
    pub async fn dispatch(&self, event: impl Into<Arc<NormalizedEvent>>) -> DispatchReport {
        let event = event.into();
        let span = debug_span!(
            "dispatch",
            conversation = event.conversation_id,
            user = event.user_id
        );
        self.dispatch_inner(event).instrument(span).await
    }

    async fn dispatch_inner(&self, event: Arc<NormalizedEvent>) -> DispatchReport {
        let mut report = DispatchReport::default();

        if event.is_reply_to_bot_message {
            for handler in self.registry.lookup_all(HandlerCategory::ReplyToBotMessage) {
                self.run(handler, &event, &mut report).await;
            }
        }

        if event.has_content() {
            for handler in self.registry.lookup_all(HandlerCategory::AnyMessage) {
                if handler.matches(&event.content_types) {
                    self.run(handler, &event, &mut report).await;
                }
            }
        }

        if event.text().is_some() {
            for handler in self.registry.lookup_all(HandlerCategory::Text) {
                self.run(handler, &event, &mut report).await;
            }
        }

        if let Some(command) = event.command() {
            // Command keys are stored lower-cased.
            let command = command.to_lowercase();
            match self.registry.lookup(HandlerCategory::Command, &command) {
                Some(handler) => self.run(handler, &event, &mut report).await,
                None => trace!(command = %command, "No handler for command"),
            }
        }

        if event.is_callback {
            let action = event.action().unwrap_or_default();
            match self.registry.lookup(HandlerCategory::CallbackAction, action) {
                Some(handler) => self.run(handler, &event, &mut report).await,
                None => warn!(action, "No handler for callback action"),
            }
        }

        debug!(
            matched = report.matched,
            queued = report.queued,
            failed = report.failed,
            "Dispatch finished"
        );
        report
    }

    async fn run(
        &self,
        handler: &Arc<RegisteredHandler>,
        event: &Arc<NormalizedEvent>,
        report: &mut DispatchReport,
    ) {
        let ctx = Arc::new(HandlerContext::new(
            event.clone(),
            self.registry.resources().clone(),
            handler.category(),
            handler.shared_name(),
        ));

        let result = self.executor.execute(handler, ctx).await;
        if let Err(e) = &result {
            log_failure(e);
        }
        report.record(&result);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("executor", &self.executor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use courier_core::ContentKind;
    use parking_lot::Mutex;

    use super::*;
    use crate::extractor::Dep;
    use crate::handler::Handler;
    use crate::limiter::SchedulerConfig;
    use crate::pool::{WorkerPool, WorkerPoolConfig};
    use crate::registration::Registration;

    #[derive(Default)]
    struct Log(Mutex<Vec<&'static str>>);

    impl Log {
        fn push(&self, entry: &'static str) {
            self.0.lock().push(entry);
        }

        fn take(&self) -> Vec<&'static str> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    fn record(name: &'static str) -> impl Handler<(Dep<Log>,)> {
        move |log: Dep<Log>| async move { log.push(name) }
    }

    fn registry(log: &Arc<Log>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.provide_arc(log.clone());
        registry
    }

    fn dispatcher(registry: HandlerRegistry) -> (Dispatcher, WorkerPool, DrainScheduler) {
        let pool = WorkerPool::new(WorkerPoolConfig::default()).unwrap();
        let scheduler = DrainScheduler::start(SchedulerConfig::default());
        let dispatcher = Dispatcher::new(registry, Arc::new(pool.clone()), &scheduler);
        (dispatcher, pool, scheduler)
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry.register(Registration::command(["ban"], record("command"))).unwrap();
        registry.register(Registration::text(record("text"))).unwrap();
        registry
            .register(Registration::any_message(record("photos")).filter(ContentKind::Photo))
            .unwrap();
        registry.register(Registration::any_message(record("any"))).unwrap();
        registry.register(Registration::reply_to_bot(record("reply"))).unwrap();
        registry.register(Registration::callback("approve", record("callback"))).unwrap();

        let (dispatcher, _pool, _scheduler) = dispatcher(registry);
        let event = NormalizedEvent::command_message(1, 2, "ban", ["@spam"]).replying_to_bot();
        let report = dispatcher.dispatch(event).await;

        assert_eq!(log.take(), ["reply", "any", "text", "command"]);
        assert_eq!(report.matched, 4);
        assert_eq!(report.completed, 4);
    }

    #[tokio::test]
    async fn any_message_filters_are_or_combined() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry
            .register(
                Registration::any_message(record("media"))
                    .filters([ContentKind::Photo, ContentKind::Video]),
            )
            .unwrap();
        let (dispatcher, _pool, _scheduler) = dispatcher(registry);

        let video = NormalizedEvent::new(1, 2).with_content(ContentKind::Video);
        dispatcher.dispatch(video).await;
        let sticker = NormalizedEvent::new(1, 2).with_content(ContentKind::Sticker);
        dispatcher.dispatch(sticker).await;
        // No content at all: the any-message step is skipped entirely.
        dispatcher.dispatch(NormalizedEvent::new(1, 2)).await;

        assert_eq!(log.take(), ["media"]);
    }

    #[tokio::test]
    async fn unknown_command_matches_nothing() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry.register(Registration::command(["ban"], record("ban"))).unwrap();
        let (dispatcher, _pool, _scheduler) = dispatcher(registry);

        let report = dispatcher
            .dispatch(NormalizedEvent::command_message(1, 2, "unknown", Vec::<String>::new()))
            .await;

        assert!(!report.any_matched());
        assert!(log.take().is_empty());
    }

    #[tokio::test]
    async fn commands_match_regardless_of_case() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry.register(Registration::command(["ban"], record("ban"))).unwrap();
        let (dispatcher, _pool, _scheduler) = dispatcher(registry);

        let report = dispatcher
            .dispatch(NormalizedEvent::command_message(1, 2, "Ban", ["@spam"]))
            .await;

        assert_eq!(report.completed, 1);
        assert_eq!(log.take(), ["ban"]);
    }

    #[tokio::test]
    async fn later_command_registration_wins() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry.register(Registration::command(["start"], record("first"))).unwrap();
        registry.register(Registration::command(["start"], record("second"))).unwrap();
        let (dispatcher, _pool, _scheduler) = dispatcher(registry);

        let report = dispatcher
            .dispatch(NormalizedEvent::command_message(1, 2, "start", Vec::<String>::new()))
            .await;

        assert_eq!(report.matched, 1);
        assert_eq!(log.take(), ["second"]);
    }

    #[tokio::test]
    async fn empty_text_skips_text_handlers() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry.register(Registration::text(record("text"))).unwrap();
        let (dispatcher, _pool, _scheduler) = dispatcher(registry);

        let event = NormalizedEvent::new(1, 2)
            .with_text("")
            .with_content(ContentKind::Photo);
        let report = dispatcher.dispatch(event).await;

        assert_eq!(report.matched, 0);
    }

    #[tokio::test]
    async fn callback_without_handler_is_ignored() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry.register(Registration::callback("approve", record("approve"))).unwrap();
        let (dispatcher, _pool, _scheduler) = dispatcher(registry);

        let report = dispatcher.dispatch(NormalizedEvent::callback(1, 2, "reject")).await;
        assert!(!report.any_matched());

        let report = dispatcher.dispatch(NormalizedEvent::callback(1, 2, "approve")).await;
        assert_eq!(report.completed, 1);
        assert_eq!(log.take(), ["approve"]);
    }

    async fn explode() {
        panic!("handler bug");
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry
            .register(Registration::text(|| async {
                Err::<(), _>(std::io::Error::other("storage unavailable"))
            }))
            .unwrap();
        registry.register(Registration::text(explode)).unwrap();
        registry.register(Registration::text(record("after"))).unwrap();
        let (dispatcher, _pool, _scheduler) = dispatcher(registry);

        let report = dispatcher
            .dispatch(NormalizedEvent::text_message(1, 2, "hello"))
            .await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(log.take(), ["after"]);
    }

    #[tokio::test]
    async fn any_message_failures_are_isolated() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry.register(Registration::any_message(explode)).unwrap();
        registry
            .register(Registration::any_message(record("after")).filter(ContentKind::Photo))
            .unwrap();
        let (dispatcher, _pool, _scheduler) = dispatcher(registry);

        let photo = NormalizedEvent::new(1, 2).with_content(ContentKind::Photo);
        let report = dispatcher.dispatch(photo).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(log.take(), ["after"]);
    }

    #[tokio::test]
    async fn async_handlers_run_on_pool() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry
            .register(Registration::text(record("pooled")).run_async())
            .unwrap();
        let (dispatcher, pool, _scheduler) = dispatcher(registry);

        let report = dispatcher
            .dispatch(NormalizedEvent::text_message(1, 2, "hello"))
            .await;
        assert_eq!(report.spawned, 1);

        assert!(pool.shutdown(std::time::Duration::from_secs(1)).await);
        assert_eq!(log.take(), ["pooled"]);
    }

    #[tokio::test]
    async fn has_handler_reflects_registry() {
        let log = Arc::new(Log::default());
        let mut registry = registry(&log);
        registry.register(Registration::command(["start"], record("start"))).unwrap();
        let (dispatcher, _pool, _scheduler) = dispatcher(registry);

        assert!(dispatcher.has_handler(HandlerCategory::Command, Some("start")));
        assert!(!dispatcher.has_handler(HandlerCategory::Command, Some("stop")));
        assert!(!dispatcher.has_handler(HandlerCategory::Text, None));
    }
}
