//! Hook engine: fans triggered events out to registered handlers.
//!
//! Every matching handler runs as its own tokio task. The result list is
//! index-aligned with launch order (priority order), never completion
//! order. A handler that errors, panics or times out yields a failed
//! [`HookResult`] without affecting its siblings.
//!
//! Timeouts and shutdown abandon the handler future: it is dropped at its
//! next suspension point, but side effects it already performed are not
//! rolled back. A timed-out attempt is not retried.
//!
//! With trigger serialization on, a handler may still trigger further
//! events: nested dispatch from inside a handler task bypasses the trigger
//! lock and runs under the outer handler's concurrency permit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use hookbus_config::ExecutionConfig;
use hookbus_types::{Event, HookResult};

use crate::handler::HookHandler;
use crate::registry::{HookRegistry, RegisteredHandler};

tokio::task_local! {
    /// Set while a handler invocation runs.
    static IN_HANDLER: ();
}

fn in_handler() -> bool {
    IN_HANDLER.try_with(|_| ()).is_ok()
}

/// Decides, right before invocation, whether a hook may run.
///
/// Disabled hooks are skipped but stay registered. The gate is keyed by
/// [`HookHandler::name`], so every handler sharing a disabled name is
/// skipped, whether discovered or registered programmatically.
pub trait HookGate: Send + Sync {
    fn is_enabled(&self, hook_name: &str) -> bool;
}

/// Engine tuning, usually derived from [`ExecutionConfig`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub default_timeout: Duration,
    pub default_retry_count: u32,
    pub max_concurrent: usize,
    pub fail_silent: bool,
    pub sequential: bool,
    pub continue_on_error: bool,
    pub serialize_triggers: bool,
    pub shutdown_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl EngineOptions {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            default_timeout: Duration::from_secs(config.timeout.max(1)),
            default_retry_count: config.retry_count,
            max_concurrent: config.max_concurrent.max(1),
            fail_silent: config.fail_silent,
            sequential: config.sequential,
            continue_on_error: config.continue_on_error,
            serialize_triggers: config.serialize_triggers,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout.max(1)),
        }
    }
}

/// Engine counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub enabled: bool,
    pub triggers: u64,
    pub executed: u64,
    pub successful: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub skipped_disabled: u64,
    /// Seconds summed over all executions.
    pub total_execution_time: f64,
    pub average_execution_time: f64,
    pub in_flight: usize,
    pub registered_handlers: usize,
    pub event_keys: usize,
}

#[derive(Clone)]
struct Settings {
    options: EngineOptions,
    semaphore: Arc<Semaphore>,
}

impl Settings {
    fn new(options: EngineOptions) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent));
        Self { options, semaphore }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

struct Execution {
    result: HookResult,
    outcome: Outcome,
}

/// One handler invocation, moved into its own task.
struct Invocation {
    handler: Arc<dyn HookHandler>,
    event: Arc<Event>,
    timeout: Duration,
    retries: u32,
    fail_silent: bool,
    /// `None` for nested dispatch, which reuses the caller's permit.
    semaphore: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
}

impl Invocation {
    async fn run(self) -> Execution {
        let name = self.handler.name().to_string();

        let _permit = match self.semaphore.clone() {
            Some(semaphore) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Self::cancelled(name, Duration::ZERO),
                permit = semaphore.acquire_owned() => permit.ok(),
            },
            None => None,
        };

        let start = Instant::now();
        let mut attempt = 0;
        let (mut result, outcome) = loop {
            let attempt_outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Self::cancelled(name, start.elapsed()),
                r = tokio::time::timeout(self.timeout, self.handler.handle(&self.event)) => r,
            };

            let (result, outcome) = match attempt_outcome {
                Ok(Ok(result)) if result.success => (result, Outcome::Completed),
                Ok(Ok(result)) => (result, Outcome::Failed),
                Ok(Err(e)) => (HookResult::failure(e.to_string()), Outcome::Failed),
                Err(_) => (
                    HookResult::failure(format!(
                        "Hook '{name}' timed out after {:.3}s",
                        self.timeout.as_secs_f64()
                    )),
                    Outcome::TimedOut,
                ),
            };

            if outcome != Outcome::Failed || attempt >= self.retries {
                break (result, outcome);
            }
            attempt += 1;
            tracing::debug!(hook = %name, attempt, "Retrying failed hook");
        };

        result.execution_time = start.elapsed().as_secs_f64();
        result.hook = Some(name.clone());

        if outcome != Outcome::Completed {
            let error = result.error.as_deref().unwrap_or("handler reported failure");
            if self.fail_silent {
                tracing::debug!(hook = %name, event_key = %self.event.action_key(), "Hook failed: {error}");
            } else {
                tracing::warn!(hook = %name, event_key = %self.event.action_key(), "Hook failed: {error}");
            }
        }

        Execution { result, outcome }
    }

    fn cancelled(name: String, elapsed: Duration) -> Execution {
        let mut result = HookResult::failure(format!("Hook '{name}' was cancelled"));
        result.execution_time = elapsed.as_secs_f64();
        result.hook = Some(name);
        Execution {
            result,
            outcome: Outcome::Cancelled,
        }
    }
}

/// Executes hooks registered in a [`HookRegistry`].
pub struct HookEngine {
    registry: Arc<RwLock<HookRegistry>>,
    settings: StdRwLock<Settings>,
    enabled: AtomicBool,
    trigger_lock: AsyncMutex<()>,
    tracker: TaskTracker,
    cancel: Mutex<CancellationToken>,
    gate: StdRwLock<Option<Arc<dyn HookGate>>>,
    stats: Mutex<EngineStats>,
}

impl HookEngine {
    pub fn new(registry: Arc<RwLock<HookRegistry>>, options: EngineOptions) -> Self {
        Self {
            registry,
            settings: StdRwLock::new(Settings::new(options)),
            enabled: AtomicBool::new(true),
            trigger_lock: AsyncMutex::new(()),
            tracker: TaskTracker::new(),
            cancel: Mutex::new(CancellationToken::new()),
            gate: StdRwLock::new(None),
            stats: Mutex::new(EngineStats::default()),
        }
    }

    /// Engine with an empty registry and default options.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(RwLock::new(HookRegistry::new())),
            EngineOptions::default(),
        )
    }

    pub fn registry(&self) -> &Arc<RwLock<HookRegistry>> {
        &self.registry
    }

    /// Register a handler directly with the engine's registry.
    pub async fn register(
        &self,
        event_key: &str,
        handler: Arc<dyn HookHandler>,
        priority: i32,
    ) -> bool {
        self.registry
            .write()
            .await
            .register(event_key, handler, priority, None)
    }

    pub fn options(&self) -> EngineOptions {
        self.settings_read().options.clone()
    }

    /// Replace engine options. Running handlers keep their old limits.
    pub fn set_options(&self, options: EngineOptions) {
        *self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Settings::new(options);
    }

    pub fn set_gate(&self, gate: Option<Arc<dyn HookGate>>) {
        *self.gate.write().unwrap_or_else(PoisonError::into_inner) = gate;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Resume triggering. After a shutdown this also re-arms cancellation
    /// and task tracking.
    pub fn enable(&self) {
        let mut cancel = lock(&self.cancel);
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
        self.tracker.reopen();
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Stop triggering new work. In-flight executions are unaffected.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Number of handler tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Run every handler registered for `event`'s type and `type:action`
    /// keys. Returns an empty list when disabled or nothing matches.
    ///
    /// `timeout` applies to handlers whose registration carries no timeout
    /// of its own; without it the engine default is used.
    pub async fn trigger(&self, event: Event, timeout: Option<Duration>) -> Vec<HookResult> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let settings = self.settings_read().clone();
        let nested = in_handler();
        let _serial = if settings.options.serialize_triggers && !nested {
            Some(self.trigger_lock.lock().await)
        } else {
            None
        };

        let handlers = self.registry.read().await.handlers_for_event(&event);
        lock(&self.stats).triggers += 1;
        if handlers.is_empty() {
            return Vec::new();
        }

        let gate = self
            .gate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let handlers: Vec<RegisteredHandler> = handlers
            .into_iter()
            .filter(|h| {
                let enabled = gate.as_ref().is_none_or(|g| g.is_enabled(h.name()));
                if !enabled {
                    tracing::debug!(hook = %h.name(), event_key = %h.event_key, "Skipping disabled hook");
                    lock(&self.stats).skipped_disabled += 1;
                }
                enabled
            })
            .collect();

        tracing::debug!(
            event_key = %event.action_key(),
            hook_count = handlers.len(),
            session_key = %event.session_key,
            "Dispatching event to hooks"
        );

        let event = Arc::new(event);
        let cancel = lock(&self.cancel).clone();
        let invocations: Vec<Invocation> = handlers
            .into_iter()
            .map(|h| Invocation {
                timeout: h
                    .policy
                    .timeout_duration()
                    .or(timeout)
                    .unwrap_or(settings.options.default_timeout),
                retries: h
                    .policy
                    .retry_count
                    .unwrap_or(settings.options.default_retry_count),
                fail_silent: h.policy.fail_silent || settings.options.fail_silent,
                handler: h.handler,
                event: event.clone(),
                semaphore: (!nested).then(|| settings.semaphore.clone()),
                cancel: cancel.child_token(),
            })
            .collect();

        let executions = if settings.options.sequential {
            self.run_sequential(invocations, settings.options.continue_on_error)
                .await
        } else {
            self.run_parallel(invocations).await
        };

        self.record(&executions).await;
        executions.into_iter().map(|e| e.result).collect()
    }

    async fn run_parallel(&self, invocations: Vec<Invocation>) -> Vec<Execution> {
        let names: Vec<String> = invocations
            .iter()
            .map(|i| i.handler.name().to_string())
            .collect();
        let handles: Vec<_> = invocations
            .into_iter()
            .map(|invocation| {
                self.tracker
                    .spawn(IN_HANDLER.scope((), invocation.run()))
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(names)
            .map(|(joined, name)| joined.unwrap_or_else(|e| panicked(name, e)))
            .collect()
    }

    async fn run_sequential(
        &self,
        invocations: Vec<Invocation>,
        continue_on_error: bool,
    ) -> Vec<Execution> {
        let mut executions = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            let name = invocation.handler.name().to_string();
            let execution = self
                .tracker
                .spawn(IN_HANDLER.scope((), invocation.run()))
                .await
                .unwrap_or_else(|e| panicked(name.clone(), e));
            let failed = execution.outcome != Outcome::Completed;
            executions.push(execution);
            if failed && !continue_on_error {
                tracing::debug!(hook = %name, "Hook chain stopped after failure");
                break;
            }
        }
        executions
    }

    async fn record(&self, executions: &[Execution]) {
        {
            let registry = self.registry.read().await;
            for execution in executions {
                registry.record_execution(execution.outcome == Outcome::Completed);
            }
        }

        let mut stats = lock(&self.stats);
        for execution in executions {
            stats.executed += 1;
            stats.total_execution_time += execution.result.execution_time;
            match execution.outcome {
                Outcome::Completed => stats.successful += 1,
                Outcome::Failed => stats.failed += 1,
                Outcome::TimedOut => {
                    stats.failed += 1;
                    stats.timed_out += 1;
                }
                Outcome::Cancelled => {
                    stats.failed += 1;
                    stats.cancelled += 1;
                }
            }
        }
    }

    pub async fn get_statistics(&self) -> EngineStats {
        let (registered_handlers, event_keys) = {
            let registry = self.registry.read().await;
            (registry.len(), registry.event_keys().len())
        };
        let mut stats = lock(&self.stats).clone();
        stats.enabled = self.is_enabled();
        stats.in_flight = self.in_flight();
        stats.registered_handlers = registered_handlers;
        stats.event_keys = event_keys;
        if stats.executed > 0 {
            stats.average_execution_time = stats.total_execution_time / stats.executed as f64;
        }
        stats
    }

    pub fn reset_statistics(&self) {
        *lock(&self.stats) = EngineStats::default();
    }

    /// Disable the engine, cancel in-flight handlers and wait for them to
    /// settle, up to the configured shutdown timeout. Returns whether every
    /// task settled in time.
    pub async fn shutdown(&self) -> bool {
        self.disable();
        lock(&self.cancel).cancel();
        self.tracker.close();

        let deadline = self.settings_read().options.shutdown_timeout;
        let pending = self.tracker.len();
        let settled = tokio::time::timeout(deadline, self.tracker.wait())
            .await
            .is_ok();

        if settled {
            tracing::info!(pending, "Hook engine shut down");
        } else {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Hook engine shutdown deadline reached with tasks still running"
            );
        }
        settled
    }

    fn settings_read(&self) -> std::sync::RwLockReadGuard<'_, Settings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panicked(name: String, error: tokio::task::JoinError) -> Execution {
    tracing::error!(hook = %name, "Hook task failed: {error}");
    let mut result = HookResult::failure(format!("Hook '{name}' panicked: {error}"));
    result.hook = Some(name);
    Execution {
        result,
        outcome: Outcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use hookbus_types::{EventType, HookInvocationPolicy};
    use std::sync::atomic::AtomicU32;

    fn delayed(name: &'static str, delay_ms: u64) -> Arc<dyn HookHandler> {
        handler_fn(name, move |_| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(HookResult::ok().with_message(name))
        })
    }

    fn result_names(results: &[HookResult]) -> Vec<&str> {
        results.iter().filter_map(|r| r.hook.as_deref()).collect()
    }

    fn command(action: &str) -> Event {
        Event::new(EventType::Command, action, "sess-1")
    }

    struct DenyList(Vec<&'static str>);

    impl HookGate for DenyList {
        fn is_enabled(&self, hook_name: &str) -> bool {
            !self.0.contains(&hook_name)
        }
    }

    #[tokio::test]
    async fn test_results_follow_priority_not_completion() {
        let engine = HookEngine::with_defaults();
        engine.register("command", delayed("p1", 5), 30).await;
        engine.register("command", delayed("p2", 150), 20).await;
        engine.register("command", delayed("p3", 5), 10).await;

        let results = engine.trigger(command("echo"), None).await;
        assert_eq!(result_names(&results), vec!["p1", "p2", "p3"]);
        assert!(results.iter().all(|r| r.success));
        assert!(results[1].execution_time >= 0.1);
    }

    #[tokio::test]
    async fn test_type_level_handlers_run_before_compound() {
        let engine = HookEngine::with_defaults();
        engine.register("command:echo", delayed("specific", 0), 100).await;
        engine.register("command", delayed("general", 0), 0).await;

        let results = engine.trigger(command("echo"), None).await;
        assert_eq!(result_names(&results), vec!["general", "specific"]);
    }

    #[tokio::test]
    async fn test_unregistered_handler_not_executed() {
        let engine = HookEngine::with_defaults();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let handler = handler_fn("counted", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(HookResult::ok())
            }
        });

        assert!(engine.register("command", handler.clone(), 5).await);
        engine.trigger(command("x"), None).await;
        assert!(engine.registry().write().await.unregister("command", &handler));

        let results = engine.trigger(command("x"), None).await;
        assert!(results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_handlers_returns_empty() {
        let engine = HookEngine::with_defaults();
        engine.register("session", delayed("other", 0), 0).await;
        assert!(engine.trigger(command("nothing"), None).await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_produces_failed_result() {
        let engine = HookEngine::with_defaults();
        engine.register("command", delayed("sleepy", 500), 0).await;
        engine.register("command", delayed("quick", 0), 0).await;

        let start = Instant::now();
        let results = engine
            .trigger(command("echo"), Some(Duration::from_millis(50)))
            .await;
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
        assert!(results[1].success);

        let stats = engine.get_statistics().await;
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.successful, 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let engine = HookEngine::with_defaults();
        engine
            .register(
                "command",
                handler_fn("broken", |_| async { anyhow::bail!("boom") }),
                10,
            )
            .await;
        engine
            .register(
                "command",
                handler_fn("panics", |_| async { panic!("handler panic") }),
                5,
            )
            .await;
        engine.register("command", delayed("fine", 0), 0).await;

        let results = engine.trigger(command("echo"), None).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].error.as_deref(), Some("boom"));
        assert!(!results[1].success);
        assert!(results[1].error.as_deref().unwrap().contains("panicked"));
        assert!(results[2].success);

        let registry_stats = engine.registry().read().await.stats();
        assert_eq!(registry_stats.failures, 2);
        assert_eq!(registry_stats.successes, 1);
    }

    #[tokio::test]
    async fn test_disabled_engine_does_nothing() {
        let engine = HookEngine::with_defaults();
        engine.register("command", delayed("a", 0), 0).await;

        engine.disable();
        assert!(engine.trigger(command("echo"), None).await.is_empty());

        engine.enable();
        assert_eq!(engine.trigger(command("echo"), None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_gate_skips_without_unregistering() {
        let engine = HookEngine::with_defaults();
        engine.register("command", delayed("muted", 0), 0).await;
        engine.register("command", delayed("loud", 0), 0).await;
        engine.set_gate(Some(Arc::new(DenyList(vec!["muted"]))));

        let results = engine.trigger(command("echo"), None).await;
        assert_eq!(result_names(&results), vec!["loud"]);
        assert_eq!(engine.registry().read().await.len(), 2);
        assert_eq!(engine.get_statistics().await.skipped_disabled, 1);
    }

    #[tokio::test]
    async fn test_gate_mutes_every_handler_sharing_a_name() {
        let engine = HookEngine::with_defaults();
        engine.register("command", delayed("shared", 0), 0).await;
        engine.register("command:echo", delayed("shared", 0), 0).await;
        engine.register("command", delayed("other", 0), 0).await;
        engine.set_gate(Some(Arc::new(DenyList(vec!["shared"]))));

        let results = engine.trigger(command("echo"), None).await;
        assert_eq!(result_names(&results), vec!["other"]);
        assert_eq!(engine.get_statistics().await.skipped_disabled, 2);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let engine = HookEngine::with_defaults();
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let flaky = handler_fn("flaky", move |_| {
            let a = a.clone();
            async move {
                if a.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(HookResult::failure("not yet"))
                } else {
                    Ok(HookResult::ok())
                }
            }
        });
        let policy = HookInvocationPolicy {
            retry_count: Some(2),
            ..Default::default()
        };
        engine
            .registry()
            .write()
            .await
            .register("command", flaky, 0, Some(policy));

        let results = engine.trigger(command("echo"), None).await;
        assert!(results[0].success);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sequential_stops_on_error() {
        let options = EngineOptions {
            sequential: true,
            continue_on_error: false,
            ..Default::default()
        };
        let engine = HookEngine::new(Arc::new(RwLock::new(HookRegistry::new())), options);
        engine.register("command", delayed("first", 0), 10).await;
        engine
            .register(
                "command",
                handler_fn("breaks", |_| async { anyhow::bail!("stop here") }),
                5,
            )
            .await;
        engine.register("command", delayed("never", 0), 0).await;

        let results = engine.trigger(command("echo"), None).await;
        assert_eq!(result_names(&results), vec!["first", "breaks"]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        let engine = Arc::new(HookEngine::with_defaults());
        engine.register("command", delayed("forever", 10_000), 0).await;

        let trigger = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.trigger(command("echo"), None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.in_flight(), 1);

        assert!(engine.shutdown().await);
        let results = trigger.await.unwrap();
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("cancelled"));
        assert!(engine.trigger(command("echo"), None).await.is_empty());
        assert_eq!(engine.get_statistics().await.cancelled, 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_without_serialization() {
        let options = EngineOptions {
            serialize_triggers: false,
            ..Default::default()
        };
        let engine = Arc::new(HookEngine::new(
            Arc::new(RwLock::new(HookRegistry::new())),
            options,
        ));
        engine.register("command", delayed("slow", 200), 0).await;

        let start = Instant::now();
        let (a, b) = tokio::join!(
            engine.trigger(command("a"), None),
            engine.trigger(command("b"), None)
        );
        assert_eq!(a.len() + b.len(), 2);
        assert!(start.elapsed() < Duration::from_millis(390));
    }

    fn counting_failure(name: &'static str, attempts: Arc<AtomicU32>) -> Arc<dyn HookHandler> {
        handler_fn(name, move |_| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(HookResult::failure("nope"))
            }
        })
    }

    #[tokio::test]
    async fn test_hook_retry_count_overrides_engine_default() {
        let options = EngineOptions {
            default_retry_count: 2,
            ..Default::default()
        };
        let engine = HookEngine::new(Arc::new(RwLock::new(HookRegistry::new())), options);
        let once = Arc::new(AtomicU32::new(0));
        let inherited = Arc::new(AtomicU32::new(0));
        {
            let mut registry = engine.registry().write().await;
            let no_retries = HookInvocationPolicy {
                retry_count: Some(0),
                ..Default::default()
            };
            registry.register(
                "command",
                counting_failure("once", once.clone()),
                1,
                Some(no_retries),
            );
            registry.register(
                "command",
                counting_failure("inherited", inherited.clone()),
                0,
                None,
            );
        }

        let results = engine.trigger(command("echo"), None).await;
        assert!(results.iter().all(|r| !r.success));
        assert_eq!(once.load(Ordering::SeqCst), 1);
        assert_eq!(inherited.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timed_out_attempt_is_not_retried() {
        let options = EngineOptions {
            default_retry_count: 3,
            ..Default::default()
        };
        let engine = HookEngine::new(Arc::new(RwLock::new(HookRegistry::new())), options);
        engine.register("command", delayed("sleepy", 500), 0).await;

        let start = Instant::now();
        let results = engine
            .trigger(command("echo"), Some(Duration::from_millis(50)))
            .await;
        assert!(start.elapsed() < Duration::from_millis(400));
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_serialized_triggers_run_one_at_a_time() {
        let engine = Arc::new(HookEngine::with_defaults());
        assert!(engine.options().serialize_triggers);
        engine.register("command", delayed("slow", 150), 0).await;

        let start = Instant::now();
        let (a, b) = tokio::join!(
            engine.trigger(command("a"), None),
            engine.trigger(command("b"), None)
        );
        assert_eq!(a.len() + b.len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_handler_can_trigger_nested_event() {
        let options = EngineOptions {
            max_concurrent: 1,
            ..Default::default()
        };
        let engine = Arc::new(HookEngine::new(
            Arc::new(RwLock::new(HookRegistry::new())),
            options,
        ));
        assert!(engine.options().serialize_triggers);
        engine.register("session", delayed("inner", 0), 0).await;

        let nested_engine = engine.clone();
        let outer = handler_fn("outer", move |_| {
            let engine = nested_engine.clone();
            async move {
                let nested = engine
                    .trigger(Event::new(EventType::Session, "start", "sess-1"), None)
                    .await;
                let inner = nested.iter().filter(|r| r.success).count();
                Ok(HookResult::ok().with_message(format!("inner ok: {inner}")))
            }
        });
        engine.register("command", outer, 0).await;

        let start = Instant::now();
        let results = engine
            .trigger(command("echo"), Some(Duration::from_millis(500)))
            .await;
        assert!(start.elapsed() < Duration::from_millis(400));
        assert!(results[0].success, "{:?}", results[0].error);
        assert_eq!(results[0].messages, vec!["inner ok: 1"]);
        assert_eq!(engine.get_statistics().await.triggers, 2);
    }
}
