//! Hook manager: configuration, discovery and the engine wired together.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock as StdRwLock};
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use hookbus_config::{ConfigError, ConfigStore, ConfigSummary, HookOverride, HooksConfig};
use hookbus_hooks::{
    EngineOptions, EngineStats, HookEngine, HookGate, HookHandler, HookRegistry, RegistryStats,
};
use hookbus_loader::{
    ChainResolver, HandlerResolver, HookLoader, LoaderStats, ProcessResolver, SourceDir,
};
use hookbus_types::{Event, EventType, ExecutionContext, HookEntry, HookResult};

use crate::history::{ExecutionHistory, ExecutionRecord, RunningAverages};

/// Per-hook enable flags, consulted by the engine right before each
/// invocation. Names without a flag fall back to the `enabled` override in
/// the configuration, then to enabled.
#[derive(Debug, Default)]
pub struct HookState {
    flags: StdRwLock<HashMap<String, bool>>,
    configured: StdRwLock<HashMap<String, bool>>,
}

impl HookState {
    pub fn set(&self, name: &str, enabled: bool) {
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), enabled);
    }

    /// Refresh the configured overrides from `config`.
    pub fn sync_config(&self, config: &HooksConfig) {
        let configured = config
            .hooks
            .iter()
            .filter_map(|(name, o)| o.enabled.map(|enabled| (name.clone(), enabled)))
            .collect();
        *self
            .configured
            .write()
            .unwrap_or_else(PoisonError::into_inner) = configured;
    }

    fn replace(&self, flags: HashMap<String, bool>, config: &HooksConfig) {
        *self.flags.write().unwrap_or_else(PoisonError::into_inner) = flags;
        self.sync_config(config);
    }
}

impl HookGate for HookState {
    fn is_enabled(&self, hook_name: &str) -> bool {
        if let Some(enabled) = self
            .flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hook_name)
        {
            return *enabled;
        }
        self.configured
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hook_name)
            .copied()
            .unwrap_or(true)
    }
}

/// Outcome of an initialize or reload pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitSummary {
    pub loaded: usize,
    pub registered: usize,
    /// Hook name to the reason its handler could not be registered.
    pub failed: BTreeMap<String, String>,
}

/// A loaded hook with its effective runtime settings.
#[derive(Debug, Clone, Serialize)]
pub struct HookInfo {
    #[serde(flatten)]
    pub entry: HookEntry,
    pub enabled: bool,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub initialized: bool,
    pub enabled: bool,
    pub config_path: String,
    pub total_hooks: usize,
    pub enabled_hooks: Vec<String>,
    pub disabled_hooks: Vec<String>,
    pub failed_hooks: BTreeMap<String, String>,
    pub event_keys: Vec<String>,
    pub registered_handlers: usize,
    pub by_source: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatistics {
    pub engine: EngineStats,
    pub registry: RegistryStats,
    pub loader: LoaderStats,
    pub averages: RunningAverages,
    pub history_size: usize,
}

/// Top-level entry point for hosts that raise hook events.
///
/// Construct one per hook bus and share it by `Arc`; there is no global
/// instance.
pub struct HookManager {
    store: Mutex<ConfigStore>,
    config: RwLock<HooksConfig>,
    loader: Arc<StdMutex<HookLoader>>,
    resolver: Arc<dyn HandlerResolver>,
    engine: Arc<HookEngine>,
    state: Arc<HookState>,
    entries: RwLock<BTreeMap<String, HookEntry>>,
    failures: RwLock<BTreeMap<String, String>>,
    history: StdMutex<ExecutionHistory>,
    initialized: AtomicBool,
    lifecycle: Mutex<()>,
}

/// Resolver used when the host supplies none: handler files run as
/// child processes.
pub fn default_resolver() -> Arc<dyn HandlerResolver> {
    Arc::new(ChainResolver::new(vec![Arc::new(ProcessResolver::new())]))
}

impl HookManager {
    pub fn new(mut store: ConfigStore, resolver: Arc<dyn HandlerResolver>) -> Self {
        let config = store.load_config(false);

        let registry = Arc::new(RwLock::new(HookRegistry::new()));
        let engine = Arc::new(HookEngine::new(
            registry,
            EngineOptions::from_config(&config.execution),
        ));
        let state = Arc::new(HookState::default());
        state.sync_config(&config);
        let gate: Arc<dyn HookGate> = state.clone();
        engine.set_gate(Some(gate));
        if !config.enabled {
            engine.disable();
        }

        Self {
            history: StdMutex::new(ExecutionHistory::new(config.max_history)),
            store: Mutex::new(store),
            config: RwLock::new(config),
            loader: Arc::new(StdMutex::new(HookLoader::new())),
            resolver,
            engine,
            state,
            entries: RwLock::new(BTreeMap::new()),
            failures: RwLock::new(BTreeMap::new()),
            initialized: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    /// Manager for `~/.hookbus/hooks.json5` with the default resolver.
    pub fn open_default() -> Result<Self, ConfigError> {
        Ok(Self::new(ConfigStore::open_default()?, default_resolver()))
    }

    /// Replace the loader, e.g. one with a custom environment lookup.
    pub fn with_loader(self, loader: HookLoader) -> Self {
        *lock(&self.loader) = loader;
        self
    }

    pub fn engine(&self) -> &Arc<HookEngine> {
        &self.engine
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> HooksConfig {
        self.config.read().await.clone()
    }

    pub async fn get_config_summary(&self) -> ConfigSummary {
        self.store.lock().await.get_config_summary()
    }

    /// Directories the loader scans under the current configuration.
    pub async fn source_dirs(&self) -> Vec<SourceDir> {
        let config = self.config.read().await;
        lock(&self.loader).source_dirs(&config)
    }

    /// Register a handler programmatically. Cleared by [`Self::reload_hooks`].
    pub async fn register_hook(
        &self,
        event_key: &str,
        handler: Arc<dyn HookHandler>,
        priority: i32,
    ) -> bool {
        self.engine.register(event_key, handler, priority).await
    }

    /// Discover hooks and register their handlers. Later calls are no-ops
    /// that report the current state; use [`Self::reload_hooks`] to rescan.
    pub async fn initialize(&self) -> InitSummary {
        let _guard = self.lifecycle.lock().await;
        if self.is_initialized() {
            return self.summary().await;
        }
        self.load_and_register().await
    }

    /// Re-read the configuration, clear the registry and initialize again.
    pub async fn reload_hooks(&self) -> InitSummary {
        let _guard = self.lifecycle.lock().await;
        tracing::info!("Reloading hooks");

        let config = self.store.lock().await.load_config(true);
        *self.config.write().await = config;
        self.engine.registry().write().await.clear(None);
        self.load_and_register().await
    }

    async fn load_and_register(&self) -> InitSummary {
        let config = self.config.read().await.clone();
        self.engine
            .set_options(EngineOptions::from_config(&config.execution));
        lock(&self.history).set_capacity(config.max_history);

        if !config.enabled {
            self.engine.disable();
            self.state.replace(HashMap::new(), &config);
            self.entries.write().await.clear();
            self.failures.write().await.clear();
            self.initialized.store(true, Ordering::SeqCst);
            tracing::info!("Hooks disabled by configuration");
            return InitSummary::default();
        }
        self.engine.enable();

        let entries = self.discover(&config).await;
        let mut failures = BTreeMap::new();
        let mut flags = HashMap::new();
        {
            let mut registry = self.engine.registry().write().await;
            for entry in &entries {
                let name = entry.name();
                flags.insert(name.to_string(), entry.policy.enabled);

                let handler = match self.resolver.resolve(entry, &config) {
                    Ok(handler) => handler,
                    Err(e) => {
                        tracing::warn!(hook = %name, "Failed to load hook handler: {e}");
                        failures.insert(name.to_string(), e.to_string());
                        continue;
                    }
                };

                let bound = entry
                    .metadata
                    .events
                    .iter()
                    .filter(|key| {
                        registry.register(
                            key,
                            handler.clone(),
                            entry.policy.priority,
                            Some(entry.policy.clone()),
                        )
                    })
                    .count();
                if bound == 0 {
                    failures.insert(
                        name.to_string(),
                        "no event key could be registered".to_string(),
                    );
                } else {
                    tracing::debug!(
                        hook = %name,
                        source = %entry.hook.source,
                        events = bound,
                        priority = entry.policy.priority,
                        "Registered hook"
                    );
                }
            }
        }

        self.state.replace(flags, &config);
        *self.entries.write().await = entries
            .into_iter()
            .map(|e| (e.name().to_string(), e))
            .collect();
        *self.failures.write().await = failures;
        self.initialized.store(true, Ordering::SeqCst);

        let summary = self.summary().await;
        tracing::info!(
            loaded = summary.loaded,
            registered = summary.registered,
            failed = summary.failed.len(),
            "Hook manager initialized"
        );
        summary
    }

    async fn discover(&self, config: &HooksConfig) -> Vec<HookEntry> {
        let loader = self.loader.clone();
        let config = config.clone();
        match tokio::task::spawn_blocking(move || lock(&loader).load_all_hooks(&config)).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Hook discovery task failed: {e}");
                Vec::new()
            }
        }
    }

    async fn summary(&self) -> InitSummary {
        let loaded = self.entries.read().await.len();
        let failed = self.failures.read().await.clone();
        InitSummary {
            loaded,
            registered: loaded.saturating_sub(failed.len()),
            failed,
        }
    }

    /// Build an event and run its hooks. Initializes on first use.
    ///
    /// Never fails: handler errors come back as unsuccessful results.
    pub async fn trigger_event(
        &self,
        event_type: EventType,
        action: &str,
        session_key: &str,
        context: Option<ExecutionContext>,
        data: Map<String, Value>,
    ) -> Vec<HookResult> {
        let mut event = Event::new(event_type, action, session_key).with_data(data);
        if let Some(context) = context {
            event = event.with_context(context);
        }
        self.trigger(event).await
    }

    /// Run hooks for a prebuilt event and record it in the history.
    pub async fn trigger(&self, event: Event) -> Vec<HookResult> {
        if !self.is_initialized() {
            self.initialize().await;
        }

        let record = ExecutionRecord::begin(&event);
        let start = Instant::now();
        let results = self.engine.trigger(event, None).await;
        let record = record.complete(&results, start.elapsed().as_secs_f64());

        tracing::debug!(
            event_type = %record.event_type,
            action = %record.action,
            hooks = record.hook_count,
            failures = record.failures,
            "Event triggered"
        );
        lock(&self.history).push(record);
        results
    }

    /// Enable a hook and persist the override. Returns whether the hook is
    /// currently loaded.
    pub async fn enable_hook(&self, name: &str) -> Result<bool, ConfigError> {
        self.set_hook_enabled(name, true).await
    }

    /// Disable a hook without unregistering it. Returns whether the hook is
    /// currently loaded.
    pub async fn disable_hook(&self, name: &str) -> Result<bool, ConfigError> {
        self.set_hook_enabled(name, false).await
    }

    async fn set_hook_enabled(&self, name: &str, enabled: bool) -> Result<bool, ConfigError> {
        let patch = HookOverride {
            enabled: Some(enabled),
            ..Default::default()
        };
        let config = self.store.lock().await.update_hook_config(name, patch)?;
        self.state.sync_config(&config);
        self.state.set(name, enabled);
        *self.config.write().await = config;

        let loaded = self.entries.read().await.contains_key(name);
        tracing::info!(hook = %name, enabled, loaded, "Hook state changed");
        Ok(loaded)
    }

    /// Persist a priority override and re-prioritize live registrations.
    /// Returns the number of registrations updated.
    pub async fn set_hook_priority(&self, name: &str, priority: i32) -> Result<usize, ConfigError> {
        let config = self
            .store
            .lock()
            .await
            .set_priority_override(name, Some(priority))?;
        *self.config.write().await = config;

        let updated = self
            .engine
            .registry()
            .write()
            .await
            .set_priority_by_name(name, priority);
        tracing::info!(hook = %name, priority, updated, "Hook priority changed");
        Ok(updated)
    }

    pub async fn get_hook(&self, name: &str) -> Option<HookInfo> {
        let entry = self.entries.read().await.get(name).cloned()?;
        Some(self.hook_info(entry).await)
    }

    pub async fn list_hooks(&self) -> Vec<HookInfo> {
        let entries: Vec<HookEntry> = self.entries.read().await.values().cloned().collect();
        let mut hooks = Vec::with_capacity(entries.len());
        for entry in entries {
            hooks.push(self.hook_info(entry).await);
        }
        hooks
    }

    async fn hook_info(&self, entry: HookEntry) -> HookInfo {
        let priority = self
            .config
            .read()
            .await
            .effective_priority(entry.name(), entry.metadata.priority);
        let load_error = self.failures.read().await.get(entry.name()).cloned();
        HookInfo {
            enabled: self.state.is_enabled(entry.name()),
            priority,
            load_error,
            entry,
        }
    }

    pub async fn get_status(&self) -> ManagerStatus {
        let config_path = self.store.lock().await.path().display().to_string();
        let (event_keys, registered_handlers) = {
            let registry = self.engine.registry().read().await;
            (registry.event_keys(), registry.len())
        };

        let entries = self.entries.read().await;
        let (enabled_hooks, disabled_hooks): (Vec<String>, Vec<String>) = entries
            .keys()
            .cloned()
            .partition(|name| self.state.is_enabled(name));
        let mut by_source = BTreeMap::new();
        for entry in entries.values() {
            *by_source
                .entry(entry.hook.source.as_str().to_string())
                .or_default() += 1;
        }

        ManagerStatus {
            initialized: self.is_initialized(),
            enabled: self.engine.is_enabled(),
            config_path,
            total_hooks: entries.len(),
            enabled_hooks,
            disabled_hooks,
            failed_hooks: self.failures.read().await.clone(),
            event_keys,
            registered_handlers,
            by_source,
        }
    }

    pub async fn get_statistics(&self) -> ManagerStatistics {
        let engine = self.engine.get_statistics().await;
        let registry = self.engine.registry().read().await.stats();
        let loader = self.loader_stats();
        let history = lock(&self.history);
        ManagerStatistics {
            engine,
            registry,
            loader,
            averages: history.averages().clone(),
            history_size: history.len(),
        }
    }

    /// Up to `limit` most recent execution records, oldest first.
    pub fn get_execution_history(&self, limit: Option<usize>) -> Vec<ExecutionRecord> {
        lock(&self.history).recent(limit)
    }

    pub(crate) fn loader_stats(&self) -> LoaderStats {
        lock(&self.loader).stats().clone()
    }

    pub(crate) async fn failed_hooks(&self) -> BTreeMap<String, String> {
        self.failures.read().await.clone()
    }

    /// Stop the engine, cancelling in-flight handlers.
    pub async fn shutdown(&self) -> bool {
        self.engine.shutdown().await
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
