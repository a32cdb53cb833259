//! hookbus-config: Layered hook configuration.
//!
//! Values come from `~/.hookbus/hooks.json5` (JSON5), are then overridden
//! by a fixed set of environment variables, and finally validated.

mod env;
mod store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use hookbus_types::HookSource;

pub use env::{
    ENV_CONFIG, ENV_DEBUG, ENV_HOOK_TIMEOUT, ENV_HOOKS_DISABLED, ENV_HOOKS_ENABLED, ENV_MAX_CONCURRENT,
    apply_env_overrides, apply_env_overrides_from,
};
pub use store::{ConfigStore, ConfigSummary};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Which hook sources are scanned at load time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceToggles {
    #[serde(default = "default_true")]
    pub bundled: bool,
    #[serde(default = "default_true")]
    pub workspace: bool,
    #[serde(default = "default_true")]
    pub managed: bool,
    #[serde(default = "default_true")]
    pub plugin: bool,
    #[serde(default)]
    pub third_party: bool,
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            bundled: true,
            workspace: true,
            managed: true,
            plugin: true,
            third_party: false,
        }
    }
}

/// Where hooks are discovered from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// Scan hook directories on initialize. When false only programmatic
    /// registrations are active.
    #[serde(default = "default_true")]
    pub auto_discover: bool,
    /// Reload hooks when a source directory changes.
    #[serde(default)]
    pub watch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_dir: Option<PathBuf>,
    #[serde(default)]
    pub plugin_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub third_party_dirs: Vec<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            auto_discover: true,
            watch: false,
            bundled_dir: None,
            workspace_dir: None,
            managed_dir: None,
            plugin_dirs: Vec::new(),
            third_party_dirs: Vec::new(),
        }
    }
}

/// Limits applied when handlers run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Default per-handler timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub retry_count: u32,
    /// Maximum handlers running at once across all triggers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Log handler failures at debug instead of warn.
    #[serde(default)]
    pub fail_silent: bool,
    /// In sequential mode, keep running after a handler fails.
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    /// Run handlers one at a time in priority order instead of fanning out.
    #[serde(default)]
    pub sequential: bool,
    /// Serialize `trigger` calls behind a single lock.
    #[serde(default = "default_true")]
    pub serialize_triggers: bool,
    /// Seconds `shutdown` waits for in-flight handlers.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            retry_count: 0,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            fail_silent: false,
            continue_on_error: true,
            sequential: false,
            serialize_triggers: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

/// Per-hook override block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HookOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Extra environment passed to the hook's handler. Also satisfies
    /// `requires.env` checks.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl HookOverride {
    /// Merge `patch` into this block. Set fields win; empty collections are
    /// left alone.
    pub fn merge(&mut self, patch: HookOverride) {
        if patch.enabled.is_some() {
            self.enabled = patch.enabled;
        }
        if patch.priority.is_some() {
            self.priority = patch.priority;
        }
        if patch.timeout.is_some() {
            self.timeout = patch.timeout;
        }
        if patch.retry_count.is_some() {
            self.retry_count = patch.retry_count;
        }
        if !patch.tags.is_empty() {
            self.tags = patch.tags;
        }
        self.env.extend(patch.env);
    }
}

/// Security policy for discovered hooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// Sources whose hooks may be loaded.
    #[serde(default = "default_trusted_sources")]
    pub trusted_sources: Vec<HookSource>,
    /// Allow handlers that run as subprocesses.
    #[serde(default = "default_true")]
    pub allow_process_handlers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            trusted_sources: default_trusted_sources(),
            allow_process_handlers: true,
        }
    }
}

fn default_trusted_sources() -> Vec<HookSource> {
    vec![
        HookSource::Bundled,
        HookSource::Workspace,
        HookSource::Managed,
        HookSource::Plugin,
    ]
}

/// Top-level hook configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HooksConfig {
    /// Master switch for the whole hook system.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub sources: SourceToggles,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// When non-empty, only these hooks are loaded.
    #[serde(default)]
    pub include: Vec<String>,
    /// Hooks never loaded.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Per-hook overrides keyed by hook name.
    #[serde(default)]
    pub hooks: BTreeMap<String, HookOverride>,
    /// Priority overrides keyed by hook name. Win over `hooks.<name>.priority`.
    #[serde(default)]
    pub priority_overrides: BTreeMap<String, i32>,
    /// Seconds between background health checks.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    /// Execution records retained by the manager.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

fn default_health_check_interval() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL_SECS
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            sources: SourceToggles::default(),
            discovery: DiscoveryConfig::default(),
            include: Vec::new(),
            exclude: Vec::new(),
            execution: ExecutionConfig::default(),
            hooks: BTreeMap::new(),
            priority_overrides: BTreeMap::new(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            max_history: DEFAULT_MAX_HISTORY,
            security: SecurityConfig::default(),
        }
    }
}

impl HooksConfig {
    pub fn hook_override(&self, name: &str) -> Option<&HookOverride> {
        self.hooks.get(name)
    }

    /// Whether a hook is enabled, given the default declared by its manifest.
    pub fn is_hook_enabled(&self, name: &str, declared: bool) -> bool {
        self.hooks
            .get(name)
            .and_then(|o| o.enabled)
            .unwrap_or(declared)
    }

    /// Resolve a hook's priority: `priority_overrides`, then the per-hook
    /// block, then the manifest value.
    pub fn effective_priority(&self, name: &str, declared: i32) -> i32 {
        self.priority_overrides
            .get(name)
            .copied()
            .or_else(|| self.hooks.get(name).and_then(|o| o.priority))
            .unwrap_or(declared)
    }

    pub fn is_source_enabled(&self, source: HookSource) -> bool {
        match source {
            HookSource::Bundled => self.sources.bundled,
            HookSource::Workspace => self.sources.workspace,
            HookSource::Managed => self.sources.managed,
            HookSource::Plugin => self.sources.plugin,
            HookSource::ThirdParty => self.sources.third_party,
        }
    }

    pub fn is_trusted(&self, source: HookSource) -> bool {
        self.security.trusted_sources.contains(&source)
    }

    /// Whether the value at a dotted path (e.g. `"execution.sequential"`)
    /// is truthy: present, non-null, non-false, non-zero and non-empty.
    pub fn is_truthy_path(&self, path: &str) -> bool {
        let Ok(root) = serde_json::to_value(self) else {
            return false;
        };
        let mut current = &root;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        match current {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    /// Reset out-of-range values to defaults and resolve relative paths
    /// against `base_dir`. Returns the warnings that were logged.
    pub fn validate(&mut self, base_dir: Option<&Path>) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.execution.timeout == 0 {
            warnings.push(format!(
                "execution.timeout must be positive, using {DEFAULT_TIMEOUT_SECS}"
            ));
            self.execution.timeout = DEFAULT_TIMEOUT_SECS;
        }
        if self.execution.max_concurrent == 0 {
            warnings.push(format!(
                "execution.max_concurrent must be positive, using {DEFAULT_MAX_CONCURRENT}"
            ));
            self.execution.max_concurrent = DEFAULT_MAX_CONCURRENT;
        }
        if self.execution.shutdown_timeout == 0 {
            warnings.push(format!(
                "execution.shutdown_timeout must be positive, using {DEFAULT_SHUTDOWN_TIMEOUT_SECS}"
            ));
            self.execution.shutdown_timeout = DEFAULT_SHUTDOWN_TIMEOUT_SECS;
        }
        if self.health_check_interval == 0 {
            warnings.push(format!(
                "health_check_interval must be positive, using {DEFAULT_HEALTH_CHECK_INTERVAL_SECS}"
            ));
            self.health_check_interval = DEFAULT_HEALTH_CHECK_INTERVAL_SECS;
        }
        if self.max_history == 0 {
            warnings.push(format!(
                "max_history must be positive, using {DEFAULT_MAX_HISTORY}"
            ));
            self.max_history = DEFAULT_MAX_HISTORY;
        }
        for (name, hook) in self.hooks.iter_mut() {
            if hook.timeout == Some(0) {
                warnings.push(format!(
                    "hooks.{name}.timeout must be positive, falling back to the default"
                ));
                hook.timeout = None;
            }
        }

        let discovery = &mut self.discovery;
        for dir in [
            &mut discovery.bundled_dir,
            &mut discovery.workspace_dir,
            &mut discovery.managed_dir,
        ]
        .into_iter()
        .flatten()
        {
            *dir = resolve_path(dir, base_dir);
        }
        for dir in discovery
            .plugin_dirs
            .iter_mut()
            .chain(discovery.third_party_dirs.iter_mut())
        {
            *dir = resolve_path(dir, base_dir);
        }

        for warning in &warnings {
            tracing::warn!("Invalid hook config: {warning}");
        }
        warnings
    }
}

/// Expand `~/` and make relative paths absolute against `base_dir`
/// (or the current directory).
pub fn resolve_path(path: &Path, base_dir: Option<&Path>) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match base_dir {
        Some(base) => base.join(path),
        None => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Resolve the hookbus config directory (~/.hookbus/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".hookbus"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.hookbus/hooks.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("hooks.json5"))
}

/// Default directory for user-managed hooks (~/.hookbus/hooks/).
pub fn managed_hooks_dir() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("hooks"))
}

/// Parse configuration from a specific path, falling back to defaults if
/// the file does not exist. No environment overrides or validation.
pub fn load_config_from(path: &Path) -> Result<HooksConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(HooksConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: HooksConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Write configuration to a specific path, creating parent directories.
pub fn save_config_to(path: &Path, config: &HooksConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
