//! Cached, persisted configuration store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use hookbus_types::HookSource;

use crate::{
    ConfigError, HookOverride, HooksConfig, apply_env_overrides_from, config_file_path,
    load_config_from, save_config_to,
};

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Read-only projection of the active configuration for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub config_path: PathBuf,
    pub enabled: bool,
    pub debug: bool,
    pub enabled_sources: Vec<HookSource>,
    pub trusted_sources: Vec<HookSource>,
    pub auto_discover: bool,
    pub watch: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub timeout: u64,
    pub retry_count: u32,
    pub max_concurrent: usize,
    pub sequential: bool,
    pub overridden_hooks: Vec<String>,
    pub priority_overrides: BTreeMap<String, i32>,
    pub health_check_interval: u64,
    pub max_history: usize,
}

/// Loads, caches and persists the hook configuration file.
///
/// Loading never fails: a missing or malformed file yields defaults with a
/// warning. Environment overrides and validation run on every (re)load.
pub struct ConfigStore {
    path: PathBuf,
    cached: Option<HooksConfig>,
    env: EnvLookup,
}

impl ConfigStore {
    /// Create a store for a specific file, reading overrides from the
    /// process environment.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: None,
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    /// Create a store for `~/.hookbus/hooks.json5`, loading `.env` first.
    pub fn open_default() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Ok(Self::new(config_file_path()?))
    }

    /// Replace the environment lookup used for overrides.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(lookup);
        self.cached = None;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the cached configuration, or (re)load it from disk.
    pub fn load_config(&mut self, force_reload: bool) -> HooksConfig {
        if !force_reload {
            if let Some(config) = &self.cached {
                return config.clone();
            }
        }

        let mut config = match load_config_from(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Failed to load hook config, using defaults: {e}"
                );
                HooksConfig::default()
            }
        };

        let applied = apply_env_overrides_from(&mut config, &self.env);
        if !applied.is_empty() {
            tracing::debug!(?applied, "Applied environment overrides");
        }
        config.validate(self.path.parent());

        self.cached = Some(config.clone());
        config
    }

    /// Persist `config` and make it the cached value.
    pub fn save_config(&mut self, config: &HooksConfig) -> Result<(), ConfigError> {
        save_config_to(&self.path, config)?;
        self.cached = Some(config.clone());
        tracing::debug!(path = %self.path.display(), "Saved hook config");
        Ok(())
    }

    /// Merge `patch` into one hook's override block and persist.
    ///
    /// The patch is applied to the file as written, so environment
    /// overrides never leak into it. Returns the reloaded configuration.
    pub fn update_hook_config(
        &mut self,
        name: &str,
        patch: HookOverride,
    ) -> Result<HooksConfig, ConfigError> {
        let mut raw = load_config_from(&self.path)?;
        raw.hooks.entry(name.to_string()).or_default().merge(patch);
        save_config_to(&self.path, &raw)?;
        tracing::debug!(hook = %name, path = %self.path.display(), "Updated hook config");
        Ok(self.load_config(true))
    }

    /// Set (or clear, with `None`) a priority override and persist.
    pub fn set_priority_override(
        &mut self,
        name: &str,
        priority: Option<i32>,
    ) -> Result<HooksConfig, ConfigError> {
        let mut raw = load_config_from(&self.path)?;
        match priority {
            Some(p) => {
                raw.priority_overrides.insert(name.to_string(), p);
            }
            None => {
                raw.priority_overrides.remove(name);
            }
        }
        save_config_to(&self.path, &raw)?;
        Ok(self.load_config(true))
    }

    pub fn get_config_summary(&mut self) -> ConfigSummary {
        let config = self.load_config(false);
        let enabled_sources = [
            HookSource::Bundled,
            HookSource::Workspace,
            HookSource::Managed,
            HookSource::ThirdParty,
            HookSource::Plugin,
        ]
        .into_iter()
        .filter(|s| config.is_source_enabled(*s))
        .collect();

        ConfigSummary {
            config_path: self.path.clone(),
            enabled: config.enabled,
            debug: config.debug,
            enabled_sources,
            trusted_sources: config.security.trusted_sources.clone(),
            auto_discover: config.discovery.auto_discover,
            watch: config.discovery.watch,
            include: config.include.clone(),
            exclude: config.exclude.clone(),
            timeout: config.execution.timeout,
            retry_count: config.execution.retry_count,
            max_concurrent: config.execution.max_concurrent,
            sequential: config.execution.sequential,
            overridden_hooks: config.hooks.keys().cloned().collect(),
            priority_overrides: config.priority_overrides.clone(),
            health_check_interval: config.health_check_interval,
            max_history: config.max_history,
        }
    }
}
