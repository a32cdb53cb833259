//! Environment variable overrides.

use crate::HooksConfig;

pub const ENV_HOOKS_ENABLED: &str = "HOOKBUS_HOOKS_ENABLED";
pub const ENV_HOOKS_DISABLED: &str = "HOOKBUS_HOOKS_DISABLED";
pub const ENV_DEBUG: &str = "HOOKBUS_DEBUG";
pub const ENV_HOOK_TIMEOUT: &str = "HOOKBUS_HOOK_TIMEOUT";
pub const ENV_MAX_CONCURRENT: &str = "HOOKBUS_MAX_CONCURRENT";
/// Alternative config file path. Read by the CLI, not by the store.
pub const ENV_CONFIG: &str = "HOOKBUS_CONFIG";

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut HooksConfig) -> Vec<&'static str> {
    apply_env_overrides_from(config, |key| std::env::var(key).ok())
}

/// Apply overrides using `lookup` to read variables. Returns the names of
/// the variables that took effect; unparsable values are ignored with a
/// warning.
pub fn apply_env_overrides_from<F>(config: &mut HooksConfig, lookup: F) -> Vec<&'static str>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();

    if let Some(value) = lookup(ENV_HOOKS_ENABLED) {
        match parse_bool(&value) {
            Some(enabled) => {
                config.enabled = enabled;
                applied.push(ENV_HOOKS_ENABLED);
            }
            None => tracing::warn!("Ignoring {ENV_HOOKS_ENABLED}={value}: not a boolean"),
        }
    }

    if let Some(value) = lookup(ENV_HOOKS_DISABLED) {
        match parse_bool(&value) {
            Some(true) => {
                config.enabled = false;
                applied.push(ENV_HOOKS_DISABLED);
            }
            Some(false) => {}
            None => tracing::warn!("Ignoring {ENV_HOOKS_DISABLED}={value}: not a boolean"),
        }
    }

    if let Some(value) = lookup(ENV_DEBUG) {
        match parse_bool(&value) {
            Some(debug) => {
                config.debug = debug;
                applied.push(ENV_DEBUG);
            }
            None => tracing::warn!("Ignoring {ENV_DEBUG}={value}: not a boolean"),
        }
    }

    if let Some(value) = lookup(ENV_HOOK_TIMEOUT) {
        match value.trim().parse::<u64>() {
            Ok(timeout) => {
                config.execution.timeout = timeout;
                applied.push(ENV_HOOK_TIMEOUT);
            }
            Err(e) => tracing::warn!("Ignoring {ENV_HOOK_TIMEOUT}={value}: {e}"),
        }
    }

    if let Some(value) = lookup(ENV_MAX_CONCURRENT) {
        match value.trim().parse::<usize>() {
            Ok(max) => {
                config.execution.max_concurrent = max;
                applied.push(ENV_MAX_CONCURRENT);
            }
            Err(e) => tracing::warn!("Ignoring {ENV_MAX_CONCURRENT}={value}: {e}"),
        }
    }

    applied
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = HooksConfig::default();
        let applied = apply_env_overrides_from(
            &mut config,
            lookup(&[
                (ENV_DEBUG, "yes"),
                (ENV_HOOK_TIMEOUT, "12"),
                (ENV_MAX_CONCURRENT, "3"),
            ]),
        );
        assert_eq!(applied.len(), 3);
        assert!(config.debug);
        assert_eq!(config.execution.timeout, 12);
        assert_eq!(config.execution.max_concurrent, 3);
    }

    #[test]
    fn test_disabled_wins_over_enabled() {
        let mut config = HooksConfig::default();
        apply_env_overrides_from(
            &mut config,
            lookup(&[(ENV_HOOKS_ENABLED, "true"), (ENV_HOOKS_DISABLED, "1")]),
        );
        assert!(!config.enabled);
    }

    #[test]
    fn test_invalid_values_ignored() {
        let mut config = HooksConfig::default();
        let applied = apply_env_overrides_from(
            &mut config,
            lookup(&[(ENV_HOOK_TIMEOUT, "soon"), (ENV_DEBUG, "maybe")]),
        );
        assert!(applied.is_empty());
        assert_eq!(config, HooksConfig::default());
    }
}
