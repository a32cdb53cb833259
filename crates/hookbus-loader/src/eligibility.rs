//! Per-hook eligibility checks run during discovery.

use std::path::PathBuf;

use hookbus_config::HooksConfig;
use hookbus_types::HookEntry;

/// Why a discovered hook was left out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Ineligible {
    #[error("listed in exclude")]
    Excluded,
    #[error("not listed in include")]
    NotIncluded,
    #[error("unsupported platform {current} (wants {wanted:?})")]
    Platform {
        current: &'static str,
        wanted: Vec<String>,
    },
    #[error("required binary `{0}` not found on PATH")]
    MissingBinary(String),
    #[error("none of {0:?} found on PATH")]
    MissingAnyBinary(Vec<String>),
    #[error("required environment variable `{0}` is not set")]
    MissingEnv(String),
    #[error("config path `{0}` is not truthy")]
    MissingConfig(String),
}

/// Inputs the checks read from the process environment.
pub struct Environment<'a> {
    pub os: &'static str,
    pub lookup: &'a (dyn Fn(&str) -> Option<String> + Send + Sync),
    pub cwd: PathBuf,
}

impl Environment<'_> {
    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn has_binary(&self, bin: &str) -> bool {
        which::which_in(bin, self.var("PATH"), &self.cwd).is_ok()
    }
}

/// Normalize platform names so `darwin`/`macos` and `win32`/`windows`
/// compare equal.
pub fn normalize_os(os: &str) -> String {
    match os.trim().to_ascii_lowercase().as_str() {
        "darwin" | "macos" | "osx" => "macos".to_string(),
        "win32" | "windows" => "windows".to_string(),
        other => other.to_string(),
    }
}

/// Decide whether `entry` should be loaded.
///
/// Include/exclude lists are checked first, then the declared platforms.
/// Unless the hook is marked `always`, every binary, environment variable
/// and config path it requires must be available. A per-hook `env`
/// override in the config satisfies an environment requirement.
pub fn should_include_hook(
    entry: &HookEntry,
    config: &HooksConfig,
    env: &Environment<'_>,
) -> Result<(), Ineligible> {
    let name = entry.name();
    if config.exclude.iter().any(|n| n == name) {
        return Err(Ineligible::Excluded);
    }
    if !config.include.is_empty() && !config.include.iter().any(|n| n == name) {
        return Err(Ineligible::NotIncluded);
    }

    let meta = &entry.metadata;
    if !meta.os.is_empty() {
        let current = normalize_os(env.os);
        if !meta.os.iter().any(|os| normalize_os(os) == current) {
            return Err(Ineligible::Platform {
                current: env.os,
                wanted: meta.os.clone(),
            });
        }
    }

    if meta.always {
        return Ok(());
    }

    let requires = &meta.requires;
    if let Some(bin) = requires.bins.iter().find(|b| !env.has_binary(b)) {
        return Err(Ineligible::MissingBinary(bin.clone()));
    }
    if !requires.any_bins.is_empty() && !requires.any_bins.iter().any(|b| env.has_binary(b)) {
        return Err(Ineligible::MissingAnyBinary(requires.any_bins.clone()));
    }

    let overrides = config.hook_override(name);
    if let Some(var) = requires.env.iter().find(|var| {
        env.var(var).is_none() && !overrides.is_some_and(|o| o.env.contains_key(var.as_str()))
    }) {
        return Err(Ineligible::MissingEnv(var.clone()));
    }

    if let Some(path) = requires.config.iter().find(|p| !config.is_truthy_path(p)) {
        return Err(Ineligible::MissingConfig(path.clone()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookbus_config::HookOverride;
    use hookbus_types::{Hook, HookInvocationPolicy, HookMetadata, HookSource};

    fn entry(name: &str, metadata: HookMetadata) -> HookEntry {
        HookEntry {
            hook: Hook {
                name: name.to_string(),
                description: String::new(),
                source: HookSource::Bundled,
                dir: PathBuf::from("/hooks").join(name),
                manifest_path: PathBuf::from("/hooks").join(name).join("HOOK.md"),
                handler_path: PathBuf::from("/hooks").join(name).join("handler.sh"),
            },
            metadata,
            policy: HookInvocationPolicy::default(),
        }
    }

    fn lookup(key: &str) -> Option<String> {
        match key {
            "PATH" => Some(String::new()),
            "API_TOKEN" => Some("secret".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    fn environment(os: &'static str) -> Environment<'static> {
        Environment {
            os,
            lookup: &lookup,
            cwd: std::env::temp_dir(),
        }
    }

    #[test]
    fn test_include_and_exclude() {
        let env = environment("linux");
        let hook = entry("a", HookMetadata::default());

        let mut config = HooksConfig::default();
        assert_eq!(should_include_hook(&hook, &config, &env), Ok(()));

        config.include = vec!["b".to_string()];
        assert_eq!(
            should_include_hook(&hook, &config, &env),
            Err(Ineligible::NotIncluded)
        );

        config.include = vec!["a".to_string()];
        config.exclude = vec!["a".to_string()];
        assert_eq!(
            should_include_hook(&hook, &config, &env),
            Err(Ineligible::Excluded)
        );
    }

    #[test]
    fn test_platform_aliases() {
        let config = HooksConfig::default();
        let hook = entry(
            "mac-only",
            HookMetadata {
                os: vec!["darwin".to_string()],
                ..Default::default()
            },
        );
        assert!(should_include_hook(&hook, &config, &environment("macos")).is_ok());
        assert!(matches!(
            should_include_hook(&hook, &config, &environment("linux")),
            Err(Ineligible::Platform { .. })
        ));
    }

    #[test]
    fn test_missing_binaries() {
        let config = HooksConfig::default();
        let env = environment("linux");
        let mut metadata = HookMetadata::default();
        metadata.requires.bins = vec!["definitely-nonexistent-binary-xyz".to_string()];
        assert_eq!(
            should_include_hook(&entry("a", metadata.clone()), &config, &env),
            Err(Ineligible::MissingBinary(
                "definitely-nonexistent-binary-xyz".to_string()
            ))
        );

        metadata.always = true;
        assert!(should_include_hook(&entry("a", metadata), &config, &env).is_ok());

        let mut any = HookMetadata::default();
        any.requires.any_bins = vec!["nope-1".to_string(), "nope-2".to_string()];
        assert!(matches!(
            should_include_hook(&entry("b", any), &config, &env),
            Err(Ineligible::MissingAnyBinary(_))
        ));
    }

    #[test]
    fn test_env_requirements() {
        let env = environment("linux");
        let mut config = HooksConfig::default();
        let mut metadata = HookMetadata::default();
        metadata.requires.env = vec!["API_TOKEN".to_string()];
        assert!(should_include_hook(&entry("a", metadata.clone()), &config, &env).is_ok());

        metadata.requires.env = vec!["EMPTY".to_string()];
        assert_eq!(
            should_include_hook(&entry("a", metadata.clone()), &config, &env),
            Err(Ineligible::MissingEnv("EMPTY".to_string()))
        );

        let mut block = HookOverride::default();
        block.env.insert("EMPTY".to_string(), "set-in-config".to_string());
        config.hooks.insert("a".to_string(), block);
        assert!(should_include_hook(&entry("a", metadata), &config, &env).is_ok());
    }

    #[test]
    fn test_config_requirements() {
        let env = environment("linux");
        let mut config = HooksConfig::default();
        let mut metadata = HookMetadata::default();
        metadata.requires.config = vec!["execution.sequential".to_string()];
        assert_eq!(
            should_include_hook(&entry("a", metadata.clone()), &config, &env),
            Err(Ineligible::MissingConfig("execution.sequential".to_string()))
        );

        config.execution.sequential = true;
        assert!(should_include_hook(&entry("a", metadata), &config, &env).is_ok());
    }
}
