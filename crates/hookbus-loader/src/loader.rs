//! Hook package discovery and loading.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;

use hookbus_config::{HooksConfig, managed_hooks_dir};
use hookbus_types::{Hook, HookEntry, HookInvocationPolicy, HookSource};

use crate::eligibility::{Environment, should_include_hook};
use crate::manifest::{MANIFEST_FILE, read_manifest};

/// Handler entry-point file names, tried in order.
pub const HANDLER_FILES: [&str; 5] = [
    "handler.sh",
    "handler.py",
    "handler.js",
    "handler.mjs",
    "handler",
];

/// Overrides the bundled hooks directory.
pub const ENV_BUNDLED_HOOKS_DIR: &str = "HOOKBUS_BUNDLED_HOOKS_DIR";

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A directory scanned for hook packages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDir {
    pub source: HookSource,
    pub dir: PathBuf,
}

/// Counters from the most recent [`HookLoader::load_all_hooks`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoaderStats {
    /// Directories containing a manifest.
    pub discovered: usize,
    pub loaded: usize,
    pub ineligible: usize,
    pub untrusted: usize,
    /// Unreadable manifests, missing handlers, hooks without events.
    pub invalid: usize,
    /// Entries replaced by a later source with the same name.
    pub shadowed: usize,
    /// Loaded entries per source.
    pub by_source: BTreeMap<String, usize>,
    pub errors: Vec<String>,
}

/// Discovers hook packages across the configured source directories.
pub struct HookLoader {
    env: EnvLookup,
    os: &'static str,
    stats: LoaderStats,
}

impl Default for HookLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl HookLoader {
    pub fn new() -> Self {
        Self {
            env: Box::new(|key| std::env::var(key).ok()),
            os: std::env::consts::OS,
            stats: LoaderStats::default(),
        }
    }

    /// Replace the environment lookup used for `PATH` and `requires.env`.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(lookup);
        self
    }

    /// Pretend to run on another platform.
    pub fn with_os(mut self, os: &'static str) -> Self {
        self.os = os;
        self
    }

    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    /// Directories to scan, in scan order: bundled, workspace, managed,
    /// third-party, plugin. Disabled sources are left out.
    pub fn source_dirs(&self, config: &HooksConfig) -> Vec<SourceDir> {
        let discovery = &config.discovery;
        let mut dirs = Vec::new();
        let mut push = |source: HookSource, dir: Option<PathBuf>| {
            if let Some(dir) = dir.filter(|_| config.is_source_enabled(source)) {
                dirs.push(SourceDir { source, dir });
            }
        };

        push(
            HookSource::Bundled,
            discovery
                .bundled_dir
                .clone()
                .or_else(|| self.default_bundled_dir()),
        );
        push(
            HookSource::Workspace,
            discovery
                .workspace_dir
                .clone()
                .or_else(|| std::env::current_dir().ok().map(|d| d.join(".hookbus").join("hooks"))),
        );
        push(
            HookSource::Managed,
            discovery
                .managed_dir
                .clone()
                .or_else(|| managed_hooks_dir().ok()),
        );
        for dir in &discovery.third_party_dirs {
            push(HookSource::ThirdParty, Some(dir.clone()));
        }
        for dir in &discovery.plugin_dirs {
            let nested = dir.join("hooks");
            push(
                HookSource::Plugin,
                Some(if nested.is_dir() { nested } else { dir.clone() }),
            );
        }

        dirs
    }

    fn default_bundled_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = (self.env)(ENV_BUNDLED_HOOKS_DIR).filter(|d| !d.is_empty()) {
            return Some(PathBuf::from(dir));
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.join("hooks")))
    }

    /// Scan every enabled source and return the eligible, trusted entries.
    ///
    /// Entries are keyed by name: a later source replaces an earlier one
    /// (e.g. a workspace hook shadows a bundled hook of the same name).
    /// Problems with individual hooks are logged and counted, never fatal.
    pub fn load_all_hooks(&mut self, config: &HooksConfig) -> Vec<HookEntry> {
        self.stats = LoaderStats::default();
        if !config.discovery.auto_discover {
            tracing::debug!("Hook auto-discovery disabled");
            return Vec::new();
        }

        let environment = Environment {
            os: self.os,
            lookup: self.env.as_ref(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };

        let mut stats = LoaderStats::default();
        let mut entries: HashMap<String, HookEntry> = HashMap::new();

        for SourceDir { source, dir } in self.source_dirs(config) {
            if !dir.is_dir() {
                tracing::debug!(source = %source, dir = %dir.display(), "Hook directory missing, skipping");
                continue;
            }

            for hook_dir in discover_hook_dirs(&dir) {
                stats.discovered += 1;
                let entry = match load_hook_entry(&hook_dir, source, config) {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(dir = %hook_dir.display(), "Failed to load hook: {e}");
                        stats.invalid += 1;
                        stats.errors.push(format!("{}: {e}", hook_dir.display()));
                        continue;
                    }
                };

                if !config.is_trusted(source) {
                    tracing::debug!(hook = %entry.name(), source = %source, "Skipping hook from untrusted source");
                    stats.untrusted += 1;
                    continue;
                }

                if let Err(reason) = should_include_hook(&entry, config, &environment) {
                    tracing::debug!(hook = %entry.name(), source = %source, "Hook not eligible: {reason}");
                    stats.ineligible += 1;
                    continue;
                }

                if let Some(previous) = entries.insert(entry.name().to_string(), entry) {
                    tracing::debug!(
                        hook = %previous.name(),
                        shadowed = %previous.hook.source,
                        "Hook shadowed by later source"
                    );
                    stats.shadowed += 1;
                }
            }
        }

        let mut loaded: Vec<HookEntry> = entries.into_values().collect();
        loaded.sort_by(|a, b| a.name().cmp(b.name()));

        stats.loaded = loaded.len();
        for entry in &loaded {
            *stats
                .by_source
                .entry(entry.hook.source.as_str().to_string())
                .or_default() += 1;
        }

        tracing::info!(
            loaded = stats.loaded,
            discovered = stats.discovered,
            ineligible = stats.ineligible,
            invalid = stats.invalid,
            "Loaded hooks"
        );
        self.stats = stats;
        loaded
    }
}

/// Subdirectories of `dir` that contain a manifest, sorted by path.
fn discover_hook_dirs(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), "Failed to read hook directory: {e}");
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join(MANIFEST_FILE).is_file())
        .collect();
    dirs.sort();
    dirs
}

/// First conventional handler file present in `dir`.
pub fn find_handler_file(dir: &Path) -> Option<PathBuf> {
    HANDLER_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Build an entry for one hook directory.
///
/// The entry's policy folds config overrides over the manifest values.
pub fn load_hook_entry(
    dir: &Path,
    source: HookSource,
    config: &HooksConfig,
) -> anyhow::Result<HookEntry> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest = read_manifest(&manifest_path)?;

    let name = if manifest.name.is_empty() {
        dir.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed")
            .to_string()
    } else {
        manifest.name
    };

    if manifest.metadata.events.is_empty() {
        anyhow::bail!("hook '{name}' declares no events");
    }
    let handler_path = find_handler_file(dir)
        .ok_or_else(|| anyhow::anyhow!("hook '{name}' has no handler file"))?;

    let mut metadata = manifest.metadata;
    let overrides = config.hook_override(&name);
    if let Some(o) = overrides {
        for tag in &o.tags {
            if !metadata.tags.contains(tag) {
                metadata.tags.push(tag.clone());
            }
        }
    }

    let policy = HookInvocationPolicy {
        enabled: config.is_hook_enabled(&name, manifest.enabled),
        priority: config.effective_priority(&name, metadata.priority),
        timeout: overrides.and_then(|o| o.timeout).or(metadata.timeout),
        retry_count: overrides
            .and_then(|o| o.retry_count)
            .or(metadata.retry_count),
        fail_silent: config.execution.fail_silent,
    };

    Ok(HookEntry {
        hook: Hook {
            name,
            description: manifest.description,
            source,
            dir: dir.to_path_buf(),
            manifest_path,
            handler_path,
        },
        metadata,
        policy,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hookbus_config::HookOverride;

    pub(crate) fn write_hook(root: &Path, dir_name: &str, manifest: &str) -> PathBuf {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        std::fs::write(dir.join("handler.sh"), "#!/bin/sh\necho ok\n").unwrap();
        dir
    }

    pub(crate) fn simple_manifest(name: &str, description: &str) -> String {
        format!(
            "---\nname: {name}\ndescription: {description}\nmetadata: {{\"hookbus\": {{\"events\": [\"command\"]}}}}\n---\n"
        )
    }

    /// Config scanning only the given bundled/workspace directories.
    pub(crate) fn isolated_config(bundled: &Path, workspace: &Path) -> HooksConfig {
        let mut config = HooksConfig::default();
        config.discovery.bundled_dir = Some(bundled.to_path_buf());
        config.discovery.workspace_dir = Some(workspace.to_path_buf());
        config.sources.managed = false;
        config.sources.plugin = false;
        config
    }

    fn loader() -> HookLoader {
        HookLoader::new().with_env_lookup(|key| (key == "PATH").then(String::new))
    }

    #[test]
    fn test_workspace_shadows_bundled() {
        let root = tempfile::tempdir().unwrap();
        let bundled = root.path().join("bundled");
        let workspace = root.path().join("workspace");
        write_hook(&bundled, "greeter", &simple_manifest("greeter", "bundled one"));
        write_hook(&bundled, "other", &simple_manifest("other", "only bundled"));
        write_hook(&workspace, "greeter", &simple_manifest("greeter", "workspace one"));

        let mut loader = loader();
        let entries = loader.load_all_hooks(&isolated_config(&bundled, &workspace));

        let greeters: Vec<_> = entries.iter().filter(|e| e.name() == "greeter").collect();
        assert_eq!(greeters.len(), 1);
        assert_eq!(greeters[0].hook.source, HookSource::Workspace);
        assert_eq!(greeters[0].hook.description, "workspace one");
        assert_eq!(entries.len(), 2);

        let stats = loader.stats();
        assert_eq!(stats.discovered, 3);
        assert_eq!(stats.shadowed, 1);
        assert_eq!(stats.by_source.get("bundled"), Some(&1));
        assert_eq!(stats.by_source.get("workspace"), Some(&1));
    }

    #[test]
    fn test_missing_binary_is_never_loaded() {
        let root = tempfile::tempdir().unwrap();
        let bundled = root.path().join("bundled");
        write_hook(
            &bundled,
            "needs-bin",
            "---\nname: needs-bin\nmetadata: {\"events\": [\"command\"], \"requires\": {\"bins\": [\"definitely-nonexistent-binary-xyz\"]}}\n---\n",
        );

        let mut loader = loader();
        let entries = loader.load_all_hooks(&isolated_config(&bundled, &root.path().join("none")));
        assert!(entries.iter().all(|e| e.name() != "needs-bin"));
        assert_eq!(loader.stats().ineligible, 1);
    }

    #[test]
    fn test_invalid_hooks_are_counted() {
        let root = tempfile::tempdir().unwrap();
        let bundled = root.path().join("bundled");
        write_hook(&bundled, "no-events", "---\nname: no-events\n---\n");
        write_hook(&bundled, "broken", "no front matter");
        let no_handler = bundled.join("no-handler");
        std::fs::create_dir_all(&no_handler).unwrap();
        std::fs::write(no_handler.join(MANIFEST_FILE), simple_manifest("no-handler", "x")).unwrap();
        std::fs::create_dir_all(bundled.join("not-a-hook")).unwrap();

        let mut loader = loader();
        let entries = loader.load_all_hooks(&isolated_config(&bundled, &root.path().join("none")));
        assert!(entries.is_empty());
        assert_eq!(loader.stats().discovered, 3);
        assert_eq!(loader.stats().invalid, 3);
        assert_eq!(loader.stats().errors.len(), 3);
    }

    #[test]
    fn test_untrusted_source_skipped() {
        let root = tempfile::tempdir().unwrap();
        let third_party = root.path().join("vendor");
        write_hook(&third_party, "vendored", &simple_manifest("vendored", "x"));

        let mut config = isolated_config(&root.path().join("a"), &root.path().join("b"));
        config.sources.third_party = true;
        config.discovery.third_party_dirs = vec![third_party];

        let mut loader = loader();
        assert!(loader.load_all_hooks(&config).is_empty());
        assert_eq!(loader.stats().untrusted, 1);

        config.security.trusted_sources.push(HookSource::ThirdParty);
        assert_eq!(loader.load_all_hooks(&config).len(), 1);
    }

    #[test]
    fn test_plugin_dir_nested_hooks() {
        let root = tempfile::tempdir().unwrap();
        let plugin = root.path().join("my-plugin");
        write_hook(&plugin.join("hooks"), "plugged", &simple_manifest("plugged", "x"));

        let mut config = isolated_config(&root.path().join("a"), &root.path().join("b"));
        config.sources.plugin = true;
        config.discovery.plugin_dirs = vec![plugin.clone()];

        let mut loader = loader();
        let dirs = loader.source_dirs(&config);
        assert_eq!(dirs.last().unwrap().dir, plugin.join("hooks"));

        let entries = loader.load_all_hooks(&config);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hook.source, HookSource::Plugin);
    }

    #[test]
    fn test_policy_folds_config_overrides() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_hook(
            root.path(),
            "tuned",
            "---\nname: tuned\nenabled: false\nmetadata: {\"events\": [\"command\"], \"priority\": 1, \"timeout\": 4, \"tags\": [\"a\"]}\n---\n",
        );

        let mut config = HooksConfig::default();
        let entry = load_hook_entry(&dir, HookSource::Workspace, &config).unwrap();
        assert!(!entry.policy.enabled);
        assert_eq!(entry.policy.priority, 1);
        assert_eq!(entry.policy.timeout, Some(4));
        assert_eq!(entry.policy.retry_count, None);

        config.hooks.insert(
            "tuned".to_string(),
            HookOverride {
                enabled: Some(true),
                priority: Some(7),
                retry_count: Some(2),
                tags: vec!["b".to_string()],
                ..Default::default()
            },
        );
        config.priority_overrides.insert("tuned".to_string(), 9);
        let entry = load_hook_entry(&dir, HookSource::Workspace, &config).unwrap();
        assert!(entry.policy.enabled);
        assert_eq!(entry.policy.priority, 9);
        assert_eq!(entry.policy.retry_count, Some(2));
        assert_eq!(entry.metadata.tags, vec!["a", "b"]);
        assert_eq!(entry.hook.handler_path, dir.join("handler.sh"));
    }

    #[test]
    fn test_name_falls_back_to_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_hook(
            root.path(),
            "dir-named",
            "---\nmetadata: {\"events\": [\"session\"]}\n---\n",
        );
        let entry = load_hook_entry(&dir, HookSource::Managed, &HooksConfig::default()).unwrap();
        assert_eq!(entry.name(), "dir-named");
    }

    #[test]
    fn test_bundled_hooks_parse() {
        let bundled = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../hooks");
        let dirs = discover_hook_dirs(&bundled);
        assert!(dirs.len() >= 2);
        for dir in dirs {
            let entry = load_hook_entry(&dir, HookSource::Bundled, &HooksConfig::default())
                .unwrap_or_else(|e| panic!("{}: {e}", dir.display()));
            assert!(!entry.metadata.events.is_empty());
        }
    }

    #[test]
    fn test_auto_discover_off() {
        let root = tempfile::tempdir().unwrap();
        let bundled = root.path().join("bundled");
        write_hook(&bundled, "x", &simple_manifest("x", "x"));
        let mut config = isolated_config(&bundled, &root.path().join("none"));
        config.discovery.auto_discover = false;
        assert!(loader().load_all_hooks(&config).is_empty());
    }
}
