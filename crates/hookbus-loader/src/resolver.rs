//! Turning a discovered hook into a callable handler.
//!
//! The rest of the system only sees `Arc<dyn HookHandler>`; how the code
//! behind a hook gets loaded is decided by a [`HandlerResolver`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;

use hookbus_config::HooksConfig;
use hookbus_hooks::HookHandler;
use hookbus_types::{Event, HookEntry, HookResult};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// This resolver does not handle the hook; a chain moves on.
    #[error("no resolver matched hook '{0}'")]
    NoMatch(String),
    #[error("handler file {0} does not exist")]
    HandlerMissing(PathBuf),
    #[error("hook '{hook}' has no export named '{export}'")]
    ExportNotFound { hook: String, export: String },
    #[error("process handlers are disabled by configuration")]
    ProcessHandlersDisabled,
    #[error("don't know how to run handler {0}")]
    Unsupported(PathBuf),
}

/// Produces a handler for a hook entry.
pub trait HandlerResolver: Send + Sync {
    fn resolve(
        &self,
        entry: &HookEntry,
        config: &HooksConfig,
    ) -> Result<Arc<dyn HookHandler>, ResolveError>;
}

/// Resolve a hook's handler, logging and returning `None` on failure.
pub fn load_hook_handler(
    entry: &HookEntry,
    config: &HooksConfig,
    resolver: &dyn HandlerResolver,
) -> Option<Arc<dyn HookHandler>> {
    match resolver.resolve(entry, config) {
        Ok(handler) => Some(handler),
        Err(e) => {
            tracing::warn!(hook = %entry.name(), "Failed to load hook handler: {e}");
            None
        }
    }
}

type Factory = Arc<dyn Fn(&HookEntry) -> Arc<dyn HookHandler> + Send + Sync>;

/// Resolves hooks against in-process factories registered by hook name
/// and export name.
#[derive(Default)]
pub struct FactoryResolver {
    factories: HashMap<String, HashMap<String, Factory>>,
}

impl FactoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, hook: &str, export: &str, factory: F)
    where
        F: Fn(&HookEntry) -> Arc<dyn HookHandler> + Send + Sync + 'static,
    {
        self.factories
            .entry(hook.to_string())
            .or_default()
            .insert(export.to_string(), Arc::new(factory));
    }

    pub fn with<F>(mut self, hook: &str, export: &str, factory: F) -> Self
    where
        F: Fn(&HookEntry) -> Arc<dyn HookHandler> + Send + Sync + 'static,
    {
        self.register(hook, export, factory);
        self
    }
}

impl HandlerResolver for FactoryResolver {
    fn resolve(
        &self,
        entry: &HookEntry,
        _config: &HooksConfig,
    ) -> Result<Arc<dyn HookHandler>, ResolveError> {
        let exports = self
            .factories
            .get(entry.name())
            .ok_or_else(|| ResolveError::NoMatch(entry.name().to_string()))?;
        let factory = exports
            .get(&entry.metadata.export)
            .ok_or_else(|| ResolveError::ExportNotFound {
                hook: entry.name().to_string(),
                export: entry.metadata.export.clone(),
            })?;
        Ok(factory(entry))
    }
}

/// Tries each resolver in turn; `NoMatch` falls through to the next.
#[derive(Default)]
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn HandlerResolver>>,
}

impl ChainResolver {
    pub fn new(resolvers: Vec<Arc<dyn HandlerResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn push(&mut self, resolver: Arc<dyn HandlerResolver>) {
        self.resolvers.push(resolver);
    }
}

impl HandlerResolver for ChainResolver {
    fn resolve(
        &self,
        entry: &HookEntry,
        config: &HooksConfig,
    ) -> Result<Arc<dyn HookHandler>, ResolveError> {
        for resolver in &self.resolvers {
            match resolver.resolve(entry, config) {
                Err(ResolveError::NoMatch(_)) => continue,
                other => return other,
            }
        }
        Err(ResolveError::NoMatch(entry.name().to_string()))
    }
}

/// Runs handler files as child processes.
///
/// The event is written to stdin as JSON. A JSON object on stdout becomes
/// the result; otherwise the exit status decides success and each
/// non-empty stdout line becomes a message.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessResolver;

impl ProcessResolver {
    pub fn new() -> Self {
        Self
    }
}

/// Interpreter for a handler file, or `None` to execute it directly.
fn interpreter_for(path: &Path) -> Result<Option<&'static str>, ResolveError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("sh") => Ok(Some("sh")),
        Some("py") => Ok(Some("python3")),
        Some("js" | "mjs") => Ok(Some("node")),
        None if is_executable(path) => Ok(None),
        _ => Err(ResolveError::Unsupported(path.to_path_buf())),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl HandlerResolver for ProcessResolver {
    fn resolve(
        &self,
        entry: &HookEntry,
        config: &HooksConfig,
    ) -> Result<Arc<dyn HookHandler>, ResolveError> {
        if !config.security.allow_process_handlers {
            return Err(ResolveError::ProcessHandlersDisabled);
        }
        let path = &entry.hook.handler_path;
        if !path.is_file() {
            return Err(ResolveError::HandlerMissing(path.clone()));
        }
        let interpreter = interpreter_for(path)?;
        let env = config
            .hook_override(entry.name())
            .map(|o| o.env.clone())
            .unwrap_or_default();

        Ok(Arc::new(ProcessHandler {
            name: entry.name().to_string(),
            export: entry.metadata.export.clone(),
            path: path.clone(),
            dir: entry.hook.dir.clone(),
            interpreter,
            env,
        }))
    }
}

/// Result shape a process handler may print on stdout.
#[derive(Debug, Deserialize)]
struct ProcessOutput {
    success: Option<bool>,
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(default)]
    messages: Vec<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

struct ProcessHandler {
    name: String,
    export: String,
    path: PathBuf,
    dir: PathBuf,
    interpreter: Option<&'static str>,
    env: BTreeMap<String, String>,
}

#[async_trait]
impl HookHandler for ProcessHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<HookResult> {
        let mut cmd = match self.interpreter {
            Some(interpreter) => {
                let mut cmd = tokio::process::Command::new(interpreter);
                cmd.arg(&self.path);
                cmd
            }
            None => tokio::process::Command::new(&self.path),
        };
        cmd.current_dir(&self.dir)
            .env("HOOKBUS_EXPORT", &self.export)
            .env("HOOKBUS_EVENT_KEY", event.action_key())
            .env("HOOKBUS_HOOK_NAME", &self.name)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let payload = serde_json::to_vec(event)?;
        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                // Handlers that never read stdin close it early.
                let _ = stdin.write_all(&payload).await;
            }
        };
        let ((), output) = tokio::join!(write, child.wait_with_output());
        let output = output?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(interpret_output(
            output.status.success(),
            output.status.code(),
            &stdout,
            &stderr,
        ))
    }
}

fn interpret_output(
    exited_ok: bool,
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> HookResult {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str::<ProcessOutput>(trimmed) {
            let success = parsed.success.unwrap_or(exited_ok);
            return HookResult {
                success,
                data: parsed.data,
                messages: parsed.messages,
                error: parsed.error.or_else(|| (!success).then(|| exit_error(code, stderr))),
                warnings: parsed.warnings,
                ..Default::default()
            };
        }
    }

    let messages = trimmed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    HookResult {
        success: exited_ok,
        messages,
        error: (!exited_ok).then(|| exit_error(code, stderr)),
        ..Default::default()
    }
}

fn exit_error(code: Option<i32>, stderr: &str) -> String {
    let stderr = stderr.trim();
    match (code, stderr.is_empty()) {
        (_, false) => stderr.to_string(),
        (Some(code), true) => format!("handler exited with status {code}"),
        (None, true) => "handler terminated by signal".to_string(),
    }
}
