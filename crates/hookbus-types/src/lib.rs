use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ──────────────────── Event Types ────────────────────

/// Category of an event raised by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Command,
    Session,
    Agent,
    Gateway,
    Message,
    Error,
    Lifecycle,
    Security,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::Command,
        EventType::Session,
        EventType::Agent,
        EventType::Gateway,
        EventType::Message,
        EventType::Error,
        EventType::Lifecycle,
        EventType::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Command => "command",
            EventType::Session => "session",
            EventType::Agent => "agent",
            EventType::Gateway => "gateway",
            EventType::Message => "message",
            EventType::Error => "error",
            EventType::Lifecycle => "lifecycle",
            EventType::Security => "security",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// Caller-owned context passed along with every event.
///
/// Handlers of the same event run concurrently and share this value
/// read-only; nothing synchronizes mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    /// Session the event belongs to.
    #[serde(default)]
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Working directory of the session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
    /// Host configuration snapshot exposed to handlers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            ..Default::default()
        }
    }
}

/// An event delivered to hook handlers.
///
/// Built once by the triggering caller and shared immutably with every
/// handler it fans out to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Action within the event type (e.g. "echo" for `command:echo`).
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub session_key: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Subsystem that raised the event.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub context: ExecutionContext,
}

impl Event {
    pub fn new(
        event_type: EventType,
        action: impl Into<String>,
        session_key: impl Into<String>,
    ) -> Self {
        let session_key = session_key.into();
        Self {
            event_type,
            action: action.into(),
            context: ExecutionContext::new(session_key.clone()),
            session_key,
            timestamp: Utc::now(),
            messages: Vec::new(),
            data: Map::new(),
            source: String::new(),
        }
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_messages(mut self, messages: Vec<String>) -> Self {
        self.messages = messages;
        self
    }

    /// Event key for type-level subscriptions (e.g. `"command"`).
    pub fn type_key(&self) -> &'static str {
        self.event_type.as_str()
    }

    /// Compound `type:action` key (e.g. `"command:echo"`).
    pub fn action_key(&self) -> String {
        format!("{}:{}", self.event_type, self.action)
    }

    /// Keys a handler may be registered under to receive this event,
    /// type-level first.
    pub fn event_keys(&self) -> Vec<String> {
        let mut keys = vec![self.type_key().to_string()];
        if !self.action.is_empty() {
            keys.push(self.action_key());
        }
        keys
    }
}

// ──────────────────── Result Types ────────────────────

/// Outcome of one handler invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HookResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock seconds spent in the handler. Filled in by the engine.
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Name of the handler that produced this result. Filled in by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

impl HookResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

// ──────────────────── Hook Definition Types ────────────────────

/// Where a hook package was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookSource {
    /// Shipped with hookbus.
    Bundled,
    /// User-managed global hooks (`~/.hookbus/hooks/`).
    Managed,
    /// Project-local hooks (`./.hookbus/hooks/`).
    Workspace,
    /// Hooks contributed by installed plugins.
    Plugin,
    /// Hooks from third-party directories.
    ThirdParty,
}

impl HookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookSource::Bundled => "bundled",
            HookSource::Managed => "managed",
            HookSource::Workspace => "workspace",
            HookSource::Plugin => "plugin",
            HookSource::ThirdParty => "third-party",
        }
    }
}

impl fmt::Display for HookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installation recipe advertised by a hook manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Installer kind (e.g. "brew", "node", "download").
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Binaries this recipe provides.
    #[serde(default)]
    pub bins: Vec<String>,
    #[serde(default)]
    pub os: Vec<String>,
}

/// Runtime prerequisites a hook declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HookRequirements {
    /// Every binary must be on `PATH`.
    #[serde(default)]
    pub bins: Vec<String>,
    /// At least one binary must be on `PATH`.
    #[serde(default, rename = "anyBins", alias = "any_bins")]
    pub any_bins: Vec<String>,
    /// Every variable must be set and non-empty.
    #[serde(default)]
    pub env: Vec<String>,
    /// Dotted config paths that must be truthy.
    #[serde(default)]
    pub config: Vec<String>,
}

impl HookRequirements {
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty() && self.any_bins.is_empty() && self.env.is_empty() && self.config.is_empty()
    }
}

/// Declarative metadata parsed from a hook manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HookMetadata {
    /// Event keys the handler binds to (`"command"`, `"command:echo"`).
    #[serde(default)]
    pub events: Vec<String>,
    /// Exported entry point name.
    #[serde(default = "default_export")]
    pub export: String,
    /// Platforms the hook supports; empty means all.
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, alias = "retry_count", skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub requires: HookRequirements,
    #[serde(default)]
    pub install: Vec<InstallSpec>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Skip binary/env/config requirement checks.
    #[serde(default)]
    pub always: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

fn default_export() -> String {
    "default".to_string()
}

impl Default for HookMetadata {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            export: default_export(),
            os: Vec::new(),
            priority: 0,
            timeout: None,
            retry_count: None,
            requires: HookRequirements::default(),
            install: Vec::new(),
            tags: Vec::new(),
            version: None,
            always: false,
            homepage: None,
            emoji: None,
        }
    }
}

/// Identity and on-disk location of a discovered hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hook {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: HookSource,
    /// Hook package directory.
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
    pub handler_path: PathBuf,
}

/// How the engine invokes a hook's handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookInvocationPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Retries after a failed attempt; `None` defers to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub fail_silent: bool,
}

impl HookInvocationPolicy {
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

impl Default for HookInvocationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
            timeout: None,
            retry_count: None,
            fail_silent: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A discovered hook together with its parsed metadata and invocation policy.
///
/// Entries are immutable once the loader hands them out; runtime
/// enable/disable and priority changes live in the manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookEntry {
    pub hook: Hook,
    pub metadata: HookMetadata,
    pub policy: HookInvocationPolicy,
}

impl HookEntry {
    pub fn name(&self) -> &str {
        &self.hook.name
    }
}
