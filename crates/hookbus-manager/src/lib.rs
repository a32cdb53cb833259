//! hookbus-manager: the façade hosts use to raise hook events.
//!
//! ```rust,ignore
//! let manager = Arc::new(HookManager::open_default()?);
//! manager.initialize().await;
//! let results = manager
//!     .trigger_event(EventType::Command, "new", "session-1", None, Map::new())
//!     .await;
//! ```

pub mod health;
pub mod history;
pub mod manager;
pub mod watcher;

pub use health::{HealthReport, MAX_FAILURE_RATE};
pub use history::{ExecutionHistory, ExecutionRecord, RunningAverages, redact_session_key};
pub use manager::{
    HookInfo, HookManager, HookState, InitSummary, ManagerStatistics, ManagerStatus,
    default_resolver,
};
