//! hookbus-hooks: handler registration, priority ordering and dispatch.
//!
//! Handlers register under an event key (`"command"` or `"command:new"`).
//! Triggering an event runs every matching handler concurrently and returns
//! their results in priority order.

pub mod engine;
pub mod handler;
pub mod priority;
pub mod registry;

pub use engine::{EngineOptions, EngineStats, HookEngine, HookGate};
pub use handler::{HandlerFuture, HookHandler, handler_fn, same_handler};
pub use priority::{HandlerId, PriorityEntry, PriorityManager, PriorityStats};
pub use registry::{HookRegistry, RegisteredHandler, RegistryStats};
