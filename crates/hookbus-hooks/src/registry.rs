//! Hook registry: owns handler registrations per event key.
//!
//! Execution order comes from the embedded [`PriorityManager`]; the
//! registry itself only maps handler ids to handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use hookbus_types::{Event, HookInvocationPolicy};

use crate::handler::{HookHandler, same_handler};
use crate::priority::{HandlerId, PriorityManager, PriorityStats};

/// A handler as returned by lookups, in execution order.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub id: HandlerId,
    pub event_key: String,
    pub priority: i32,
    pub handler: Arc<dyn HookHandler>,
    pub policy: HookInvocationPolicy,
}

impl RegisteredHandler {
    pub fn name(&self) -> &str {
        self.handler.name()
    }
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("id", &self.id)
            .field("name", &self.handler.name())
            .field("event_key", &self.event_key)
            .field("priority", &self.priority)
            .finish()
    }
}

struct Registration {
    event_key: String,
    handler: Arc<dyn HookHandler>,
    policy: HookInvocationPolicy,
}

/// Aggregate registry counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RegistryStats {
    pub registered: usize,
    pub event_keys: usize,
    pub total_registrations: u64,
    pub total_unregistrations: u64,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Manages handler registrations and their ordering.
pub struct HookRegistry {
    handlers: HashMap<HandlerId, Registration>,
    priorities: PriorityManager,
    next_id: u64,
    registrations: u64,
    unregistrations: u64,
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl HookRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            priorities: PriorityManager::new(),
            next_id: 1,
            registrations: 0,
            unregistrations: 0,
            executions: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Register `handler` under `event_key`.
    ///
    /// Returns `false` (and logs) for an empty key or when the same handler
    /// instance is already registered under that key.
    pub fn register(
        &mut self,
        event_key: &str,
        handler: Arc<dyn HookHandler>,
        priority: i32,
        policy: Option<HookInvocationPolicy>,
    ) -> bool {
        let event_key = event_key.trim();
        if event_key.is_empty() {
            tracing::warn!(hook = %handler.name(), "Refusing to register hook with empty event key");
            return false;
        }

        let duplicate = self
            .handlers
            .values()
            .any(|r| r.event_key == event_key && same_handler(&r.handler, &handler));
        if duplicate {
            tracing::warn!(
                hook = %handler.name(),
                event_key,
                "Handler already registered for event key"
            );
            return false;
        }

        let id = HandlerId(self.next_id);
        self.next_id += 1;

        if !self.priorities.register(event_key, id, priority, 1.0) {
            tracing::warn!(hook = %handler.name(), %id, "Handler id already tracked");
            return false;
        }

        let mut policy = policy.unwrap_or_default();
        policy.priority = priority;

        tracing::debug!(hook = %handler.name(), event_key, priority, %id, "Registered hook");
        self.handlers.insert(
            id,
            Registration {
                event_key: event_key.to_string(),
                handler,
                policy,
            },
        );
        self.registrations += 1;
        true
    }

    /// Remove the registration of this exact handler instance under `event_key`.
    pub fn unregister(&mut self, event_key: &str, handler: &Arc<dyn HookHandler>) -> bool {
        let event_key = event_key.trim();
        let found = self
            .handlers
            .iter()
            .find(|(_, r)| r.event_key == event_key && same_handler(&r.handler, handler))
            .map(|(id, _)| *id);

        match found {
            Some(id) => self.remove(id),
            None => false,
        }
    }

    /// Remove every registration whose handler has this name. Returns how
    /// many were removed.
    pub fn unregister_by_name(&mut self, name: &str) -> usize {
        let ids: Vec<HandlerId> = self
            .handlers
            .iter()
            .filter(|(_, r)| r.handler.name() == name)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let Some(registration) = self.handlers.remove(&id) else {
            return false;
        };
        self.priorities.unregister(id);
        self.unregistrations += 1;
        tracing::debug!(
            hook = %registration.handler.name(),
            event_key = %registration.event_key,
            %id,
            "Unregistered hook"
        );
        true
    }

    /// Handlers registered under `event_key`, highest priority first.
    pub fn get_handlers(&self, event_key: &str) -> Vec<RegisteredHandler> {
        self.priorities
            .get_execution_order(event_key.trim())
            .iter()
            .filter_map(|id| {
                let registration = self.handlers.get(id)?;
                Some(RegisteredHandler {
                    id: *id,
                    event_key: registration.event_key.clone(),
                    priority: self.priorities.priority_of(*id).unwrap_or_default(),
                    handler: registration.handler.clone(),
                    policy: registration.policy.clone(),
                })
            })
            .collect()
    }

    /// Handlers matching an event: type-level registrations first, then
    /// `type:action` registrations.
    pub fn handlers_for_event(&self, event: &Event) -> Vec<RegisteredHandler> {
        event
            .event_keys()
            .iter()
            .flat_map(|key| self.get_handlers(key))
            .collect()
    }

    /// Change the priority of one registration.
    pub fn set_priority(&mut self, id: HandlerId, priority: i32) -> bool {
        if !self.priorities.adjust_priority(id, priority) {
            return false;
        }
        if let Some(registration) = self.handlers.get_mut(&id) {
            registration.policy.priority = priority;
        }
        true
    }

    /// Change the priority of every registration of the named handler.
    pub fn set_priority_by_name(&mut self, name: &str, priority: i32) -> usize {
        let ids: Vec<HandlerId> = self
            .handlers
            .iter()
            .filter(|(_, r)| r.handler.name() == name)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter(|id| self.set_priority(*id, priority))
            .count()
    }

    pub fn set_weight(&mut self, id: HandlerId, weight: f64) -> bool {
        self.priorities.adjust_weight(id, weight)
    }

    /// Remove one key's handlers, or all handlers when `event_key` is `None`.
    pub fn clear(&mut self, event_key: Option<&str>) {
        match event_key {
            Some(key) => {
                let key = key.trim();
                let before = self.handlers.len();
                self.handlers.retain(|_, r| r.event_key != key);
                self.unregistrations += (before - self.handlers.len()) as u64;
                self.priorities.clear_key(key);
            }
            None => {
                self.unregistrations += self.handlers.len() as u64;
                self.handlers.clear();
                self.priorities.clear();
            }
        }
    }

    pub fn event_keys(&self) -> Vec<String> {
        self.priorities.event_keys()
    }

    /// Distinct handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .values()
            .map(|r| r.handler.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Count one finished execution.
    pub fn record_execution(&self, success: bool) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.handlers.len(),
            event_keys: self.event_keys().len(),
            total_registrations: self.registrations,
            total_unregistrations: self.unregistrations,
            executions: self.executions.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    pub fn priority_statistics(&self, event_key: &str) -> PriorityStats {
        self.priorities.statistics(event_key.trim())
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("handlers", &self.handlers.len())
            .field("event_keys", &self.event_keys())
            .finish()
    }
}
