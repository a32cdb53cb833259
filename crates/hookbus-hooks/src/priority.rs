//! Priority bookkeeping and cached execution order.
//!
//! Each event key owns a max-heap of [`PriorityEntry`] values ordered by
//! priority (descending) and then registration timestamp (ascending).
//! Removal and re-prioritization are lazy: the live table records the
//! current version of every handler, and heap entries whose version no
//! longer matches are skipped when the order is resolved. A key's heap is
//! compacted once its stale entries outnumber the live ones by a wide
//! margin.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Stale entries tolerated per key before a compaction is considered.
const COMPACT_MIN_STALE: usize = 32;

/// Identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandlerId(pub u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One heap slot.
#[derive(Debug, Clone)]
pub struct PriorityEntry {
    pub priority: i32,
    pub event_key: String,
    pub handler_id: HandlerId,
    /// Registration sequence number; earlier registrations win ties.
    pub timestamp: u64,
    pub weight: f64,
    version: u32,
}

impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| other.handler_id.cmp(&self.handler_id))
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityEntry {}

#[derive(Debug, Clone)]
struct LiveState {
    event_key: String,
    priority: i32,
    weight: f64,
    timestamp: u64,
    version: u32,
}

fn is_current(live: &HashMap<HandlerId, LiveState>, entry: &PriorityEntry) -> bool {
    live.get(&entry.handler_id)
        .is_some_and(|state| state.version == entry.version && state.event_key == entry.event_key)
}

/// Priority summary for one event key.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PriorityStats {
    pub event_key: String,
    pub live: usize,
    pub stale: usize,
    pub min_priority: Option<i32>,
    pub max_priority: Option<i32>,
    pub mean_priority: Option<f64>,
    pub total_weight: f64,
    pub cached: bool,
}

/// Heap-backed priority store with a per-key execution order cache.
#[derive(Debug, Default)]
pub struct PriorityManager {
    heaps: HashMap<String, BinaryHeap<PriorityEntry>>,
    live: HashMap<HandlerId, LiveState>,
    stale: HashMap<String, usize>,
    cache: Mutex<HashMap<String, Arc<[HandlerId]>>>,
    next_timestamp: u64,
    compactions: u64,
}

impl PriorityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handler under `event_key`. Returns `false` if the id is
    /// already live.
    pub fn register(
        &mut self,
        event_key: &str,
        handler_id: HandlerId,
        priority: i32,
        weight: f64,
    ) -> bool {
        if self.live.contains_key(&handler_id) {
            return false;
        }

        let timestamp = self.next_timestamp;
        self.next_timestamp += 1;

        self.live.insert(
            handler_id,
            LiveState {
                event_key: event_key.to_string(),
                priority,
                weight,
                timestamp,
                version: 0,
            },
        );
        self.heaps
            .entry(event_key.to_string())
            .or_default()
            .push(PriorityEntry {
                priority,
                event_key: event_key.to_string(),
                handler_id,
                timestamp,
                weight,
                version: 0,
            });
        self.invalidate(event_key);
        true
    }

    /// Stop tracking a handler. Its heap entry stays behind as a stale slot.
    pub fn unregister(&mut self, handler_id: HandlerId) -> bool {
        let Some(state) = self.live.remove(&handler_id) else {
            return false;
        };
        *self.stale.entry(state.event_key.clone()).or_default() += 1;
        self.invalidate(&state.event_key);
        self.maybe_compact(&state.event_key);
        true
    }

    /// Change a handler's priority, keeping its registration timestamp.
    pub fn adjust_priority(&mut self, handler_id: HandlerId, priority: i32) -> bool {
        let Some(state) = self.live.get_mut(&handler_id) else {
            return false;
        };
        if state.priority == priority {
            return true;
        }
        state.priority = priority;
        state.version += 1;

        let entry = PriorityEntry {
            priority,
            event_key: state.event_key.clone(),
            handler_id,
            timestamp: state.timestamp,
            weight: state.weight,
            version: state.version,
        };
        let event_key = state.event_key.clone();

        self.heaps.entry(event_key.clone()).or_default().push(entry);
        *self.stale.entry(event_key.clone()).or_default() += 1;
        self.invalidate(&event_key);
        self.maybe_compact(&event_key);
        true
    }

    /// Change a handler's weight. Weights feed statistics only.
    pub fn adjust_weight(&mut self, handler_id: HandlerId, weight: f64) -> bool {
        let Some(state) = self.live.get_mut(&handler_id) else {
            return false;
        };
        state.weight = weight;
        let event_key = state.event_key.clone();
        self.invalidate(&event_key);
        true
    }

    pub fn priority_of(&self, handler_id: HandlerId) -> Option<i32> {
        self.live.get(&handler_id).map(|s| s.priority)
    }

    /// Live handlers for `event_key`, highest priority first, ties in
    /// registration order.
    pub fn get_execution_order(&self, event_key: &str) -> Arc<[HandlerId]> {
        if let Some(order) = self.cache_guard().get(event_key) {
            return order.clone();
        }

        let mut entries: Vec<&PriorityEntry> = self
            .heaps
            .get(event_key)
            .map(|heap| heap.iter().filter(|e| is_current(&self.live, e)).collect())
            .unwrap_or_default();
        entries.sort_unstable_by(|a, b| b.cmp(a));

        let order: Arc<[HandlerId]> = entries.iter().map(|e| e.handler_id).collect();
        self.cache_guard()
            .insert(event_key.to_string(), order.clone());
        order
    }

    /// Forget every handler registered under `event_key`.
    pub fn clear_key(&mut self, event_key: &str) {
        self.heaps.remove(event_key);
        self.stale.remove(event_key);
        self.live.retain(|_, state| state.event_key != event_key);
        self.invalidate(event_key);
    }

    pub fn clear(&mut self) {
        self.heaps.clear();
        self.stale.clear();
        self.live.clear();
        self.cache_guard().clear();
    }

    pub fn event_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .live
            .values()
            .map(|s| s.event_key.clone())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn compactions(&self) -> u64 {
        self.compactions
    }

    pub fn statistics(&self, event_key: &str) -> PriorityStats {
        let states: Vec<&LiveState> = self
            .live
            .values()
            .filter(|s| s.event_key == event_key)
            .collect();
        let priorities: Vec<i32> = states.iter().map(|s| s.priority).collect();
        let mean_priority = (!priorities.is_empty()).then(|| {
            priorities.iter().map(|p| f64::from(*p)).sum::<f64>() / priorities.len() as f64
        });

        PriorityStats {
            event_key: event_key.to_string(),
            live: states.len(),
            stale: self.stale.get(event_key).copied().unwrap_or(0),
            min_priority: priorities.iter().min().copied(),
            max_priority: priorities.iter().max().copied(),
            mean_priority,
            total_weight: states.iter().map(|s| s.weight).sum(),
            cached: self.cache_guard().contains_key(event_key),
        }
    }

    fn invalidate(&self, event_key: &str) {
        self.cache_guard().remove(event_key);
    }

    fn maybe_compact(&mut self, event_key: &str) {
        let stale = self.stale.get(event_key).copied().unwrap_or(0);
        let live = self
            .live
            .values()
            .filter(|s| s.event_key == event_key)
            .count();
        if stale <= COMPACT_MIN_STALE || stale <= live * 2 {
            return;
        }

        let live_table = &self.live;
        if let Some(heap) = self.heaps.get_mut(event_key) {
            heap.retain(|e| is_current(live_table, e));
            if heap.is_empty() {
                self.heaps.remove(event_key);
            }
        }
        self.stale.remove(event_key);
        self.compactions += 1;
        tracing::debug!(event_key, stale, live, "Compacted priority heap");
    }

    fn cache_guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<[HandlerId]>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(order: &[HandlerId]) -> Vec<u64> {
        order.iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_priority_desc_then_registration_order() {
        let mut pm = PriorityManager::new();
        pm.register("command", HandlerId(1), 5, 1.0);
        pm.register("command", HandlerId(2), 10, 1.0);
        pm.register("command", HandlerId(3), 5, 1.0);
        pm.register("command", HandlerId(4), -1, 1.0);

        assert_eq!(ids(&pm.get_execution_order("command")), vec![2, 1, 3, 4]);
        assert!(pm.get_execution_order("session").is_empty());
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let mut pm = PriorityManager::new();
        assert!(pm.register("command", HandlerId(1), 0, 1.0));
        assert!(!pm.register("command", HandlerId(1), 3, 1.0));
    }

    #[test]
    fn test_unregister_invalidates_cache() {
        let mut pm = PriorityManager::new();
        pm.register("command", HandlerId(1), 5, 1.0);
        pm.register("command", HandlerId(2), 1, 1.0);
        assert_eq!(ids(&pm.get_execution_order("command")), vec![1, 2]);
        assert!(pm.statistics("command").cached);

        assert!(pm.unregister(HandlerId(1)));
        assert!(!pm.unregister(HandlerId(1)));
        assert_eq!(ids(&pm.get_execution_order("command")), vec![2]);
        assert_eq!(pm.statistics("command").stale, 1);
    }

    #[test]
    fn test_adjust_priority_reorders_and_keeps_tie_break() {
        let mut pm = PriorityManager::new();
        pm.register("k", HandlerId(1), 1, 1.0);
        pm.register("k", HandlerId(2), 5, 1.0);
        pm.register("k", HandlerId(3), 3, 1.0);
        assert_eq!(ids(&pm.get_execution_order("k")), vec![2, 3, 1]);

        assert!(pm.adjust_priority(HandlerId(1), 5));
        // Same priority as #2; #2 registered first.
        assert_eq!(ids(&pm.get_execution_order("k")), vec![2, 1, 3]);
        assert_eq!(pm.priority_of(HandlerId(1)), Some(5));
        assert!(!pm.adjust_priority(HandlerId(99), 1));
    }

    #[test]
    fn test_compaction_drops_stale_entries() {
        let mut pm = PriorityManager::new();
        pm.register("k", HandlerId(0), 0, 1.0);
        for i in 1..=40 {
            pm.register("k", HandlerId(i), i as i32, 1.0);
            pm.unregister(HandlerId(i));
        }
        assert!(pm.compactions() >= 1);
        assert!(pm.statistics("k").stale <= COMPACT_MIN_STALE);
        assert_eq!(ids(&pm.get_execution_order("k")), vec![0]);
    }

    #[test]
    fn test_statistics() {
        let mut pm = PriorityManager::new();
        pm.register("k", HandlerId(1), 2, 1.0);
        pm.register("k", HandlerId(2), 6, 0.5);
        pm.adjust_weight(HandlerId(1), 2.0);

        let stats = pm.statistics("k");
        assert_eq!(stats.live, 2);
        assert_eq!(stats.min_priority, Some(2));
        assert_eq!(stats.max_priority, Some(6));
        assert_eq!(stats.mean_priority, Some(4.0));
        assert_eq!(stats.total_weight, 2.5);
    }

    #[test]
    fn test_clear_key() {
        let mut pm = PriorityManager::new();
        pm.register("a", HandlerId(1), 0, 1.0);
        pm.register("b", HandlerId(2), 0, 1.0);
        pm.clear_key("a");
        assert!(pm.get_execution_order("a").is_empty());
        assert_eq!(pm.event_keys(), vec!["b".to_string()]);
        assert_eq!(pm.live_count(), 1);
    }
}
