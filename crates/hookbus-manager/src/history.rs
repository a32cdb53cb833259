//! Bounded execution history and running averages.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use hookbus_types::{Event, EventType, HookResult};

/// Characters of the session key kept in history records.
const SESSION_KEY_PREFIX: usize = 8;

/// One `trigger_event` call. Payload values are never retained.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub action: String,
    pub session_key: String,
    pub data_keys: Vec<String>,
    pub hook_count: usize,
    pub successes: usize,
    pub failures: usize,
    /// Seconds.
    pub duration: f64,
}

impl ExecutionRecord {
    pub fn new(event: &Event, results: &[HookResult], duration: f64) -> Self {
        Self::begin(event).complete(results, duration)
    }

    /// Capture the event identity before the event is handed off.
    pub fn begin(event: &Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: event.timestamp,
            event_type: event.event_type,
            action: event.action.clone(),
            session_key: redact_session_key(&event.session_key),
            data_keys: event.data.keys().cloned().collect(),
            hook_count: 0,
            successes: 0,
            failures: 0,
            duration: 0.0,
        }
    }

    pub fn complete(mut self, results: &[HookResult], duration: f64) -> Self {
        self.successes = results.iter().filter(|r| r.success).count();
        self.hook_count = results.len();
        self.failures = results.len() - self.successes;
        self.duration = duration;
        self
    }
}

/// Keep the first few characters of a session key.
pub fn redact_session_key(key: &str) -> String {
    if key.chars().count() <= SESSION_KEY_PREFIX {
        return key.to_string();
    }
    let prefix: String = key.chars().take(SESSION_KEY_PREFIX).collect();
    format!("{prefix}...")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunningAverages {
    pub total_triggers: u64,
    pub total_hooks_executed: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Seconds per trigger.
    pub average_duration: f64,
    pub average_hooks_per_trigger: f64,
}

impl RunningAverages {
    fn observe(&mut self, record: &ExecutionRecord) {
        self.total_triggers += 1;
        self.total_hooks_executed += record.hook_count as u64;
        self.total_successes += record.successes as u64;
        self.total_failures += record.failures as u64;

        let n = self.total_triggers as f64;
        self.average_duration += (record.duration - self.average_duration) / n;
        self.average_hooks_per_trigger += (record.hook_count as f64 - self.average_hooks_per_trigger) / n;
    }
}

/// Ring buffer of the most recent execution records.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
    averages: RunningAverages,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
            averages: RunningAverages::default(),
        }
    }

    pub fn push(&mut self, record: ExecutionRecord) {
        self.averages.observe(&record);
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Shrink or grow the buffer, dropping the oldest records first.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn recent(&self, limit: Option<usize>) -> Vec<ExecutionRecord> {
        let skip = limit.map_or(0, |l| self.records.len().saturating_sub(l));
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn averages(&self) -> &RunningAverages {
        &self.averages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn record(action: &str, outcomes: &[bool], duration: f64) -> ExecutionRecord {
        let mut data = Map::new();
        data.insert("password".to_string(), Value::String("hunter2".to_string()));
        let event = Event::new(EventType::Command, action, "session-abcdef-123").with_data(data);
        let results: Vec<HookResult> = outcomes
            .iter()
            .map(|ok| if *ok { HookResult::ok() } else { HookResult::failure("x") })
            .collect();
        ExecutionRecord::new(&event, &results, duration)
    }

    #[test]
    fn test_record_is_redacted() {
        let record = record("new", &[true, false], 0.5);
        assert_eq!(record.session_key, "session-...");
        assert_eq!(record.data_keys, vec!["password"]);
        assert_eq!(record.successes, 1);
        assert_eq!(record.failures, 1);

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("abcdef"));
        assert_eq!(redact_session_key("short"), "short");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = ExecutionHistory::new(3);
        for i in 0..5 {
            history.push(record(&format!("a{i}"), &[true], 1.0));
        }
        assert_eq!(history.len(), 3);
        let actions: Vec<_> = history.recent(None).into_iter().map(|r| r.action).collect();
        assert_eq!(actions, vec!["a2", "a3", "a4"]);
        let last: Vec<_> = history.recent(Some(2)).into_iter().map(|r| r.action).collect();
        assert_eq!(last, vec!["a3", "a4"]);

        history.set_capacity(1);
        assert_eq!(history.recent(Some(10)).len(), 1);
        assert_eq!(history.averages().total_triggers, 5);
    }

    #[test]
    fn test_running_averages() {
        let mut history = ExecutionHistory::new(10);
        history.push(record("a", &[true, true], 1.0));
        history.push(record("b", &[false], 3.0));
        history.push(record("c", &[], 2.0));

        let avg = history.averages();
        assert_eq!(avg.total_triggers, 3);
        assert_eq!(avg.total_hooks_executed, 3);
        assert_eq!(avg.total_failures, 1);
        assert!((avg.average_duration - 2.0).abs() < 1e-9);
        assert!((avg.average_hooks_per_trigger - 1.0).abs() < 1e-9);
    }
}
