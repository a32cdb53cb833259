use serde_json::{Map, Value};

use hookbus_manager::HookManager;
use hookbus_types::{EventType, HookResult};

/// Trigger one event and wait for in-flight handlers to settle.
pub async fn run_trigger(
    manager: &HookManager,
    event_type: EventType,
    action: &str,
    session_key: &str,
    pairs: &[String],
) -> anyhow::Result<Vec<HookResult>> {
    let data = parse_data(pairs)?;
    manager.initialize().await;
    let results = manager
        .trigger_event(event_type, action, session_key, None, data)
        .await;
    manager.shutdown().await;
    Ok(results)
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type,
/// anything else becomes a string.
pub fn parse_data(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut data = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got '{pair}'"))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("empty key in '{pair}'");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        data.insert(key.to_string(), value);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data() {
        let pairs = vec![
            "user=alice".to_string(),
            "count=3".to_string(),
            "flags={\"dry_run\": true}".to_string(),
            "expr=a=b".to_string(),
        ];
        let data = parse_data(&pairs).unwrap();
        assert_eq!(data["user"], Value::String("alice".to_string()));
        assert_eq!(data["count"], Value::from(3));
        assert_eq!(data["flags"]["dry_run"], Value::Bool(true));
        assert_eq!(data["expr"], Value::String("a=b".to_string()));
    }

    #[test]
    fn test_parse_data_rejects_malformed() {
        assert!(parse_data(&["novalue".to_string()]).is_err());
        assert!(parse_data(&["=x".to_string()]).is_err());
    }
}
