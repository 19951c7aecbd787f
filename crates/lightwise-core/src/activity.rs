//! Activity feed normalization.
//!
//! Live stream payloads carry no enforced schema. The feed renders every
//! message as an `ActivityEvent`, filling missing fields with fallbacks.
//! Typical shape:
//!
//! ```json
//! { "type": "motion", "poleId": "pole_demo", "value": 1, "timestamp": "2026-02-07T..." }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

const DEFAULT_EVENT_TYPE: &str = "event";
const UNKNOWN_POLE: &str = "unknown_pole";

/// Normalized activity feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub pole_id: String,
    pub value: Value,
    pub timestamp: String,
    /// Original payload.
    pub raw: Value,
}

impl ActivityEvent {
    /// Derive an activity event from an arbitrary payload.
    ///
    /// Never fails: a payload without any recognised field (including the
    /// `{"raw": ...}` wrapper used for unparseable frames) yields an event
    /// made entirely of fallbacks.
    pub fn from_payload(payload: &Value) -> Self {
        let event_type = trimmed_str(payload.get("type"))
            .unwrap_or(DEFAULT_EVENT_TYPE)
            .to_string();

        let pole_id = trimmed_str(payload.get("poleId"))
            .or_else(|| trimmed_str(payload.get("pole")))
            .unwrap_or(UNKNOWN_POLE)
            .to_string();

        let value = ["value", "reading", "level"]
            .iter()
            .filter_map(|k| payload.get(*k))
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));

        let timestamp = present_string(payload.get("timestamp"))
            .or_else(|| present_string(payload.get("time")))
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        let id = present_string(payload.get("id")).unwrap_or_else(|| {
            format!(
                "evt_{}_{}",
                Utc::now().timestamp_millis(),
                &Uuid::new_v4().simple().to_string()[..8]
            )
        });

        Self {
            id,
            event_type,
            pole_id,
            value,
            timestamp,
            raw: payload.clone(),
        }
    }
}

/// Non-empty trimmed string field.
fn trimmed_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Field rendered as a string if it holds a non-empty string or a non-zero number.
fn present_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Broadcast request asking the endpoint to fan out a simulated motion event.
pub fn motion_broadcast(pole_id: &str) -> Value {
    serde_json::json!({
        "action": "broadcast",
        "type": "motion",
        "poleId": pole_id,
        "value": 1,
        "timestamp": Utc::now().to_rfc3339(),
    })
}
