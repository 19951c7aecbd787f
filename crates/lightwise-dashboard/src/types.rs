//! Dashboard API types.
//!
//! These types are used for JSON serialization in REST and WebSocket APIs.

use lightwise_core::{ActivityEvent, PoleDraft};
use lightwise_ws::{ConnectionState, InboundMessage};
use serde::{Deserialize, Serialize};

/// Connector status (sent on initial connection and via REST).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub endpoint: Option<String>,
    pub last_error: Option<String>,
    pub last_message: Option<InboundMessage>,
    /// Message history, newest first.
    pub messages: Vec<InboundMessage>,
}

/// WebSocket message pushed to live-feed clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardMessage {
    /// Full status, sent once on connect.
    Snapshot(StatusSnapshot),
    /// Connection state changed.
    State { state: ConnectionState },
    /// Stream message with its activity feed rendering.
    Message {
        message: InboundMessage,
        activity: ActivityEvent,
    },
}

/// Outcome of a fire-and-forget action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

/// Error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Optional body for `POST /api/simulate-motion`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateMotionRequest {
    #[serde(default)]
    pub pole_id: Option<String>,
}

/// Body for `POST /api/poles`; coordinates as typed.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePoleRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub lat: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub lng: String,
}

impl From<CreatePoleRequest> for PoleDraft {
    fn from(req: CreatePoleRequest) -> Self {
        PoleDraft::new(req.name, req.lat, req.lng)
    }
}

/// Accept `"40.7"` and `40.7` alike; validation happens on the draft.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
