//! Inbound message normalization and bounded history.
//!
//! Frames carry no enforced schema. Each one is decoded as JSON when
//! possible; anything else is kept verbatim under a `raw` field so that
//! no frame is lost to a parse error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

/// Default history cap.
pub const DEFAULT_MAX_MESSAGES: usize = 50;

/// Upper bound on the capacity reserved up front for a history buffer.
const MAX_PREALLOCATED: usize = 1024;

/// Decoded payload of one inbound frame.
///
/// Serializes to the decoded JSON value itself, or to `{"raw": "<text>"}`
/// when decoding failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessagePayload {
    /// Frame decoded as JSON.
    Structured(Value),
    /// Frame that was not valid JSON, kept as received.
    Raw { raw: String },
}

impl MessagePayload {
    /// Decode a text frame. Never fails.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Raw {
                raw: text.to_string(),
            },
        }
    }

    /// Check if decoding fell back to the raw wrapper.
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }

    /// Payload as a JSON value (the raw wrapper becomes `{"raw": ...}`).
    pub fn to_value(&self) -> Value {
        match self {
            Self::Structured(value) => value.clone(),
            Self::Raw { raw } => serde_json::json!({ "raw": raw }),
        }
    }

    /// Look up a top-level field of a structured object payload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Structured(value) => value.get(key),
            Self::Raw { .. } => None,
        }
    }
}

/// One received frame after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Receipt order within one connector, starting at 0.
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    pub payload: MessagePayload,
}

impl InboundMessage {
    /// Normalize a text frame.
    pub fn from_frame(seq: u64, text: &str) -> Self {
        Self {
            seq,
            received_at: Utc::now(),
            payload: MessagePayload::parse(text),
        }
    }
}

/// Fixed-capacity message history, newest first.
///
/// Inserting into a full history evicts the oldest entry, so
/// `len() <= capacity()` holds after every insertion. A capacity of zero
/// keeps nothing.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    entries: VecDeque<InboundMessage>,
    capacity: usize,
}

impl MessageHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(MAX_PREALLOCATED)),
            capacity,
        }
    }

    /// Insert a message as the newest entry.
    pub fn push(&mut self, message: InboundMessage) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(message);
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl Iterator<Item = &InboundMessage> {
        self.entries.iter()
    }

    /// Copy of the history, newest first.
    pub fn to_vec(&self) -> Vec<InboundMessage> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}
