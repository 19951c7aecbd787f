//! Per-pole telemetry record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pole shown on the overview when no telemetry has been fetched.
pub const DEFAULT_POLE_ID: &str = "LW-001";

/// Flat telemetry reading for a single pole.
///
/// Sensor fields are nullable: a pole that has not reported a value yet
/// serializes it as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub pole_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ambient_lux: Option<f64>,
    #[serde(default)]
    pub motion: Option<f64>,
    #[serde(default)]
    pub temp_c: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub rssi: Option<i32>,
}

impl TelemetryRecord {
    /// Demo record with no readings, stamped now.
    pub fn demo() -> Self {
        Self {
            pole_id: DEFAULT_POLE_ID.to_string(),
            timestamp: Utc::now(),
            ambient_lux: None,
            motion: None,
            temp_c: None,
            humidity: None,
            rssi: None,
        }
    }

    /// Check if any sensor has reported.
    pub fn has_readings(&self) -> bool {
        self.ambient_lux.is_some()
            || self.motion.is_some()
            || self.temp_c.is_some()
            || self.humidity.is_some()
            || self.rssi.is_some()
    }
}
