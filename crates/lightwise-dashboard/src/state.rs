//! Dashboard state.
//!
//! DashboardState bundles the connector, the telemetry client and the pole
//! store so handlers can read and act on them.

use std::sync::Arc;

use lightwise_core::{
    motion_broadcast, ActivityEvent, CoreError, Pole, PoleDraft, TelemetryRecord, DEFAULT_POLE_ID,
};
use lightwise_registry::{PoleStore, RegistryResult, TelemetryClient};
use lightwise_telemetry::Metrics;
use lightwise_ws::StreamConnector;
use tracing::info;

use crate::types::StatusSnapshot;

/// Activity feed length.
pub const ACTIVITY_LIMIT: usize = 20;

#[derive(Clone)]
pub struct DashboardState {
    connector: Arc<StreamConnector>,
    telemetry: Arc<TelemetryClient>,
    poles: Arc<PoleStore>,
}

impl DashboardState {
    pub fn new(
        connector: Arc<StreamConnector>,
        telemetry: Arc<TelemetryClient>,
        poles: Arc<PoleStore>,
    ) -> Self {
        Self {
            connector,
            telemetry,
            poles,
        }
    }

    pub fn connector(&self) -> &Arc<StreamConnector> {
        &self.connector
    }

    pub fn poles(&self) -> &Arc<PoleStore> {
        &self.poles
    }

    /// Collect the connector status.
    pub fn collect_status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.connector.state(),
            endpoint: self.connector.endpoint(),
            last_error: self.connector.last_error().map(|e| e.to_string()),
            last_message: self.connector.last_message(),
            messages: self.connector.messages(),
        }
    }

    /// Message history as activity events, newest first.
    pub fn collect_activity(&self, limit: usize) -> Vec<ActivityEvent> {
        self.connector
            .messages()
            .iter()
            .take(limit)
            .map(|m| ActivityEvent::from_payload(&m.payload.to_value()))
            .collect()
    }

    /// Ask the endpoint to broadcast a motion event for `pole_id`.
    ///
    /// Returns `false` when the connector rejected the send.
    pub fn simulate_motion(&self, pole_id: Option<&str>) -> bool {
        let pole_id = pole_id.unwrap_or(DEFAULT_POLE_ID);
        let sent = self.connector.send(&motion_broadcast(pole_id));
        if sent {
            info!(pole_id, "Simulated motion event sent");
        } else {
            let reason = Metrics::ws_send_rejected(self.connector.is_connected());
            info!(pole_id, reason, "Simulated motion event not sent");
        }
        sent
    }

    pub async fn fetch_telemetry(&self) -> RegistryResult<TelemetryRecord> {
        self.telemetry.fetch().await
    }

    pub fn list_poles(&self) -> Vec<Pole> {
        self.poles.load()
    }

    /// Validate and register a pole. Returns the updated list.
    pub fn add_pole(&self, draft: &PoleDraft) -> Result<Vec<Pole>, CoreError> {
        let pole = draft.validate()?;
        info!(id = %pole.id, name = %pole.name, "Pole registered");
        Ok(self.poles.add(pole))
    }

    pub fn remove_pole(&self, id: &str) -> Vec<Pole> {
        self.poles.remove(id)
    }

    pub fn clear_poles(&self) {
        self.poles.clear();
    }
}
