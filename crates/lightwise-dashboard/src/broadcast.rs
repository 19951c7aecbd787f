//! Live-feed fan-out.
//!
//! One pump task per server turns connector events into serialized
//! `DashboardMessage`s and publishes them to every connected client.
//! The pump holds only an event subscription, never the connector itself,
//! so it ends once the connector is dropped.

use std::sync::Arc;

use lightwise_core::ActivityEvent;
use lightwise_registry::PoleStore;
use lightwise_ws::{ConnectorEvent, InboundMessage};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::types::DashboardMessage;

/// Forward connector events until the connector goes away.
pub async fn run_event_pump(
    mut events: broadcast::Receiver<ConnectorEvent>,
    poles: Arc<PoleStore>,
    tx: broadcast::Sender<String>,
) {
    loop {
        let msg = match events.recv().await {
            Ok(ConnectorEvent::StateChanged(connection_state)) => DashboardMessage::State {
                state: connection_state,
            },
            Ok(ConnectorEvent::Message(message)) => {
                let activity = record_message(&poles, &message);
                DashboardMessage::Message { message, activity }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Dashboard event pump lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Connector event channel closed, stopping pump");
                break;
            }
        };

        match serde_json::to_string(&msg) {
            Ok(json) => {
                // No receivers is normal when no clients are connected
                if let Ok(n) = tx.send(json) {
                    trace!(receivers = n, "Live update sent");
                }
            }
            Err(e) => {
                debug!(error = %e, "Failed to serialize live update");
            }
        }
    }
}

/// Attribute a stream message to its pole, if one is registered.
fn record_message(poles: &PoleStore, message: &InboundMessage) -> ActivityEvent {
    let activity = ActivityEvent::from_payload(&message.payload.to_value());
    if let Ok(event) = serde_json::to_value(&activity) {
        if poles.record_event(&activity.pole_id, event) {
            debug!(pole_id = %activity.pole_id, "Pole last event updated");
        }
    }
    activity
}
