//! Application orchestration.

use std::sync::Arc;

use lightwise_core::{motion_broadcast, ActivityEvent, DEFAULT_POLE_ID};
use lightwise_dashboard::{run_server, DashboardState};
use lightwise_registry::{PoleStore, TelemetryClient};
use lightwise_telemetry::Metrics;
use lightwise_ws::{ConnectionState, ConnectorEvent, StreamConnector};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;

/// Follows connector state changes for metrics.
///
/// Reconnects are taken from the connector's own attempt counter, so a
/// caller-initiated `connect()` is never counted as one.
#[derive(Debug, Clone, Copy)]
pub struct StateTracker {
    last: ConnectionState,
    reconnects: u64,
}

impl StateTracker {
    pub fn new(initial: ConnectionState, reconnects: u64) -> Self {
        Metrics::ws_state_set(initial.as_str());
        Self {
            last: initial,
            reconnects,
        }
    }

    pub fn last(&self) -> ConnectionState {
        self.last
    }

    /// Record a state change along with the connector's current reconnect
    /// count. Returns `true` if reconnect attempts started since the last call.
    pub fn observe(&mut self, state: ConnectionState, reconnects: u64) -> bool {
        let started = reconnects.saturating_sub(self.reconnects);
        self.last = state;
        self.reconnects = self.reconnects.max(reconnects);

        Metrics::ws_state_set(state.as_str());
        for _ in 0..started {
            Metrics::ws_reconnect();
        }
        started > 0
    }
}

/// Background tasks started by `Application::start`.
pub struct AppTasks {
    mirror: JoinHandle<()>,
    dashboard: Option<JoinHandle<()>>,
}

impl AppTasks {
    pub fn abort(self) {
        self.mirror.abort();
        if let Some(dashboard) = self.dashboard {
            dashboard.abort();
        }
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    connector: Arc<StreamConnector>,
    telemetry: Arc<TelemetryClient>,
    poles: Arc<PoleStore>,
    simulate_motion: bool,
}

impl Application {
    /// Build the components. The connector stays idle until `start`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let connector = Arc::new(StreamConnector::new(None, config.stream.options.clone()));
        let telemetry = Arc::new(TelemetryClient::new(config.telemetry.clone())?);
        let poles = Arc::new(PoleStore::new(&config.poles.data_dir));

        Ok(Self {
            config,
            connector,
            telemetry,
            poles,
            simulate_motion: false,
        })
    }

    /// Send one simulated motion event once the connection is up.
    pub fn with_simulated_motion(mut self, enabled: bool) -> Self {
        self.simulate_motion = enabled;
        self
    }

    pub fn connector(&self) -> &Arc<StreamConnector> {
        &self.connector
    }

    /// Run until Ctrl-C.
    pub async fn run(&self) -> AppResult<()> {
        let tasks = self.start().await;

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        self.connector.disconnect();
        tasks.abort();
        info!("Shutting down");
        Ok(())
    }

    /// Fetch telemetry once, start event mirroring and the dashboard, then connect.
    pub async fn start(&self) -> AppTasks {
        self.log_telemetry().await;

        // Subscribe before connecting so the first transitions are seen
        let events = self.connector.subscribe();
        let mirror = tokio::spawn(mirror_events(
            self.connector.clone(),
            events,
            self.simulate_motion,
        ));

        let dashboard = self.config.dashboard.enabled.then(|| {
            let state = DashboardState::new(
                self.connector.clone(),
                self.telemetry.clone(),
                self.poles.clone(),
            );
            let config = self.config.dashboard.clone();
            tokio::spawn(async move {
                if let Err(e) = run_server(state, config).await {
                    error!(error = %e, "Dashboard server failed");
                }
            })
        });

        match &self.config.stream.endpoint {
            Some(endpoint) => info!(url = %endpoint, "Connecting to stream endpoint"),
            None => warn!("No stream endpoint configured, connector stays idle"),
        }
        self.connector.set_endpoint(self.config.stream.endpoint.clone());

        AppTasks { mirror, dashboard }
    }

    async fn log_telemetry(&self) {
        match self.telemetry.fetch().await {
            Ok(record) => info!(
                pole_id = %record.pole_id,
                timestamp = %record.timestamp,
                ambient_lux = ?record.ambient_lux,
                motion = ?record.motion,
                temp_c = ?record.temp_c,
                humidity = ?record.humidity,
                rssi = ?record.rssi,
                "Telemetry fetched"
            ),
            Err(e) => warn!(error = %e, "Telemetry fetch failed"),
        }
    }
}

/// Mirror connector events into metrics and logs.
async fn mirror_events(
    connector: Arc<StreamConnector>,
    mut events: broadcast::Receiver<ConnectorEvent>,
    simulate_motion: bool,
) {
    let mut tracker = StateTracker::new(connector.state(), connector.reconnect_attempts());
    let mut pending_simulation = simulate_motion;

    loop {
        match events.recv().await {
            Ok(ConnectorEvent::StateChanged(state)) => {
                if tracker.observe(state, connector.reconnect_attempts()) {
                    info!("Reconnect attempt started");
                }
                match state {
                    ConnectionState::Error => {
                        let reason = connector.last_error().map(|e| e.to_string());
                        warn!(error = ?reason, "Stream connection error");
                    }
                    _ => info!(state = %state, "Stream connection state"),
                }

                if state == ConnectionState::Connected && pending_simulation {
                    pending_simulation = false;
                    send_simulated_motion(&connector);
                }
            }
            Ok(ConnectorEvent::Message(message)) => {
                Metrics::ws_message(message.payload.is_raw());
                let activity = ActivityEvent::from_payload(&message.payload.to_value());
                info!(
                    seq = message.seq,
                    event_type = %activity.event_type,
                    pole_id = %activity.pole_id,
                    value = %activity.value,
                    "Stream event"
                );
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Event mirror lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Connector event channel closed");
                break;
            }
        }
    }
}

fn send_simulated_motion(connector: &StreamConnector) {
    if connector.send(&motion_broadcast(DEFAULT_POLE_ID)) {
        info!(pole_id = DEFAULT_POLE_ID, "Simulated motion event sent");
    } else {
        let reason = Metrics::ws_send_rejected(connector.is_connected());
        warn!(pole_id = DEFAULT_POLE_ID, reason, "Simulated motion event not sent");
    }
}
