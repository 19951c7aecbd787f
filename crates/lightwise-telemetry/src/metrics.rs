//! Prometheus metrics for the LightWise stream connector.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error caught at startup.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter, CounterVec,
    Encoder, Gauge, GaugeVec, IntCounter, TextEncoder,
};

/// Connection states tracked by `lightwise_ws_state`.
pub const WS_STATES: [&str; 5] = ["idle", "connecting", "connected", "disconnected", "error"];

/// Send failure reason: rejected while the connection was up.
pub const SEND_FAILED: &str = "failed";
/// Send failure reason: no open connection.
pub const SEND_NOT_CONNECTED: &str = "not_connected";

/// Stream connection state (1 = connected, 0 = otherwise).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "lightwise_ws_connected",
        "Stream connection state (1=connected)"
    )
    .unwrap()
});

/// Connector state machine current state.
/// Labels: state (idle/connecting/connected/disconnected/error)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "lightwise_ws_state",
        "Connector state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Reconnect attempts.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "lightwise_ws_reconnect_total",
        "Total stream reconnection attempts"
    )
    .unwrap()
});

/// Received frames.
/// Labels: kind (structured/raw)
pub static WS_MESSAGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lightwise_ws_messages_total",
        "Total frames received from the stream",
        &["kind"]
    )
    .unwrap()
});

/// Outbound sends that were rejected or failed.
/// Labels: reason (not_connected/failed)
pub static WS_SEND_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lightwise_ws_send_failures_total",
        "Total outbound frames not handed to the transport",
        &["reason"]
    )
    .unwrap()
});

/// Metrics recording helper.
pub struct Metrics;

impl Metrics {
    /// Set the connector state. Only the active state is 1.
    pub fn ws_state_set(state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
        WS_CONNECTED.set(if state == "connected" { 1.0 } else { 0.0 });
    }

    pub fn ws_reconnect() {
        WS_RECONNECT_TOTAL.inc();
    }

    /// Record a received frame.
    pub fn ws_message(raw: bool) {
        let kind = if raw { "raw" } else { "structured" };
        WS_MESSAGES_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a rejected send and return the reason label used.
    ///
    /// A send rejected while connected is a write failure; anything else
    /// counts as `not_connected`.
    pub fn ws_send_rejected(connected: bool) -> &'static str {
        let reason = if connected {
            SEND_FAILED
        } else {
            SEND_NOT_CONNECTED
        };
        WS_SEND_FAILURES_TOTAL.with_label_values(&[reason]).inc();
        reason
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
