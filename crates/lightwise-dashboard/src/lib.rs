//! lightwise-dashboard - live status dashboard for the LightWise connector.
//!
//! - REST API for connector status, activity, telemetry and poles
//! - WebSocket live feed of connector events
//! - Static HTML page
//!
//! # Routes
//!
//! ```text
//! GET    /                     static page
//! GET    /metrics              Prometheus metrics
//! GET    /api/status           connector state, last error, history
//! GET    /api/activity         history as activity events (max 20)
//! POST   /api/simulate-motion  motion broadcast via the connector
//! GET    /api/telemetry        one-shot telemetry fetch
//! GET    /api/poles            list poles
//! POST   /api/poles            register a pole
//! DELETE /api/poles            remove all poles
//! DELETE /api/poles/{id}       remove one pole
//! GET    /ws                   live feed
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lightwise_dashboard::{run_server, DashboardConfig, DashboardState};
//!
//! let state = DashboardState::new(connector, telemetry, poles);
//! tokio::spawn(async move {
//!     if let Err(e) = run_server(state, DashboardConfig::default()).await {
//!         tracing::error!(error = %e, "Dashboard server failed");
//!     }
//! });
//! ```

mod broadcast;
mod config;
mod error;
mod server;
mod state;
mod types;

pub use config::DashboardConfig;
pub use error::{DashboardError, DashboardResult};
pub use server::{create_router, run_server, AppState, ConnectionLimiter};
pub use state::{DashboardState, ACTIVITY_LIMIT};
pub use types::{
    AckResponse, CreatePoleRequest, DashboardMessage, ErrorResponse, SimulateMotionRequest,
    StatusSnapshot,
};
