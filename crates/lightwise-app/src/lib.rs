//! LightWise stream connector service.
//!
//! Wires the components together:
//! - Stream connector to the broadcast endpoint
//! - Telemetry fetch and pole registry
//! - Metrics and log mirroring of connector events
//! - Dashboard server

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, StateTracker};
pub use config::{AppConfig, PolesConfig, StreamConfig};
pub use error::{AppError, AppResult};
