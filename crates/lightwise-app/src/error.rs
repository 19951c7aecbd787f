//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] lightwise_ws::WsError),

    #[error("Registry error: {0}")]
    Registry(#[from] lightwise_registry::RegistryError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] lightwise_telemetry::TelemetryError),

    #[error("Dashboard error: {0}")]
    Dashboard(#[from] lightwise_dashboard::DashboardError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
