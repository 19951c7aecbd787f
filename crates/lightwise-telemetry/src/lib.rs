//! Prometheus metrics and structured logging for LightWise.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for the stream connection and message flow

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
