//! Telemetry fetch and pole registry storage for LightWise.
//!
//! - `TelemetryClient`: one-shot telemetry fetch, real or mock
//! - `PoleStore`: JSON-file persistence of user-defined poles

pub mod error;
pub mod store;
pub mod telemetry;

pub use error::{RegistryError, RegistryResult};
pub use store::{PoleStore, STORAGE_KEY};
pub use telemetry::{TelemetryClient, TelemetryConfig, API_KEY_HEADER};
