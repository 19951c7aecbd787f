//! Core domain types for the LightWise pole network.
//!
//! This crate provides the types shared by the stream connector's
//! consumers:
//! - `TelemetryRecord`: flat per-pole sensor reading
//! - `Pole`, `PoleDraft`: user-defined geolocated poles and their validation
//! - `ActivityEvent`: best-effort normalization of live stream payloads

pub mod activity;
pub mod error;
pub mod pole;
pub mod telemetry;

pub use activity::{motion_broadcast, ActivityEvent};
pub use error::{CoreError, Result};
pub use pole::{Pole, PoleDraft, LAT_RANGE, LNG_RANGE};
pub use telemetry::{TelemetryRecord, DEFAULT_POLE_ID};
