//! User-defined geolocated poles.
//!
//! Operators register "virtual poles" by name and coordinates. Input
//! arrives as the raw strings typed into a form, so validation covers
//! presence, numeric parsing and coordinate range, in that order.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use uuid::Uuid;

/// Valid latitude range in degrees.
pub const LAT_RANGE: RangeInclusive<f64> = -90.0..=90.0;
/// Valid longitude range in degrees.
pub const LNG_RANGE: RangeInclusive<f64> = -180.0..=180.0;

/// A registered pole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pole {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    /// Most recent stream event attributed to this pole.
    #[serde(default)]
    pub last_event: Option<serde_json::Value>,
}

impl Pole {
    /// Create a pole with a freshly generated id.
    pub fn new(name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            id: format!("pole_{}", Uuid::new_v4().simple()),
            name: name.into(),
            lat,
            lng,
            last_event: None,
        }
    }
}

/// Unvalidated pole input as typed by an operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoleDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lat: String,
    #[serde(default)]
    pub lng: String,
}

impl PoleDraft {
    pub fn new(name: impl Into<String>, lat: impl Into<String>, lng: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lat: lat.into(),
            lng: lng.into(),
        }
    }

    /// Validate the draft and build a `Pole` from it.
    pub fn validate(&self) -> Result<Pole> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(CoreError::MissingName);
        }

        let lat = self.lat.trim();
        let lng = self.lng.trim();
        if lat.is_empty() || lng.is_empty() {
            return Err(CoreError::MissingCoordinates);
        }

        let lat = parse_coordinate(lat)?;
        let lng = parse_coordinate(lng)?;

        if !LAT_RANGE.contains(&lat) {
            return Err(CoreError::LatitudeOutOfRange(lat));
        }
        if !LNG_RANGE.contains(&lng) {
            return Err(CoreError::LongitudeOutOfRange(lng));
        }

        Ok(Pole::new(name, lat, lng))
    }
}

fn parse_coordinate(input: &str) -> Result<f64> {
    match input.parse::<f64>() {
        Ok(v) if !v.is_nan() => Ok(v),
        _ => Err(CoreError::InvalidNumber),
    }
}
