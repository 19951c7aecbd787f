//! Error types for lightwise-core.

use thiserror::Error;

/// Core error types.
///
/// The `Display` text of each validation variant is the message shown to
/// the operator, so keep it human-readable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("Pole name is required.")]
    MissingName,

    #[error("Latitude and longitude are required.")]
    MissingCoordinates,

    #[error("Latitude/Longitude must be valid numbers.")]
    InvalidNumber,

    #[error("Latitude must be between -90 and 90.")]
    LatitudeOutOfRange(f64),

    #[error("Longitude must be between -180 and 180.")]
    LongitudeOutOfRange(f64),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
