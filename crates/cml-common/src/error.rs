//! Error types for CML domain validation

use thiserror::Error;

/// Result type alias for CML domain operations
pub type Result<T> = std::result::Result<T, CmlError>;

/// Main error type for CML domain values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CmlError {
    #[error("Invalid longitude {0}: must be within -180..180")]
    LongitudeOutOfRange(f64),

    #[error("Invalid latitude {0}: must be within -90..90")]
    LatitudeOutOfRange(f64),

    #[error("Identifier cannot be empty: {0}")]
    EmptyIdentifier(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}
