//! Common types used across the CML pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CmlError, Result};

/// Valid longitude range in degrees.
pub const LONGITUDE_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

/// Valid latitude range in degrees.
pub const LATITUDE_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;

/// Identifies one direction/channel of a physical link.
///
/// Ordering is lexical on `(link_id, sublink_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    pub link_id: String,
    pub sublink_id: String,
}

impl LinkKey {
    pub fn new(link_id: impl Into<String>, sublink_id: impl Into<String>) -> Self {
        Self {
            link_id: link_id.into(),
            sublink_id: sublink_id.into(),
        }
    }
}

impl std::fmt::Display for LinkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.link_id, self.sublink_id)
    }
}

/// A site location in WGS84 degrees, always within geographic ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    /// Create a point, rejecting out-of-range (or NaN) coordinates
    pub fn new(longitude: f64, latitude: f64) -> Result<Self> {
        validate_longitude(longitude)?;
        validate_latitude(latitude)?;
        Ok(Self {
            longitude,
            latitude,
        })
    }
}

/// Check a longitude against [`LONGITUDE_RANGE`]
pub fn validate_longitude(value: f64) -> Result<f64> {
    if LONGITUDE_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(CmlError::LongitudeOutOfRange(value))
    }
}

/// Check a latitude against [`LATITUDE_RANGE`]
pub fn validate_latitude(value: f64) -> Result<f64> {
    if LATITUDE_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(CmlError::LatitudeOutOfRange(value))
    }
}

/// Static properties of one sublink: geometry, frequency, polarization, length.
///
/// Keyed on `(link_id, sublink_id)`; rows are upserted so that re-ingesting
/// the same metadata file converges to the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMetadata {
    pub link_id: String,
    pub sublink_id: String,
    pub site_0: GeoPoint,
    pub site_1: GeoPoint,
    /// Signal frequency (MHz)
    pub frequency: Option<f64>,
    pub polarization: Option<String>,
    /// Physical path length (m)
    pub length: Option<f64>,
}

impl LinkMetadata {
    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.link_id.clone(), self.sublink_id.clone())
    }
}

/// One received/transmitted signal level observation.
///
/// Signal levels are nullable: a missing reading is stored as NULL rather
/// than dropping the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub time: DateTime<Utc>,
    pub link_id: String,
    pub sublink_id: String,
    /// Transmitted signal level
    pub tsl: Option<f64>,
    /// Received signal level
    pub rsl: Option<f64>,
}

impl RawSample {
    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.link_id.clone(), self.sublink_id.clone())
    }
}

/// Normalize an identifier cell: trimmed, non-empty, kept as text.
///
/// Identifiers such as `00123` never pass through a numeric type.
pub fn normalize_identifier(raw: &str, field: &'static str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CmlError::EmptyIdentifier(field));
    }
    Ok(trimmed.to_string())
}
