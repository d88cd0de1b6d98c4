//! Error types for zone configuration and sample validation.

use crate::domain::types::ZoneId;
use std::path::PathBuf;
use thiserror::Error;

/// Zone set or configuration could not be applied.
///
/// A failed load never replaces the active snapshot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("zone {zone_id}: degenerate geometry: {reason}")]
    DegenerateGeometry { zone_id: ZoneId, reason: String },

    #[error("zone {zone_id}: invalid schedule: {reason}")]
    InvalidSchedule { zone_id: ZoneId, reason: String },

    #[error("zone {zone_id}: {reason}")]
    InvalidZone { zone_id: ZoneId, reason: String },

    #[error("duplicate zone id {0}")]
    DuplicateZone(ZoneId),

    #[error("unknown zone id {0}")]
    UnknownZone(ZoneId),
}

impl ConfigError {
    pub fn degenerate(zone_id: &ZoneId, reason: impl Into<String>) -> Self {
        Self::DegenerateGeometry { zone_id: zone_id.clone(), reason: reason.into() }
    }

    pub fn invalid(zone_id: &ZoneId, reason: impl Into<String>) -> Self {
        Self::InvalidZone { zone_id: zone_id.clone(), reason: reason.into() }
    }
}

/// Malformed position sample. The sample is dropped and device state is untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("device_id is empty")]
    EmptyDeviceId,

    #[error("latitude out of range: {0}")]
    LatitudeOutOfRange(f64),

    #[error("longitude out of range: {0}")]
    LongitudeOutOfRange(f64),

    #[error("accuracy must be a finite value >= 0, got {0}")]
    InvalidAccuracy(f64),

    #[error("speed must be a finite value >= 0, got {0}")]
    InvalidSpeed(f64),

    #[error("heading must be in [0, 360), got {0}")]
    InvalidHeading(f64),
}
