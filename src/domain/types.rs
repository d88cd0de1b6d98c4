//! Shared types for the geofence engine

use crate::domain::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current wall-clock time as epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Newtype wrapper for device IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Newtype wrapper for zone IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zone severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership transition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Enter,
    Exit,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Enter => "enter",
            AlertKind::Exit => "exit",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A WGS84 coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True when both components are finite and inside the WGS84 range
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Position report as received on the wire
///
/// Every field is optional so that a missing field surfaces as a
/// `ValidationError` instead of an opaque parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionReport {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Horizontal accuracy radius in meters
    #[serde(default, alias = "accuracy")]
    pub accuracy_m: Option<f64>,
    /// Ground speed in m/s
    #[serde(default)]
    pub speed: Option<f64>,
    /// Course over ground in degrees
    #[serde(default)]
    pub heading: Option<f64>,
    /// Fix time (epoch ms)
    #[serde(default, alias = "ts")]
    pub timestamp: Option<u64>,
}

impl PositionReport {
    /// Validate field presence and ranges, producing a typed sample
    pub fn validate(self) -> Result<PositionSample, ValidationError> {
        let device_id = self.device_id.ok_or(ValidationError::MissingField("device_id"))?;
        if device_id.trim().is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }
        let latitude = self.latitude.ok_or(ValidationError::MissingField("latitude"))?;
        let longitude = self.longitude.ok_or(ValidationError::MissingField("longitude"))?;
        let accuracy_m = self.accuracy_m.ok_or(ValidationError::MissingField("accuracy_m"))?;
        let timestamp_ms = self.timestamp.ok_or(ValidationError::MissingField("timestamp"))?;

        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ValidationError::LatitudeOutOfRange(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ValidationError::LongitudeOutOfRange(longitude));
        }
        if !accuracy_m.is_finite() || accuracy_m < 0.0 {
            return Err(ValidationError::InvalidAccuracy(accuracy_m));
        }
        if let Some(speed) = self.speed {
            if !speed.is_finite() || speed < 0.0 {
                return Err(ValidationError::InvalidSpeed(speed));
            }
        }
        if let Some(heading) = self.heading {
            if !heading.is_finite() || !(0.0..360.0).contains(&heading) {
                return Err(ValidationError::InvalidHeading(heading));
            }
        }

        Ok(PositionSample {
            device_id: DeviceId(device_id),
            position: GeoPoint::new(latitude, longitude),
            accuracy_m,
            speed: self.speed,
            heading: self.heading,
            timestamp_ms,
        })
    }
}

/// Validated position sample
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    pub device_id: DeviceId,
    pub position: GeoPoint,
    pub accuracy_m: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp_ms: u64,
}

impl PositionSample {
    /// Convenience constructor for a sample with no motion data
    pub fn new(
        device_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        accuracy_m: f64,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            device_id: DeviceId(device_id.into()),
            position: GeoPoint::new(latitude, longitude),
            accuracy_m,
            speed: None,
            heading: None,
            timestamp_ms,
        }
    }
}

/// Zone membership transition, ready for dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub alert_id: Uuid,
    pub device_id: DeviceId,
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub kind: AlertKind,
    pub severity: Severity,
    /// Sample timestamp that triggered the transition (epoch ms)
    pub timestamp: u64,
    pub latitude: f64,
    pub longitude: f64,
}

impl AlertEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
