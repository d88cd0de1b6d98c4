//! Zone definitions file (JSON)
//!
//! ```json
//! {
//!   "danger_zones": [
//!     {
//!       "id": "pit-1",
//!       "name": "Excavation pit",
//!       "type": "construction",
//!       "severity": "high",
//!       "active": true,
//!       "geometry": { "type": "circle", "center": { "latitude": 40.71, "longitude": -74.0 }, "radius": 50 },
//!       "alerts": { "proximity": 25 },
//!       "time_restrictions": { "active_hours": { "start": "07:00", "end": "19:00" } },
//!       "expiry_date": "2026-12-31T23:59:59Z"
//!     }
//!   ]
//! }
//! ```
//!
//! Polygon geometry uses `"coordinates": [[lat, lon], ...]`.

use crate::domain::error::ConfigError;
use crate::domain::geometry::Geometry;
use crate::domain::types::{GeoPoint, Severity, ZoneId};
use crate::domain::zone::{ActiveHours, Schedule, Zone, DEFAULT_PROXIMITY_M};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ZonesFile {
    #[serde(default)]
    danger_zones: Vec<ZoneDef>,
}

#[derive(Debug, Deserialize)]
struct ZoneDef {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    zone_type: Option<String>,
    #[serde(default)]
    severity: Severity,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    description: Option<String>,
    geometry: GeometryDef,
    #[serde(default)]
    alerts: Option<AlertsDef>,
    #[serde(default)]
    time_restrictions: Option<TimeRestrictionsDef>,
    #[serde(default)]
    expiry_date: Option<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum GeometryDef {
    Circle { center: CenterDef, radius: f64 },
    Polygon { coordinates: Vec<[f64; 2]> },
}

#[derive(Debug, Deserialize)]
struct CenterDef {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct AlertsDef {
    #[serde(default)]
    proximity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TimeRestrictionsDef {
    #[serde(default)]
    active_hours: Option<ActiveHoursDef>,
}

#[derive(Debug, Deserialize)]
struct ActiveHoursDef {
    #[serde(default = "default_start")]
    start: String,
    #[serde(default = "default_end")]
    end: String,
}

fn default_start() -> String {
    "00:00".to_string()
}

fn default_end() -> String {
    "23:59".to_string()
}

impl ZoneDef {
    fn into_zone(self) -> Result<Zone, ConfigError> {
        let id = ZoneId::new(self.id);

        let geometry = match self.geometry {
            GeometryDef::Circle { center, radius } => {
                Geometry::circle(GeoPoint::new(center.latitude, center.longitude), radius)
            }
            GeometryDef::Polygon { coordinates } => Geometry::polygon(
                coordinates.into_iter().map(|[lat, lon]| GeoPoint::new(lat, lon)).collect(),
            ),
        };

        let active_hours = match self.time_restrictions.and_then(|t| t.active_hours) {
            Some(hours) => Some(ActiveHours::parse(&hours.start, &hours.end).map_err(|reason| {
                ConfigError::InvalidSchedule { zone_id: id.clone(), reason }
            })?),
            None => None,
        };
        let expires_at_ms = match self.expiry_date.as_deref() {
            Some(s) => Some(parse_expiry(s).ok_or_else(|| ConfigError::InvalidSchedule {
                zone_id: id.clone(),
                reason: format!("invalid expiry_date '{s}'"),
            })?),
            None => None,
        };
        let schedule = (active_hours.is_some() || expires_at_ms.is_some())
            .then_some(Schedule { active_hours, expires_at_ms });

        let proximity_m = self.alerts.and_then(|a| a.proximity).unwrap_or(DEFAULT_PROXIMITY_M);

        Ok(Zone {
            name: self.name.unwrap_or_else(|| id.to_string()),
            id,
            zone_type: self.zone_type,
            description: self.description,
            geometry,
            severity: self.severity,
            active: self.active,
            proximity_m,
            schedule,
        })
    }
}

/// Parse an expiry instant to epoch ms
///
/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS` (read as UTC) or a bare
/// date (expires at the end of that UTC day).
fn parse_expiry(s: &str) -> Option<u64> {
    let s = s.trim();
    let ms = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        dt.timestamp_millis()
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        naive.and_utc().timestamp_millis()
    } else {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
        date.and_hms_milli_opt(23, 59, 59, 999)?.and_utc().timestamp_millis()
    };
    u64::try_from(ms).ok()
}

/// Parse zone definitions from JSON text
///
/// `path` is only used for error context.
pub fn parse_zones(content: &str, path: &Path) -> Result<Vec<Zone>, ConfigError> {
    let file: ZonesFile = serde_json::from_str(content)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
    file.danger_zones.into_iter().map(ZoneDef::into_zone).collect()
}

/// Read and parse a zones file
///
/// Geometry validation happens when the zones are loaded into the store.
pub fn load_zones_file<P: AsRef<Path>>(path: P) -> Result<Vec<Zone>, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let zones = parse_zones(&content, path)?;
    info!(path = %path.display(), zones = %zones.len(), "zones_file_read");
    Ok(zones)
}
