//! Danger zone model
//!
//! A zone is immutable once loaded. The only operator mutation is the
//! `active` flag, which the zone store applies by building a new snapshot.

use crate::domain::error::ConfigError;
use crate::domain::geometry::{BoundingBox, Geometry};
use crate::domain::types::{GeoPoint, Severity, ZoneId};
use chrono::{DateTime, NaiveTime, Timelike, Utc};

/// Default proximity warning distance in meters
pub const DEFAULT_PROXIMITY_M: f64 = 50.0;

/// Daily activity window in UTC minutes-of-day, inclusive on both ends
///
/// `start > end` wraps past midnight (e.g. 22:00-06:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveHours {
    start_min: u16,
    end_min: u16,
}

impl ActiveHours {
    /// Parse "HH:MM" bounds
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map(|t| (t.hour() * 60 + t.minute()) as u16)
                .map_err(|e| format!("invalid time '{s}': {e}"))
        };
        Ok(Self { start_min: parse(start)?, end_min: parse(end)? })
    }

    pub fn contains_minute(&self, minute_of_day: u16) -> bool {
        if self.start_min <= self.end_min {
            minute_of_day >= self.start_min && minute_of_day <= self.end_min
        } else {
            minute_of_day >= self.start_min || minute_of_day <= self.end_min
        }
    }
}

/// Optional time restrictions on a zone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    pub active_hours: Option<ActiveHours>,
    /// Zone stops matching at this instant (epoch ms)
    pub expires_at_ms: Option<u64>,
}

impl Schedule {
    /// Whether the schedule allows the zone at `timestamp_ms`
    pub fn allows(&self, timestamp_ms: u64) -> bool {
        if let Some(expires) = self.expires_at_ms {
            if timestamp_ms > expires {
                return false;
            }
        }
        match self.active_hours {
            Some(hours) => hours.contains_minute(minute_of_day(timestamp_ms)),
            None => true,
        }
    }
}

fn minute_of_day(timestamp_ms: u64) -> u16 {
    match DateTime::<Utc>::from_timestamp_millis(timestamp_ms as i64) {
        Some(dt) => (dt.hour() * 60 + dt.minute()) as u16,
        None => 0,
    }
}

/// Geofenced danger zone
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    /// Free-form category, e.g. "construction"
    pub zone_type: Option<String>,
    pub description: Option<String>,
    pub geometry: Geometry,
    pub severity: Severity,
    pub active: bool,
    pub proximity_m: f64,
    pub schedule: Option<Schedule>,
}

impl Zone {
    /// Minimal active zone with default metadata
    pub fn new(id: impl Into<String>, name: impl Into<String>, geometry: Geometry, severity: Severity) -> Self {
        Self {
            id: ZoneId::new(id),
            name: name.into(),
            zone_type: None,
            description: None,
            geometry,
            severity,
            active: true,
            proximity_m: DEFAULT_PROXIMITY_M,
            schedule: None,
        }
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_proximity_m(mut self, proximity_m: f64) -> Self {
        self.proximity_m = proximity_m;
        self
    }

    /// Geometry test only, ignoring the active flag and schedule
    #[inline]
    pub fn contains(&self, p: GeoPoint) -> bool {
        self.geometry.contains(p)
    }

    /// Active flag and schedule at the given sample time
    #[inline]
    pub fn is_active_at(&self, timestamp_ms: u64) -> bool {
        self.active && self.schedule.as_ref().map_or(true, |s| s.allows(timestamp_ms))
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.geometry.bounding_box()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ConfigError::invalid(&self.id, "zone id is empty"));
        }
        if !self.proximity_m.is_finite() || self.proximity_m < 0.0 {
            return Err(ConfigError::invalid(
                &self.id,
                format!("proximity must be >= 0, got {}", self.proximity_m),
            ));
        }
        self.geometry.validate(&self.id)
    }
}
