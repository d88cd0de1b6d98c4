//! Domain models - core geofence types
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - device/zone identifiers, position samples, alert events
//! - `geometry` - circles, polygons, closed containment, bounding boxes
//! - `zone` - danger zone definition with severity and schedule
//! - `error` - configuration and validation errors

pub mod error;
pub mod geometry;
pub mod types;
pub mod zone;

// Re-export commonly used types at module level
pub use error::{ConfigError, ValidationError};
pub use geometry::{BoundingBox, Geometry};
pub use types::{
    AlertEvent, AlertKind, DeviceId, GeoPoint, PositionReport, PositionSample, Severity, ZoneId,
};
pub use zone::{ActiveHours, Schedule, Zone};
