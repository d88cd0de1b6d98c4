//! Zone geometry: circles and polygons on WGS84 coordinates
//!
//! Containment is closed: a point on the boundary is inside. Every test is a
//! pure function of its inputs, so identical inputs always give identical
//! answers.
//!
//! Circles use great-circle (haversine) distance. Polygons are `geo` polygons
//! in planar lat/lon space with longitude as x and latitude as y, which is
//! accurate for zones a few kilometers across. Polygons crossing the
//! antimeridian are not supported.

use crate::domain::error::ConfigError;
use crate::domain::types::{GeoPoint, ZoneId};
use geo::{Area, BoundingRect, Coord, Intersects, Line, LineString};
use std::f64::consts::PI;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude on the mean sphere
pub const METERS_PER_DEG_LAT: f64 = EARTH_RADIUS_M * PI / 180.0;

/// Padding applied to bounding boxes so float rounding never excludes a boundary point
const BOX_PAD_DEG: f64 = 1e-9;

/// Minimum absolute polygon area in square degrees
const MIN_POLYGON_AREA_DEG2: f64 = 1e-14;

/// Great-circle distance between two points in meters (haversine)
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Axis-aligned lat/lon box (closed)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub const WORLD: BoundingBox =
        BoundingBox { min_lat: -90.0, min_lon: -180.0, max_lat: 90.0, max_lon: 180.0 };

    #[inline]
    pub fn contains(&self, p: GeoPoint) -> bool {
        p.latitude >= self.min_lat
            && p.latitude <= self.max_lat
            && p.longitude >= self.min_lon
            && p.longitude <= self.max_lon
    }

    /// Grow the box by `meters` on every side, clamped to the world
    pub fn expanded_m(&self, meters: f64) -> Self {
        if meters <= 0.0 {
            return *self;
        }
        let dlat = meters / METERS_PER_DEG_LAT;
        let min_lat = (self.min_lat - dlat).max(-90.0);
        let max_lat = (self.max_lat + dlat).min(90.0);

        let widest = min_lat.abs().max(max_lat.abs()).to_radians().cos();
        if widest < 1e-6 {
            return Self { min_lat, min_lon: -180.0, max_lat, max_lon: 180.0 };
        }
        let dlon = dlat / widest;
        Self {
            min_lat,
            min_lon: (self.min_lon - dlon).max(-180.0),
            max_lat,
            max_lon: (self.max_lon + dlon).min(180.0),
        }
    }

    fn padded(self) -> Self {
        Self {
            min_lat: (self.min_lat - BOX_PAD_DEG).max(-90.0),
            min_lon: (self.min_lon - BOX_PAD_DEG).max(-180.0),
            max_lat: (self.max_lat + BOX_PAD_DEG).min(90.0),
            max_lon: (self.max_lon + BOX_PAD_DEG).min(180.0),
        }
    }
}

/// Circle defined by a center and a radius in meters
#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub center: GeoPoint,
    pub radius_m: f64,
}

impl Circle {
    #[inline]
    pub fn contains(&self, p: GeoPoint) -> bool {
        haversine_m(self.center, p) <= self.radius_m
    }

    /// Bounding box of the spherical cap
    pub fn bounding_box(&self) -> BoundingBox {
        let ang = self.radius_m / EARTH_RADIUS_M;
        let lat = self.center.latitude.to_radians();
        let min_lat = (lat - ang).to_degrees();
        let max_lat = (lat + ang).to_degrees();

        // Cap reaches a pole: every longitude is covered
        if min_lat <= -90.0 || max_lat >= 90.0 {
            return BoundingBox {
                min_lat: min_lat.max(-90.0),
                min_lon: -180.0,
                max_lat: max_lat.min(90.0),
                max_lon: 180.0,
            };
        }

        let ratio = ang.sin() / lat.cos();
        let dlon = if ratio >= 1.0 { 180.0 } else { ratio.asin().to_degrees() };
        let min_lon = self.center.longitude - dlon;
        let max_lon = self.center.longitude + dlon;

        // Wrapping across the antimeridian widens to the full range (still a superset)
        let (min_lon, max_lon) =
            if min_lon < -180.0 || max_lon > 180.0 { (-180.0, 180.0) } else { (min_lon, max_lon) };

        BoundingBox { min_lat, min_lon, max_lat, max_lon }.padded()
    }

    fn validate(&self, zone_id: &ZoneId) -> Result<(), ConfigError> {
        if !self.center.is_valid() {
            return Err(ConfigError::degenerate(zone_id, "circle center out of range"));
        }
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(ConfigError::degenerate(
                zone_id,
                format!("circle radius must be > 0, got {}", self.radius_m),
            ));
        }
        Ok(())
    }
}

/// Simple polygon. Coordinates are stored as x = longitude, y = latitude.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    shape: geo::Polygon<f64>,
}

impl Polygon {
    /// Build a polygon from its vertices. The ring is closed if it is open.
    pub fn new(vertices: Vec<GeoPoint>) -> Self {
        let ring: LineString<f64> = vertices.into_iter().map(to_coord).collect();
        Self { shape: geo::Polygon::new(ring, Vec::new()) }
    }

    /// Distinct vertices (the closing vertex is not counted)
    pub fn vertex_count(&self) -> usize {
        self.shape.exterior().0.len().saturating_sub(1)
    }

    /// Closed containment: boundary points are inside
    pub fn contains(&self, p: GeoPoint) -> bool {
        self.vertex_count() >= 3 && self.shape.intersects(&to_coord(p))
    }

    pub fn bounding_box(&self) -> BoundingBox {
        match self.shape.bounding_rect() {
            Some(rect) => BoundingBox {
                min_lat: rect.min().y,
                min_lon: rect.min().x,
                max_lat: rect.max().y,
                max_lon: rect.max().x,
            }
            .padded(),
            None => BoundingBox {
                min_lat: f64::INFINITY,
                min_lon: f64::INFINITY,
                max_lat: f64::NEG_INFINITY,
                max_lon: f64::NEG_INFINITY,
            },
        }
    }

    fn validate(&self, zone_id: &ZoneId) -> Result<(), ConfigError> {
        let n = self.vertex_count();
        if n < 3 {
            return Err(ConfigError::degenerate(
                zone_id,
                format!("polygon needs at least 3 vertices, got {n}"),
            ));
        }
        if let Some(c) = self.shape.exterior().coords().find(|c| !to_point(**c).is_valid()) {
            return Err(ConfigError::degenerate(
                zone_id,
                format!("vertex ({}, {}) out of range", c.y, c.x),
            ));
        }

        let edges: Vec<Line<f64>> = self.shape.exterior().lines().collect();
        if edges.iter().any(|e| e.start == e.end) {
            return Err(ConfigError::degenerate(zone_id, "polygon has a zero-length edge"));
        }
        if self.shape.unsigned_area() < MIN_POLYGON_AREA_DEG2 {
            return Err(ConfigError::degenerate(zone_id, "polygon has zero area"));
        }

        for i in 0..n {
            for k in (i + 1)..n {
                // Adjacent edges share a vertex by construction
                if k == i + 1 || (i == 0 && k == n - 1) {
                    continue;
                }
                if edges[i].intersects(&edges[k]) {
                    return Err(ConfigError::degenerate(
                        zone_id,
                        format!("polygon self-intersects between edges {i} and {k}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Distance in meters from `p` to the nearest polygon edge
    fn distance_to_edges_m(&self, p: GeoPoint) -> f64 {
        // Local equirectangular projection centred on p
        let kx = p.latitude.to_radians().cos() * METERS_PER_DEG_LAT;
        let ky = METERS_PER_DEG_LAT;
        let project = |c: Coord<f64>| ((c.x - p.longitude) * kx, (c.y - p.latitude) * ky);

        self.shape
            .exterior()
            .lines()
            .map(|edge| {
                let (ax, ay) = project(edge.start);
                let (bx, by) = project(edge.end);
                let (dx, dy) = (bx - ax, by - ay);
                let len_sq = dx * dx + dy * dy;
                let t = if len_sq == 0.0 { 0.0 } else { (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0) };
                let (cx, cy) = (ax + t * dx, ay + t * dy);
                (cx * cx + cy * cy).sqrt()
            })
            .fold(f64::INFINITY, f64::min)
    }
}

#[inline]
fn to_coord(p: GeoPoint) -> Coord<f64> {
    Coord { x: p.longitude, y: p.latitude }
}

#[inline]
fn to_point(c: Coord<f64>) -> GeoPoint {
    GeoPoint::new(c.y, c.x)
}

/// Zone geometry
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Circle(Circle),
    Polygon(Polygon),
}

impl Geometry {
    pub fn circle(center: GeoPoint, radius_m: f64) -> Self {
        Geometry::Circle(Circle { center, radius_m })
    }

    pub fn polygon(vertices: Vec<GeoPoint>) -> Self {
        Geometry::Polygon(Polygon::new(vertices))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Circle(_) => "circle",
            Geometry::Polygon(_) => "polygon",
        }
    }

    #[inline]
    pub fn contains(&self, p: GeoPoint) -> bool {
        match self {
            Geometry::Circle(c) => c.contains(p),
            Geometry::Polygon(poly) => poly.contains(p),
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        match self {
            Geometry::Circle(c) => c.bounding_box(),
            Geometry::Polygon(poly) => poly.bounding_box(),
        }
    }

    /// Distance in meters from `p` to the geometry boundary
    pub fn distance_to_boundary_m(&self, p: GeoPoint) -> f64 {
        match self {
            Geometry::Circle(c) => (haversine_m(c.center, p) - c.radius_m).abs(),
            Geometry::Polygon(poly) => poly.distance_to_edges_m(p),
        }
    }

    /// Reject degenerate shapes (zero radius, <3 vertices, self-intersection)
    pub fn validate(&self, zone_id: &ZoneId) -> Result<(), ConfigError> {
        match self {
            Geometry::Circle(c) => c.validate(zone_id),
            Geometry::Polygon(poly) => poly.validate(zone_id),
        }
    }
}
