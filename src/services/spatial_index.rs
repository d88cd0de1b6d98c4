//! Uniform lat/lon grid pre-filter for point-in-zone queries
//!
//! Each zone's bounding box (grown by its proximity distance) is rasterised
//! into the grid cells it overlaps. A lookup hashes the point's cell and
//! returns the zones whose box contains the point, so exact containment only
//! runs on those candidates. Zones that would cover more than
//! `max_cells_per_zone` cells are kept in an oversized list that every lookup
//! scans.
//!
//! The index is immutable. It is rebuilt from scratch with each zone snapshot
//! and swapped together with it.

use crate::domain::geometry::BoundingBox;
use crate::domain::types::GeoPoint;
use crate::domain::zone::Zone;
use crate::infra::config::Config;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Candidate zone indices for a lookup (indices into the snapshot's zone list)
pub type Candidates = SmallVec<[u32; 8]>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexConfig {
    /// Grid cell edge in degrees
    pub cell_size_deg: f64,
    /// Zones spanning more cells than this go to the oversized list
    pub max_cells_per_zone: usize,
}

impl IndexConfig {
    pub fn from_config(config: &Config) -> Self {
        Self { cell_size_deg: config.cell_size_deg(), max_cells_per_zone: config.max_cells_per_zone() }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { cell_size_deg: 0.01, max_cells_per_zone: 4096 }
    }
}

type CellKey = (i32, i32);

#[derive(Debug)]
pub struct SpatialIndex {
    cell_size_deg: f64,
    cells: FxHashMap<CellKey, SmallVec<[u32; 4]>>,
    /// Search box per zone, same order as the zone list
    boxes: Vec<BoundingBox>,
    oversized: Vec<u32>,
}

impl SpatialIndex {
    /// Build an index over `zones`. Inactive zones are indexed too; the
    /// active filter is applied after the lookup.
    pub fn build(zones: &[Zone], config: IndexConfig) -> Self {
        let cell_size_deg =
            if config.cell_size_deg.is_finite() && config.cell_size_deg > 0.0 { config.cell_size_deg } else { 0.01 };

        let mut cells: FxHashMap<CellKey, SmallVec<[u32; 4]>> = FxHashMap::default();
        let mut boxes = Vec::with_capacity(zones.len());
        let mut oversized = Vec::new();

        for (idx, zone) in zones.iter().enumerate() {
            let idx = idx as u32;
            let bbox = zone.bounding_box().expanded_m(zone.proximity_m);
            boxes.push(bbox);

            let (lat0, lon0) = cell_of(bbox.min_lat, bbox.min_lon, cell_size_deg);
            let (lat1, lon1) = cell_of(bbox.max_lat, bbox.max_lon, cell_size_deg);
            // Cell keys saturate at the i32 range, so widen before subtracting
            let lat_cells = (i64::from(lat1) - i64::from(lat0) + 1) as u64;
            let lon_cells = (i64::from(lon1) - i64::from(lon0) + 1) as u64;
            let span = lat_cells.saturating_mul(lon_cells);

            if span > config.max_cells_per_zone as u64 {
                oversized.push(idx);
                continue;
            }
            for lat_cell in lat0..=lat1 {
                for lon_cell in lon0..=lon1 {
                    cells.entry((lat_cell, lon_cell)).or_default().push(idx);
                }
            }
        }

        Self { cell_size_deg, cells, boxes, oversized }
    }

    /// Zone indices whose search box contains `p`. A superset of the zones
    /// whose geometry contains `p`, returned in ascending order.
    pub fn candidates(&self, p: GeoPoint) -> Candidates {
        let key = cell_of(p.latitude, p.longitude, self.cell_size_deg);
        let mut out = Candidates::new();

        if let Some(bucket) = self.cells.get(&key) {
            out.extend(bucket.iter().copied().filter(|&i| self.boxes[i as usize].contains(p)));
        }
        out.extend(self.oversized.iter().copied().filter(|&i| self.boxes[i as usize].contains(p)));

        out.sort_unstable();
        out
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn oversized_count(&self) -> usize {
        self.oversized.len()
    }
}

#[inline]
fn cell_of(lat: f64, lon: f64, cell_size_deg: f64) -> CellKey {
    ((lat / cell_size_deg).floor() as i32, (lon / cell_size_deg).floor() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geometry::Geometry;
    use crate::domain::types::Severity;

    fn circle(id: &str, lat: f64, lon: f64, r: f64) -> Zone {
        Zone::new(id, id, Geometry::circle(GeoPoint::new(lat, lon), r), Severity::Medium)
    }

    /// Deterministic pseudo-random sequence in [0, 1)
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    #[test]
    fn test_candidates_superset_of_containing_zones() {
        let mut rng = Lcg(7);
        let zones: Vec<Zone> = (0..60)
            .map(|i| {
                let lat = 40.70 + rng.next() * 0.05;
                let lon = -74.02 + rng.next() * 0.05;
                let r = 20.0 + rng.next() * 800.0;
                circle(&format!("z{i}"), lat, lon, r)
            })
            .collect();
        let index = SpatialIndex::build(&zones, IndexConfig { cell_size_deg: 0.005, max_cells_per_zone: 64 });

        for _ in 0..5000 {
            let p = GeoPoint::new(40.69 + rng.next() * 0.07, -74.03 + rng.next() * 0.07);
            let cands = index.candidates(p);
            for (i, zone) in zones.iter().enumerate() {
                if zone.contains(p) {
                    assert!(cands.contains(&(i as u32)), "zone {} missing at {:?}", zone.id, p);
                }
            }
        }
    }

    #[test]
    fn test_far_point_has_no_candidates() {
        let zones = vec![circle("a", 40.7128, -74.0060, 50.0)];
        let index = SpatialIndex::build(&zones, IndexConfig::default());
        assert!(index.candidates(GeoPoint::new(51.5, -0.12)).is_empty());
        assert_eq!(index.candidates(GeoPoint::new(40.7128, -74.0060)).as_slice(), &[0]);
    }

    #[test]
    fn test_oversized_zone_still_found() {
        let zones = vec![circle("big", 0.0, 0.0, 200_000.0), circle("small", 0.5, 0.5, 100.0)];
        let index = SpatialIndex::build(&zones, IndexConfig { cell_size_deg: 0.01, max_cells_per_zone: 100 });
        assert_eq!(index.oversized_count(), 1);

        let cands = index.candidates(GeoPoint::new(0.5, 0.5));
        assert_eq!(cands.as_slice(), &[0, 1]);
        assert_eq!(index.candidates(GeoPoint::new(-1.0, 1.0)).as_slice(), &[0]);
    }

    #[test]
    fn test_tiny_cells_across_origin_go_oversized() {
        // The box spans 0° and both cell bounds saturate at the i32 limits
        let zones = vec![circle("origin", 0.0, 0.0, 1_000.0)];
        let index = SpatialIndex::build(&zones, IndexConfig { cell_size_deg: 1e-12, max_cells_per_zone: 4096 });
        assert_eq!(index.oversized_count(), 1);
        assert_eq!(index.candidates(GeoPoint::new(0.0, 0.0)).as_slice(), &[0]);
    }

    #[test]
    fn test_proximity_margin_is_indexed() {
        let zones = vec![circle("a", 0.0, 0.0, 10.0).with_proximity_m(500.0)];
        let index = SpatialIndex::build(&zones, IndexConfig { cell_size_deg: 0.001, max_cells_per_zone: 4096 });
        // ~300 m north: outside the circle but inside the proximity margin
        let near = GeoPoint::new(300.0 / crate::domain::geometry::METERS_PER_DEG_LAT, 0.0);
        assert_eq!(index.candidates(near).as_slice(), &[0]);
    }

    #[test]
    fn test_negative_coordinates_cell_mapping() {
        assert_eq!(cell_of(-0.005, -0.005, 0.01), (-1, -1));
        assert_eq!(cell_of(0.005, 0.005, 0.01), (0, 0));
    }
}
