//! Zone store with atomically swapped immutable snapshots
//!
//! A `ZoneSnapshot` bundles the validated zone list with its spatial index.
//! Readers clone the current `Arc<ZoneSnapshot>` under a read lock held only
//! for the pointer copy, and then query it without any lock. Writers build
//! and validate a complete snapshot outside the lock and take the write lock
//! only to swap the pointer, so a reader sees either the old snapshot or the
//! new one, never a mix.
//!
//! Loads are all-or-nothing: a validation error leaves the previous snapshot
//! in place.

use crate::domain::error::ConfigError;
use crate::domain::types::{GeoPoint, ZoneId};
use crate::domain::zone::Zone;
use crate::infra::zones_file::load_zones_file;
use crate::services::spatial_index::{IndexConfig, SpatialIndex};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A zone near (but outside) a point, within the zone's proximity distance
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityHit {
    pub zone_id: ZoneId,
    pub distance_m: f64,
}

/// Immutable zone set plus spatial index
#[derive(Debug)]
pub struct ZoneSnapshot {
    version: u64,
    zones: Vec<Zone>,
    by_id: FxHashMap<ZoneId, usize>,
    index: SpatialIndex,
}

impl ZoneSnapshot {
    /// Validate `zones` and build the snapshot. Zones are sorted by id.
    pub fn build(mut zones: Vec<Zone>, index_config: IndexConfig, version: u64) -> Result<Self, ConfigError> {
        zones.sort_by(|a, b| a.id.cmp(&b.id));

        let mut by_id = FxHashMap::default();
        for (idx, zone) in zones.iter().enumerate() {
            zone.validate()?;
            if by_id.insert(zone.id.clone(), idx).is_some() {
                return Err(ConfigError::DuplicateZone(zone.id.clone()));
            }
        }

        let index = SpatialIndex::build(&zones, index_config);
        Ok(Self { version, zones, by_id, index })
    }

    fn empty(index_config: IndexConfig) -> Self {
        Self {
            version: 0,
            zones: Vec::new(),
            by_id: FxHashMap::default(),
            index: SpatialIndex::build(&[], index_config),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, id: &ZoneId) -> Option<&Zone> {
        self.by_id.get(id).map(|&idx| &self.zones[idx])
    }

    /// Zone ids the index considers possible for `p` (superset of containing zones)
    pub fn candidates(&self, p: GeoPoint) -> Vec<ZoneId> {
        self.index.candidates(p).iter().map(|&i| self.zones[i as usize].id.clone()).collect()
    }

    /// Active zones containing `p`, sorted by id. Schedules are ignored.
    pub fn query(&self, p: GeoPoint) -> Vec<ZoneId> {
        self.matching(p, |z| z.active).map(|z| z.id.clone()).collect()
    }

    /// Active zones containing `p` whose schedule allows `timestamp_ms`
    pub fn query_at(&self, p: GeoPoint, timestamp_ms: u64) -> Vec<&Zone> {
        self.matching(p, move |z| z.is_active_at(timestamp_ms)).collect()
    }

    fn matching<'a>(
        &'a self,
        p: GeoPoint,
        active: impl Fn(&Zone) -> bool + 'a,
    ) -> impl Iterator<Item = &'a Zone> + 'a {
        self.index
            .candidates(p)
            .into_iter()
            .map(move |i| &self.zones[i as usize])
            .filter(move |z| active(z) && z.contains(p))
    }

    /// Active zones not containing `p` whose boundary is within their proximity distance
    pub fn proximity(&self, p: GeoPoint, timestamp_ms: u64) -> Vec<ProximityHit> {
        let mut hits: Vec<ProximityHit> = self
            .index
            .candidates(p)
            .into_iter()
            .map(|i| &self.zones[i as usize])
            .filter(|z| z.is_active_at(timestamp_ms) && !z.contains(p))
            .filter_map(|z| {
                let distance_m = z.geometry.distance_to_boundary_m(p);
                (distance_m <= z.proximity_m).then(|| ProximityHit { zone_id: z.id.clone(), distance_m })
            })
            .collect();
        hits.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        hits
    }
}

/// Owner of the current zone snapshot
pub struct ZoneStore {
    current: RwLock<Arc<ZoneSnapshot>>,
    /// Serializes writers so a toggle never races a reload
    writer: Mutex<()>,
    index_config: IndexConfig,
}

impl ZoneStore {
    /// Create an empty store
    pub fn new(index_config: IndexConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(ZoneSnapshot::empty(index_config))),
            writer: Mutex::new(()),
            index_config,
        }
    }

    /// Current snapshot. Cheap: one `Arc` clone under a read lock.
    pub fn snapshot(&self) -> Arc<ZoneSnapshot> {
        self.current.read().clone()
    }

    /// Replace the whole zone set. On error the previous snapshot stays active.
    pub fn load(&self, zones: Vec<Zone>) -> Result<Arc<ZoneSnapshot>, ConfigError> {
        let _guard = self.writer.lock();
        let version = self.current.read().version + 1;
        let snapshot = Arc::new(ZoneSnapshot::build(zones, self.index_config, version)?);
        self.swap(snapshot.clone());

        info!(
            version = %snapshot.version,
            zones = %snapshot.len(),
            cells = %snapshot.index.cell_count(),
            oversized = %snapshot.index.oversized_count(),
            "zones_loaded"
        );
        Ok(snapshot)
    }

    /// Read a zones file and load it. Parse or validation errors keep the
    /// previous snapshot.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<Arc<ZoneSnapshot>, ConfigError> {
        let zones = load_zones_file(path)?;
        self.load(zones)
    }

    /// Toggle a zone's active flag (copy-on-write)
    pub fn set_active(&self, zone_id: &ZoneId, active: bool) -> Result<(), ConfigError> {
        let _guard = self.writer.lock();
        let current = self.snapshot();
        if current.zone(zone_id).is_none() {
            return Err(ConfigError::UnknownZone(zone_id.clone()));
        }

        let zones: Vec<Zone> = current
            .zones
            .iter()
            .map(|z| if &z.id == zone_id { z.clone().with_active(active) } else { z.clone() })
            .collect();
        let snapshot = Arc::new(ZoneSnapshot::build(zones, self.index_config, current.version + 1)?);
        self.swap(snapshot);

        info!(zone_id = %zone_id, active = %active, "zone_active_changed");
        Ok(())
    }

    fn swap(&self, snapshot: Arc<ZoneSnapshot>) {
        *self.current.write() = snapshot;
    }

    /// Active zones containing `p`
    pub fn query(&self, p: GeoPoint) -> Vec<ZoneId> {
        self.snapshot().query(p)
    }

    /// Active zones containing `p` at `timestamp_ms`, honouring schedules
    pub fn query_at(&self, p: GeoPoint, timestamp_ms: u64) -> Vec<ZoneId> {
        self.snapshot().query_at(p, timestamp_ms).into_iter().map(|z| z.id.clone()).collect()
    }

    /// Nearby zones within their proximity distance, nearest first
    pub fn proximity(&self, p: GeoPoint, timestamp_ms: u64) -> Vec<ProximityHit> {
        self.snapshot().proximity(p, timestamp_ms)
    }

    pub fn zone(&self, zone_id: &ZoneId) -> Option<Zone> {
        self.snapshot().zone(zone_id).cloned()
    }

    pub fn zones(&self) -> Vec<Zone> {
        self.snapshot().zones().to_vec()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for ZoneStore {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}
