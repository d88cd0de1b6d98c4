//! Sharded per-device membership state
//!
//! Devices are spread over a power-of-two number of shards by hashing the
//! device id. Each shard is an independent mutex, so samples for one device
//! serialize on their shard while other shards proceed in parallel. No
//! operation ever holds more than one shard lock.

use crate::domain::types::{DeviceId, GeoPoint, Severity, ZoneId};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

/// Zone metadata remembered for an occupied zone
///
/// Kept so an exit can still be reported after the zone was removed by a
/// reload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OccupiedZone {
    pub name: String,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
pub(crate) struct DeviceState {
    /// Zones the device is currently inside, ordered by id
    pub occupied: BTreeMap<ZoneId, OccupiedZone>,
    /// Timestamp of the last accepted sample (epoch ms)
    pub last_sample_ms: u64,
    /// Arrival time of the last accepted sample, for idle expiry
    pub last_seen: Instant,
    pub last_position: GeoPoint,
}

impl DeviceState {
    pub fn new(last_sample_ms: u64, last_seen: Instant, last_position: GeoPoint) -> Self {
        Self { occupied: BTreeMap::new(), last_sample_ms, last_seen, last_position }
    }
}

pub(crate) type Shard = FxHashMap<DeviceId, DeviceState>;

pub(crate) struct DeviceTable {
    shards: Box<[Mutex<Shard>]>,
    mask: usize,
}

impl DeviceTable {
    /// `shards` is rounded up to a power of two (minimum 1)
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count).map(|_| Mutex::new(Shard::default())).collect();
        Self { shards, mask: count - 1 }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub fn shard(&self, device_id: &DeviceId) -> &Mutex<Shard> {
        let mut hasher = FxHasher::default();
        device_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.mask]
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Remove devices idle for at least `idle_timeout`, one shard at a time
    pub fn expire_idle(&self, now: Instant, idle_timeout: Duration) -> Vec<DeviceId> {
        let mut expired = Vec::new();
        for shard in self.shards.iter() {
            let mut guard = shard.lock();
            guard.retain(|device_id, state| {
                let idle = now.saturating_duration_since(state.last_seen) >= idle_timeout;
                if idle {
                    expired.push(device_id.clone());
                }
                !idle
            });
        }
        expired.sort();
        expired
    }
}
