//! Zone membership evaluation
//!
//! The evaluator is the central sample processor. For every accepted sample
//! it:
//! - queries the current zone snapshot for the zones containing the point
//! - diffs that set against the device's occupied zones
//! - emits `exit` then `enter` alerts (each ordered by zone id)
//! - enqueues the alerts for the dispatcher without waiting
//!
//! Per-device state lives in a sharded table. Filtering, evaluation and
//! enqueueing for a device all run under its shard lock, so samples for one
//! device are processed strictly in arrival order.

mod devices;
#[cfg(test)]
mod tests;

use crate::domain::error::ValidationError;
use crate::domain::types::{AlertEvent, AlertKind, DeviceId, PositionReport, PositionSample, ZoneId};
use crate::domain::zone::Zone;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::alert_channel::AlertSender;
use crate::services::position_filter::{PositionFilter, Rejection};
use crate::services::zone_store::ZoneStore;
use devices::{DeviceState, DeviceTable, OccupiedZone};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Result of submitting a valid sample
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Sample passed the filter; `events` are the transitions it caused
    Accepted { events: Vec<AlertEvent> },
    /// Sample was gated out. Device state is unchanged.
    Rejected(Rejection),
}

impl SubmitOutcome {
    pub fn events(&self) -> &[AlertEvent] {
        match self {
            SubmitOutcome::Accepted { events } => events,
            SubmitOutcome::Rejected(_) => &[],
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, SubmitOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvaluatorSettings {
    pub max_accuracy_m: f64,
    pub idle_timeout: Duration,
    pub device_shards: usize,
}

impl EvaluatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_accuracy_m: config.max_accuracy_m(),
            idle_timeout: config.idle_timeout(),
            device_shards: config.device_shards(),
        }
    }
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct MembershipEvaluator {
    zones: Arc<ZoneStore>,
    filter: PositionFilter,
    devices: DeviceTable,
    idle_timeout: Duration,
    alerts: AlertSender,
    metrics: Arc<Metrics>,
}

impl MembershipEvaluator {
    pub fn new(
        settings: EvaluatorSettings,
        zones: Arc<ZoneStore>,
        alerts: AlertSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            zones,
            filter: PositionFilter::new(settings.max_accuracy_m),
            devices: DeviceTable::new(settings.device_shards),
            idle_timeout: settings.idle_timeout,
            alerts,
            metrics,
        }
    }

    /// Validate a raw report and evaluate it
    ///
    /// Malformed reports return `ValidationError` and leave all state untouched.
    pub fn submit_position(&self, report: PositionReport) -> Result<SubmitOutcome, ValidationError> {
        self.metrics.record_sample_received();
        let sample = report.validate().map_err(|e| {
            self.metrics.record_sample_invalid();
            debug!(error = %e, "sample_invalid");
            e
        })?;
        Ok(self.evaluate(sample, Instant::now()))
    }

    /// Evaluate an already validated sample. `now` is the arrival instant used
    /// for idle expiry.
    pub fn submit_sample(&self, sample: PositionSample, now: Instant) -> SubmitOutcome {
        self.metrics.record_sample_received();
        self.evaluate(sample, now)
    }

    fn evaluate(&self, sample: PositionSample, now: Instant) -> SubmitOutcome {
        let start = Instant::now();
        let snapshot = self.zones.snapshot();

        let device_id = sample.device_id.clone();
        let mut shard = self.devices.shard(&device_id).lock();
        let last_ms = shard.get(&device_id).map(|s| s.last_sample_ms);

        let sample = match self.filter.accept(sample, last_ms) {
            Ok(sample) => sample,
            Err(rejection) => {
                match rejection {
                    Rejection::Stale { .. } => self.metrics.record_sample_stale(),
                    Rejection::Inaccurate { .. } => self.metrics.record_sample_inaccurate(),
                }
                debug!(
                    device_id = %device_id,
                    reason = rejection.as_str(),
                    detail = %rejection,
                    "sample_rejected"
                );
                return SubmitOutcome::Rejected(rejection);
            }
        };

        let current = snapshot.query_at(sample.position, sample.timestamp_ms);
        let new_device = last_ms.is_none();
        let state = shard
            .entry(device_id)
            .or_insert_with(|| DeviceState::new(sample.timestamp_ms, now, sample.position));

        let events = transition(state, &current, &sample);
        state.last_sample_ms = sample.timestamp_ms;
        state.last_seen = now;
        state.last_position = sample.position;

        for event in &events {
            self.metrics.record_transition(event.kind);
            match event.kind {
                AlertKind::Enter => info!(
                    device_id = %event.device_id,
                    zone_id = %event.zone_id,
                    severity = %event.severity,
                    ts = %event.timestamp,
                    "zone_enter"
                ),
                AlertKind::Exit => info!(
                    device_id = %event.device_id,
                    zone_id = %event.zone_id,
                    severity = %event.severity,
                    ts = %event.timestamp,
                    "zone_exit"
                ),
            }
            self.alerts.send(event.clone());
        }
        drop(shard);

        // Counting locks every shard, so only after our shard is released
        if new_device {
            self.metrics.set_tracked_devices(self.devices.len() as u64);
        }

        debug!(
            device_id = %sample.device_id,
            ts = %sample.timestamp_ms,
            zones = %current.len(),
            events = %events.len(),
            "sample_evaluated"
        );
        self.metrics.record_sample_evaluated(start.elapsed().as_micros() as u64);
        SubmitOutcome::Accepted { events }
    }

    /// Discard devices idle for at least the configured timeout
    ///
    /// No exit events are emitted for expired devices. A later sample starts
    /// from empty membership and re-enters.
    pub fn expire_idle(&self, now: Instant) -> Vec<DeviceId> {
        let expired = self.devices.expire_idle(now, self.idle_timeout);
        for device_id in &expired {
            debug!(device_id = %device_id, "device_expired");
        }
        if !expired.is_empty() {
            info!(expired = %expired.len(), "idle_devices_expired");
        }
        self.metrics.record_devices_expired(expired.len() as u64);
        self.metrics.set_tracked_devices(self.devices.len() as u64);
        expired
    }

    /// Zones the device currently occupies, sorted by id
    pub fn membership(&self, device_id: &DeviceId) -> Vec<ZoneId> {
        self.devices
            .shard(device_id)
            .lock()
            .get(device_id)
            .map(|state| state.occupied.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Timestamp of the device's last accepted sample
    pub fn last_sample_ms(&self, device_id: &DeviceId) -> Option<u64> {
        self.devices.shard(device_id).lock().get(device_id).map(|s| s.last_sample_ms)
    }

    pub fn tracked_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn zones(&self) -> &Arc<ZoneStore> {
        &self.zones
    }
}

/// Diff `current` against the device's occupied zones, update them, and
/// build the resulting alerts: exits first, then enters, each by zone id.
fn transition(state: &mut DeviceState, current: &[&Zone], sample: &PositionSample) -> Vec<AlertEvent> {
    let mut next: BTreeMap<ZoneId, OccupiedZone> = BTreeMap::new();
    for zone in current {
        next.insert(zone.id.clone(), OccupiedZone { name: zone.name.clone(), severity: zone.severity });
    }

    let mut events = Vec::new();
    for (zone_id, occupied) in &state.occupied {
        if !next.contains_key(zone_id) {
            events.push(alert(sample, zone_id, occupied, AlertKind::Exit));
        }
    }
    for (zone_id, zone) in &next {
        if !state.occupied.contains_key(zone_id) {
            events.push(alert(sample, zone_id, zone, AlertKind::Enter));
        }
    }

    state.occupied = next;
    events
}

fn alert(sample: &PositionSample, zone_id: &ZoneId, zone: &OccupiedZone, kind: AlertKind) -> AlertEvent {
    AlertEvent {
        alert_id: Uuid::now_v7(),
        device_id: sample.device_id.clone(),
        zone_id: zone_id.clone(),
        zone_name: zone.name.clone(),
        kind,
        severity: zone.severity,
        timestamp: sample.timestamp_ms,
        latitude: sample.position.latitude,
        longitude: sample.position.longitude,
    }
}
