//! Bounded history of delivered alerts

use crate::domain::types::{AlertEvent, Severity};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Aggregate view over the retained alerts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStatistics {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_zone: BTreeMap<String, usize>,
    /// Timestamp of the newest retained alert (epoch ms)
    pub last_alert_ms: Option<u64>,
}

/// Ring of the most recent delivered alerts, oldest evicted first
pub struct AlertHistory {
    capacity: usize,
    entries: Mutex<VecDeque<AlertEvent>>,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn record(&self, event: AlertEvent) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }

    /// Newest first, at most `limit` entries
    pub fn recent(&self, limit: usize) -> Vec<AlertEvent> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn statistics(&self) -> AlertStatistics {
        let entries = self.entries.lock();
        let mut stats = AlertStatistics { total: entries.len(), ..Default::default() };
        for event in entries.iter() {
            *stats.by_severity.entry(event.severity).or_default() += 1;
            *stats.by_zone.entry(event.zone_name.clone()).or_default() += 1;
        }
        stats.last_alert_ms = entries.back().map(|e| e.timestamp);
        stats
    }
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
