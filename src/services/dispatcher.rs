//! Alert dispatcher - delivers alerts off the evaluation path
//!
//! The evaluator enqueues alerts into a bounded channel; this worker drains
//! it, applies the per-(device, zone, kind) cooldown, and delivers each alert
//! to every configured sink with bounded exponential backoff. Delivery is
//! best effort: after the last attempt the alert is logged and dropped.

use crate::domain::types::{AlertEvent, AlertKind, DeviceId, ZoneId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::history::AlertHistory;
use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// A single delivery attempt failed
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode alert: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("mqtt publish failed: {0}")]
    Mqtt(String),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("http status {0}")]
    Status(u16),

    #[error("consumer channel closed")]
    Closed,

    #[error("consumer did not accept the alert within {0:?}")]
    Timeout(Duration),
}

/// Destination for dispatched alerts
///
/// Implementations should attempt one delivery per call; retries are the
/// dispatcher's job.
#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn deliver(&self, event: &AlertEvent) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per sink, including the first
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `min(base * 2^(n-1), max)`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

type CooldownKey = (DeviceId, ZoneId, AlertKind);

/// Last dispatch time per (device, zone, kind), measured on event timestamps
pub struct CooldownTracker {
    window_ms: u64,
    last: FxHashMap<CooldownKey, u64>,
    /// Newest event timestamp per device. Device clocks are independent, so
    /// an entry only ages against its own device's timeline.
    high_water_ms: FxHashMap<DeviceId, u64>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            last: FxHashMap::default(),
            high_water_ms: FxHashMap::default(),
        }
    }

    /// Returns true if the event may be dispatched, and records it.
    /// A suppressed event does not extend the window.
    pub fn allow(&mut self, event: &AlertEvent) -> bool {
        if self.window_ms == 0 {
            return true;
        }

        let high_water = self.high_water_ms.entry(event.device_id.clone()).or_insert(0);
        *high_water = (*high_water).max(event.timestamp);

        let key = (event.device_id.clone(), event.zone_id.clone(), event.kind);
        if let Some(&prev) = self.last.get(&key) {
            if event.timestamp.saturating_sub(prev) < self.window_ms {
                return false;
            }
        }
        self.last.insert(key, event.timestamp);
        true
    }

    /// Drop entries whose window has passed on their device's timeline
    pub fn prune(&mut self) -> usize {
        let before = self.last.len();
        let (high_water, window) = (&self.high_water_ms, self.window_ms);
        self.last.retain(|(device, _, _), &mut ts| {
            let newest = high_water.get(device).copied().unwrap_or(ts);
            newest.saturating_sub(ts) < window
        });

        let live: FxHashSet<&DeviceId> = self.last.keys().map(|(device, _, _)| device).collect();
        self.high_water_ms.retain(|device, _| live.contains(device));
        before - self.last.len()
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

/// What happened to one dispatched alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to this many sinks (0 when no sinks are configured)
    Delivered { sinks: usize },
    Suppressed,
    /// Every sink exhausted its attempts
    Dropped,
    /// Dispatch disabled
    Discarded,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub enabled: bool,
    pub cooldown: Duration,
    pub retry: RetryPolicy,
}

impl DispatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.alerts_enabled(),
            cooldown: config.cooldown(),
            retry: RetryPolicy {
                max_attempts: config.max_attempts().max(1),
                base_backoff: config.base_backoff(),
                max_backoff: config.max_backoff(),
            },
        }
    }
}

pub struct AlertDispatcher {
    settings: DispatcherSettings,
    sinks: Vec<Box<dyn AlertSink>>,
    cooldown: CooldownTracker,
    history: Arc<AlertHistory>,
    metrics: Arc<Metrics>,
}

impl AlertDispatcher {
    pub fn new(
        settings: DispatcherSettings,
        sinks: Vec<Box<dyn AlertSink>>,
        history: Arc<AlertHistory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { cooldown: CooldownTracker::new(settings.cooldown), settings, sinks, history, metrics }
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Apply cooldown and deliver one alert to every sink
    pub async fn dispatch(&mut self, event: AlertEvent) -> DispatchOutcome {
        if !self.settings.enabled {
            self.metrics.record_alert_discarded();
            debug!(device_id = %event.device_id, zone_id = %event.zone_id, "alert_discarded");
            return DispatchOutcome::Discarded;
        }

        if !self.cooldown.allow(&event) {
            self.metrics.record_alert_suppressed();
            debug!(
                device_id = %event.device_id,
                zone_id = %event.zone_id,
                kind = %event.kind,
                ts = %event.timestamp,
                "alert_suppressed"
            );
            return DispatchOutcome::Suppressed;
        }

        let mut delivered = 0usize;
        for sink in &self.sinks {
            if self.deliver_with_retry(sink.as_ref(), &event).await {
                delivered += 1;
            }
        }

        if delivered == 0 && !self.sinks.is_empty() {
            self.metrics.record_alert_dropped();
            error!(
                alert_id = %event.alert_id,
                device_id = %event.device_id,
                zone_id = %event.zone_id,
                kind = %event.kind,
                "alert_dropped"
            );
            return DispatchOutcome::Dropped;
        }

        info!(
            alert_id = %event.alert_id,
            device_id = %event.device_id,
            zone_id = %event.zone_id,
            zone_name = %event.zone_name,
            kind = %event.kind,
            severity = %event.severity,
            sinks = %delivered,
            "alert_dispatched"
        );
        self.metrics.record_alert_delivered();
        self.history.record(event);
        DispatchOutcome::Delivered { sinks: delivered }
    }

    async fn deliver_with_retry(&self, sink: &dyn AlertSink, event: &AlertEvent) -> bool {
        let retry = self.settings.retry;
        for attempt in 1..=retry.max_attempts {
            match sink.deliver(event).await {
                Ok(()) => {
                    debug!(sink = sink.name(), attempt = %attempt, alert_id = %event.alert_id, "alert_delivered");
                    return true;
                }
                Err(e) if attempt < retry.max_attempts => {
                    let delay = retry.backoff_for(attempt);
                    self.metrics.record_alert_retry();
                    warn!(
                        sink = sink.name(),
                        attempt = %attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "alert_delivery_retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        sink = sink.name(),
                        attempts = %attempt,
                        alert_id = %event.alert_id,
                        error = %e,
                        "alert_delivery_exhausted"
                    );
                }
            }
        }
        false
    }

    /// Run until the channel closes or shutdown is signalled. Queued alerts
    /// are drained before returning.
    pub async fn run(mut self, mut alert_rx: mpsc::Receiver<AlertEvent>, mut shutdown: watch::Receiver<bool>) {
        info!(sinks = ?self.sink_names(), enabled = %self.settings.enabled, "alert_dispatcher_started");

        let prune_every = self.settings.cooldown.max(Duration::from_secs(1));
        let mut prune_interval = interval(prune_every);

        loop {
            tokio::select! {
                event = alert_rx.recv() => {
                    match event {
                        Some(event) => {
                            self.dispatch(event).await;
                        }
                        None => break,
                    }
                }
                _ = prune_interval.tick() => {
                    let pruned = self.cooldown.prune();
                    if pruned > 0 {
                        debug!(pruned = %pruned, remaining = %self.cooldown.len(), "cooldown_pruned");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        alert_rx.close();
                        while let Some(event) = alert_rx.recv().await {
                            self.dispatch(event).await;
                        }
                        break;
                    }
                }
            }
        }

        info!("alert_dispatcher_stopped");
    }
}
