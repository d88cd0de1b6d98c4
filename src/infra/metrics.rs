//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::AlertKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn take_buckets(buckets: &[AtomicU64; NUM_BUCKETS], reset: bool) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| {
        if reset {
            buckets[i].swap(0, Ordering::Relaxed)
        } else {
            buckets[i].load(Ordering::Relaxed)
        }
    })
}

#[inline]
fn take(counter: &AtomicU64, reset: bool) -> u64 {
    if reset {
        counter.swap(0, Ordering::Relaxed)
    } else {
        counter.load(Ordering::Relaxed)
    }
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps periodic counters to get a consistent snapshot.
pub struct Metrics {
    // Ingest
    samples_received: AtomicU64,
    samples_invalid: AtomicU64,
    samples_rejected_stale: AtomicU64,
    samples_rejected_inaccurate: AtomicU64,
    samples_accepted: AtomicU64,
    parse_errors: AtomicU64,
    /// Accepted samples since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Evaluation latency (reset on report)
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; NUM_BUCKETS],

    // Transitions
    enter_events: AtomicU64,
    exit_events: AtomicU64,

    // Alert pipeline
    alerts_enqueued: AtomicU64,
    alerts_queue_full: AtomicU64,
    alerts_suppressed: AtomicU64,
    alerts_delivered: AtomicU64,
    alerts_retried: AtomicU64,
    alerts_dropped: AtomicU64,
    alerts_discarded: AtomicU64,

    // Lifecycle
    devices_expired: AtomicU64,
    zone_reloads: AtomicU64,
    zone_reload_failures: AtomicU64,

    // Gauges
    tracked_devices: AtomicU64,
    zones_loaded: AtomicU64,
    alert_queue_depth: AtomicU64,

    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            samples_invalid: AtomicU64::new(0),
            samples_rejected_stale: AtomicU64::new(0),
            samples_rejected_inaccurate: AtomicU64::new(0),
            samples_accepted: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            enter_events: AtomicU64::new(0),
            exit_events: AtomicU64::new(0),
            alerts_enqueued: AtomicU64::new(0),
            alerts_queue_full: AtomicU64::new(0),
            alerts_suppressed: AtomicU64::new(0),
            alerts_delivered: AtomicU64::new(0),
            alerts_retried: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
            alerts_discarded: AtomicU64::new(0),
            devices_expired: AtomicU64::new(0),
            zone_reloads: AtomicU64::new(0),
            zone_reload_failures: AtomicU64::new(0),
            tracked_devices: AtomicU64::new(0),
            zones_loaded: AtomicU64::new(0),
            alert_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Position report arrived (before validation)
    #[inline]
    pub fn record_sample_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Position report failed validation
    #[inline]
    pub fn record_sample_invalid(&self) {
        self.samples_invalid.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_stale(&self) {
        self.samples_rejected_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_inaccurate(&self) {
        self.samples_rejected_inaccurate.fetch_add(1, Ordering::Relaxed);
    }

    /// Ingest payload could not be decoded
    #[inline]
    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted sample with its evaluation latency (lock-free)
    #[inline]
    pub fn record_sample_evaluated(&self, latency_us: u64) {
        self.samples_accepted.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_transition(&self, kind: AlertKind) {
        match kind {
            AlertKind::Enter => self.enter_events.fetch_add(1, Ordering::Relaxed),
            AlertKind::Exit => self.exit_events.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub fn record_alert_enqueued(&self) {
        self.alerts_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Alert dropped because the dispatcher queue was full
    #[inline]
    pub fn record_alert_queue_full(&self) {
        self.alerts_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    /// Alert suppressed by the cooldown window
    #[inline]
    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_delivered(&self) {
        self.alerts_delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_retry(&self) {
        self.alerts_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Alert dropped after every sink exhausted its attempts
    #[inline]
    pub fn record_alert_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Alert drained while dispatch is disabled
    #[inline]
    pub fn record_alert_discarded(&self) {
        self.alerts_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_devices_expired(&self, count: u64) {
        self.devices_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_zone_reload(&self, ok: bool) {
        if ok {
            self.zone_reloads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.zone_reload_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_tracked_devices(&self, count: u64) {
        self.tracked_devices.store(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_zones_loaded(&self, count: u64) {
        self.zones_loaded.store(count, Ordering::Relaxed);
    }

    /// Set current alert queue depth (called by sampler)
    #[inline]
    pub fn set_alert_queue_depth(&self, depth: u64) {
        self.alert_queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn samples_received(&self) -> u64 {
        self.samples_received.load(Ordering::Relaxed)
    }

    pub fn samples_accepted(&self) -> u64 {
        self.samples_accepted.load(Ordering::Relaxed)
    }

    pub fn samples_rejected(&self) -> u64 {
        self.samples_rejected_stale.load(Ordering::Relaxed)
            + self.samples_rejected_inaccurate.load(Ordering::Relaxed)
    }

    pub fn samples_invalid(&self) -> u64 {
        self.samples_invalid.load(Ordering::Relaxed)
    }

    pub fn alerts_enqueued(&self) -> u64 {
        self.alerts_enqueued.load(Ordering::Relaxed)
    }

    pub fn alerts_queue_full(&self) -> u64 {
        self.alerts_queue_full.load(Ordering::Relaxed)
    }

    pub fn alerts_suppressed(&self) -> u64 {
        self.alerts_suppressed.load(Ordering::Relaxed)
    }

    pub fn alerts_delivered(&self) -> u64 {
        self.alerts_delivered.load(Ordering::Relaxed)
    }

    pub fn alerts_retried(&self) -> u64 {
        self.alerts_retried.load(Ordering::Relaxed)
    }

    pub fn alerts_dropped(&self) -> u64 {
        self.alerts_dropped.load(Ordering::Relaxed)
    }

    pub fn alerts_discarded(&self) -> u64 {
        self.alerts_discarded.load(Ordering::Relaxed)
    }

    pub fn devices_expired(&self) -> u64 {
        self.devices_expired.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        let mut summary = self.summarize(true);
        summary.samples_per_sec = if elapsed.as_secs_f64() > 0.0 {
            summary.samples_since_report as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        summary
    }

    /// Summary without resetting anything (used by the scrape endpoint)
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let samples_since_report = take(&self.samples_since_report, reset);
        let latency_sum = take(&self.latency_sum_us, reset);
        let max_latency = take(&self.latency_max_us, reset);
        let lat_buckets = take_buckets(&self.latency_buckets, reset);

        let avg_latency =
            if samples_since_report > 0 { latency_sum / samples_since_report } else { 0 };

        MetricsSummary {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            samples_rejected_stale: self.samples_rejected_stale.load(Ordering::Relaxed),
            samples_rejected_inaccurate: self.samples_rejected_inaccurate.load(Ordering::Relaxed),
            samples_invalid: self.samples_invalid.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            samples_since_report,
            samples_per_sec: 0.0,
            avg_eval_latency_us: avg_latency,
            max_eval_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            enter_events: self.enter_events.load(Ordering::Relaxed),
            exit_events: self.exit_events.load(Ordering::Relaxed),
            alerts_enqueued: self.alerts_enqueued.load(Ordering::Relaxed),
            alerts_queue_full: self.alerts_queue_full.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            alerts_delivered: self.alerts_delivered.load(Ordering::Relaxed),
            alerts_retried: self.alerts_retried.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            alerts_discarded: self.alerts_discarded.load(Ordering::Relaxed),
            devices_expired: self.devices_expired.load(Ordering::Relaxed),
            zone_reloads: self.zone_reloads.load(Ordering::Relaxed),
            zone_reload_failures: self.zone_reload_failures.load(Ordering::Relaxed),
            tracked_devices: self.tracked_devices.load(Ordering::Relaxed),
            zones_loaded: self.zones_loaded.load(Ordering::Relaxed),
            alert_queue_depth: self.alert_queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for the scrape endpoint)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub samples_received: u64,
    pub samples_accepted: u64,
    pub samples_rejected_stale: u64,
    pub samples_rejected_inaccurate: u64,
    pub samples_invalid: u64,
    pub parse_errors: u64,
    /// Accepted samples in this reporting period
    pub samples_since_report: u64,
    pub samples_per_sec: f64,
    pub avg_eval_latency_us: u64,
    pub max_eval_latency_us: u64,
    /// Evaluation latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub enter_events: u64,
    pub exit_events: u64,
    pub alerts_enqueued: u64,
    pub alerts_queue_full: u64,
    pub alerts_suppressed: u64,
    pub alerts_delivered: u64,
    pub alerts_retried: u64,
    pub alerts_dropped: u64,
    pub alerts_discarded: u64,
    pub devices_expired: u64,
    pub zone_reloads: u64,
    pub zone_reload_failures: u64,
    pub tracked_devices: u64,
    pub zones_loaded: u64,
    pub alert_queue_depth: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples = %self.samples_received,
            accepted = %self.samples_accepted,
            stale = %self.samples_rejected_stale,
            inaccurate = %self.samples_rejected_inaccurate,
            invalid = %self.samples_invalid,
            samples_per_sec = format!("{:.1}", self.samples_per_sec),
            avg_latency_us = %self.avg_eval_latency_us,
            p99_us = %self.lat_p99_us,
            enters = %self.enter_events,
            exits = %self.exit_events,
            delivered = %self.alerts_delivered,
            suppressed = %self.alerts_suppressed,
            dropped = %(self.alerts_dropped + self.alerts_queue_full),
            devices = %self.tracked_devices,
            zones = %self.zones_loaded,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.samples_received(), 0);
        assert_eq!(metrics.alerts_delivered(), 0);
    }

    #[test]
    fn test_record_sample_evaluated() {
        let metrics = Metrics::new();

        metrics.record_sample_evaluated(100);
        assert_eq!(metrics.samples_accepted(), 1);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_sample_evaluated(200);
        assert_eq!(metrics.samples_accepted(), 2);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();

        metrics.record_sample_evaluated(100);
        metrics.record_sample_evaluated(200);
        metrics.record_sample_evaluated(300);
        metrics.record_transition(AlertKind::Enter);
        metrics.set_tracked_devices(5);

        let summary = metrics.report();

        assert_eq!(summary.samples_accepted, 3);
        assert_eq!(summary.avg_eval_latency_us, 200); // (100+200+300)/3
        assert_eq!(summary.max_eval_latency_us, 300);
        assert_eq!(summary.enter_events, 1);
        assert_eq!(summary.tracked_devices, 5);

        // Periodic counters should be reset, monotonic ones kept
        assert_eq!(metrics.samples_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.samples_accepted(), 3);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_sample_evaluated(150);

        let first = metrics.snapshot();
        let second = metrics.snapshot();
        assert_eq!(first.lat_buckets, second.lat_buckets);
        assert_eq!(second.samples_since_report, 1);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report();

        assert_eq!(summary.samples_accepted, 0);
        assert_eq!(summary.avg_eval_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_rejections_counted_separately() {
        let metrics = Metrics::new();
        metrics.record_sample_stale();
        metrics.record_sample_inaccurate();
        metrics.record_sample_inaccurate();

        let summary = metrics.snapshot();
        assert_eq!(summary.samples_rejected_stale, 1);
        assert_eq!(summary.samples_rejected_inaccurate, 2);
        assert_eq!(metrics.samples_rejected(), 3);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_sample_evaluated(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.samples_accepted(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // All at 150µs (bucket 1, ≤200)
        for _ in 0..100 {
            metrics.record_sample_evaluated(150);
        }

        let summary = metrics.report();
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
