//! Tests for the membership evaluator

use super::*;
use crate::domain::geometry::{Geometry, METERS_PER_DEG_LAT};
use crate::domain::types::{GeoPoint, Severity};
use crate::io::alert_channel::create_alert_channel;
use tokio::sync::mpsc;

const CENTER: (f64, f64) = (40.7128, -74.0060);
const T0: u64 = 1_700_000_000_000;

/// Test harness that keeps the alert receiver alive so `try_send` succeeds
struct TestEvaluator {
    evaluator: MembershipEvaluator,
    alert_rx: mpsc::Receiver<AlertEvent>,
    metrics: Arc<Metrics>,
    t0: Instant,
}

impl std::ops::Deref for TestEvaluator {
    type Target = MembershipEvaluator;
    fn deref(&self) -> &Self::Target {
        &self.evaluator
    }
}

impl TestEvaluator {
    /// Submit at `secs` seconds after T0 (sample time and arrival time move together)
    fn at(&self, secs: u64, lat: f64, lon: f64) -> SubmitOutcome {
        self.submit_sample(
            PositionSample::new("dev-1", lat, lon, 5.0, T0 + secs * 1000),
            self.t0 + Duration::from_secs(secs),
        )
    }

    fn drain_alerts(&mut self) -> Vec<AlertEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.alert_rx.try_recv() {
            out.push(event);
        }
        out
    }
}

fn create_test_evaluator(zones: Vec<Zone>) -> TestEvaluator {
    let settings = EvaluatorSettings {
        max_accuracy_m: 50.0,
        idle_timeout: Duration::from_secs(300),
        device_shards: 8,
    };
    let store = Arc::new(ZoneStore::default());
    store.load(zones).unwrap();
    let metrics = Arc::new(Metrics::new());
    let (sender, alert_rx) = create_alert_channel(256, metrics.clone());
    let evaluator = MembershipEvaluator::new(settings, store, sender, metrics.clone());
    TestEvaluator { evaluator, alert_rx, metrics, t0: Instant::now() }
}

fn hazard() -> Zone {
    Zone::new("hazard", "Hazard", Geometry::circle(GeoPoint::new(CENTER.0, CENTER.1), 50.0), Severity::High)
}

fn north_of_center(meters: f64) -> (f64, f64) {
    (CENTER.0 + meters / METERS_PER_DEG_LAT, CENTER.1)
}

fn kinds(outcome: &SubmitOutcome) -> Vec<(AlertKind, &str)> {
    outcome.events().iter().map(|e| (e.kind, e.zone_id.as_str())).collect()
}

#[test]
fn test_first_sample_inside_emits_single_enter() {
    let mut t = create_test_evaluator(vec![hazard()]);
    let out = t.at(0, CENTER.0, CENTER.1);

    assert_eq!(kinds(&out), vec![(AlertKind::Enter, "hazard")]);
    let event = &out.events()[0];
    assert_eq!(event.severity, Severity::High);
    assert_eq!(event.zone_name, "Hazard");
    assert_eq!(event.timestamp, T0);
    assert_eq!(t.drain_alerts().len(), 1);
    assert_eq!(t.membership(&DeviceId::new("dev-1")), vec![ZoneId::new("hazard")]);
}

#[test]
fn test_first_sample_outside_emits_nothing() {
    let t = create_test_evaluator(vec![hazard()]);
    let (lat, lon) = north_of_center(500.0);
    let out = t.at(0, lat, lon);
    assert_eq!(out, SubmitOutcome::Accepted { events: vec![] });
    assert_eq!(t.tracked_devices(), 1);
}

#[test]
fn test_enter_stay_exit_sequence() {
    let t = create_test_evaluator(vec![hazard()]);

    assert_eq!(kinds(&t.at(0, CENTER.0, CENTER.1)), vec![(AlertKind::Enter, "hazard")]);
    assert!(t.at(10, CENTER.0, CENTER.1).events().is_empty());

    let (lat, lon) = north_of_center(200.0);
    assert_eq!(kinds(&t.at(30, lat, lon)), vec![(AlertKind::Exit, "hazard")]);
    assert!(t.membership(&DeviceId::new("dev-1")).is_empty());

    // Membership updates on re-entry regardless of any dispatch cooldown
    assert_eq!(kinds(&t.at(35, CENTER.0, CENTER.1)), vec![(AlertKind::Enter, "hazard")]);
}

#[test]
fn test_stale_and_duplicate_samples_rejected() {
    let t = create_test_evaluator(vec![hazard()]);
    t.at(10, CENTER.0, CENTER.1);

    // Duplicate delivery
    let dup = t.at(10, CENTER.0, CENTER.1);
    assert!(matches!(dup, SubmitOutcome::Rejected(Rejection::Stale { .. })));

    // Older sample from outside must not produce an exit
    let (lat, lon) = north_of_center(500.0);
    let old = t.at(5, lat, lon);
    assert!(old.is_rejected());
    assert_eq!(t.membership(&DeviceId::new("dev-1")), vec![ZoneId::new("hazard")]);
    assert_eq!(t.metrics.samples_rejected(), 2);
}

#[test]
fn test_inaccurate_sample_never_changes_membership() {
    let t = create_test_evaluator(vec![hazard()]);
    t.at(0, CENTER.0, CENTER.1);

    let (lat, lon) = north_of_center(500.0);
    let noisy = t.submit_sample(
        PositionSample::new("dev-1", lat, lon, 120.0, T0 + 5_000),
        t.t0 + Duration::from_secs(5),
    );
    assert!(matches!(noisy, SubmitOutcome::Rejected(Rejection::Inaccurate { .. })));
    assert_eq!(t.membership(&DeviceId::new("dev-1")), vec![ZoneId::new("hazard")]);
    // Noise does not advance the timestamp
    assert_eq!(t.last_sample_ms(&DeviceId::new("dev-1")), Some(T0));
    assert!(t.at(3, CENTER.0, CENTER.1).events().is_empty());
}

#[test]
fn test_invalid_report_leaves_state_untouched() {
    let t = create_test_evaluator(vec![hazard()]);
    let report = PositionReport {
        device_id: Some("dev-1".to_string()),
        latitude: Some(91.0),
        longitude: Some(CENTER.1),
        accuracy_m: Some(5.0),
        timestamp: Some(T0),
        ..Default::default()
    };
    let err = t.submit_position(report).unwrap_err();
    assert_eq!(err, ValidationError::LatitudeOutOfRange(91.0));
    assert_eq!(t.tracked_devices(), 0);
    assert_eq!(t.metrics.samples_invalid(), 1);
}

#[test]
fn test_submit_position_accepts_valid_report() {
    let t = create_test_evaluator(vec![hazard()]);
    let report = PositionReport {
        device_id: Some("dev-9".to_string()),
        latitude: Some(CENTER.0),
        longitude: Some(CENTER.1),
        accuracy_m: Some(3.0),
        timestamp: Some(T0),
        ..Default::default()
    };
    let out = t.submit_position(report).unwrap();
    assert_eq!(kinds(&out), vec![(AlertKind::Enter, "hazard")]);
}

#[test]
fn test_boundary_sample_is_inside_every_time() {
    // Axis-aligned square: a point on its edge is exactly representable
    let square = Zone::new(
        "square",
        "Square",
        Geometry::polygon(vec![
            GeoPoint::new(40.0, -74.0),
            GeoPoint::new(40.0, -73.9),
            GeoPoint::new(40.1, -73.9),
            GeoPoint::new(40.1, -74.0),
        ]),
        Severity::Medium,
    );
    let t = create_test_evaluator(vec![square]);

    for i in 0..20 {
        t.at(i, 40.05, -74.0);
        assert_eq!(t.membership(&DeviceId::new("dev-1")), vec![ZoneId::new("square")]);
    }
}

#[test]
fn test_events_ordered_exits_then_enters() {
    let zones = vec![
        Zone::new("b-west", "B", Geometry::circle(GeoPoint::new(0.0, 0.0), 100.0), Severity::Low),
        Zone::new("a-west", "A", Geometry::circle(GeoPoint::new(0.0, 0.0), 100.0), Severity::Low),
        Zone::new("d-east", "D", Geometry::circle(GeoPoint::new(0.0, 0.01), 100.0), Severity::Low),
        Zone::new("c-east", "C", Geometry::circle(GeoPoint::new(0.0, 0.01), 100.0), Severity::Low),
    ];
    let t = create_test_evaluator(zones);

    assert_eq!(
        kinds(&t.at(0, 0.0, 0.0)),
        vec![(AlertKind::Enter, "a-west"), (AlertKind::Enter, "b-west")]
    );
    assert_eq!(
        kinds(&t.at(1, 0.0, 0.01)),
        vec![
            (AlertKind::Exit, "a-west"),
            (AlertKind::Exit, "b-west"),
            (AlertKind::Enter, "c-east"),
            (AlertKind::Enter, "d-east"),
        ]
    );
}

#[test]
fn test_idle_expiry_then_reenter() {
    let t = create_test_evaluator(vec![hazard()]);
    t.at(0, CENTER.0, CENTER.1);

    assert!(t.expire_idle(t.t0 + Duration::from_secs(100)).is_empty());
    let expired = t.expire_idle(t.t0 + Duration::from_secs(301));
    assert_eq!(expired, vec![DeviceId::new("dev-1")]);
    assert_eq!(t.tracked_devices(), 0);
    assert_eq!(t.metrics.devices_expired(), 1);

    // Re-enters from empty membership; earlier timestamps are accepted again
    let out = t.at(1, CENTER.0, CENTER.1);
    assert_eq!(kinds(&out), vec![(AlertKind::Enter, "hazard")]);
}

#[test]
fn test_zone_removed_by_reload_produces_exit() {
    let t = create_test_evaluator(vec![hazard()]);
    t.at(0, CENTER.0, CENTER.1);

    t.zones().load(vec![]).unwrap();
    let out = t.at(1, CENTER.0, CENTER.1);
    assert_eq!(kinds(&out), vec![(AlertKind::Exit, "hazard")]);
    // Metadata comes from the remembered membership
    assert_eq!(out.events()[0].zone_name, "Hazard");
    assert_eq!(out.events()[0].severity, Severity::High);
}

#[test]
fn test_deactivated_zone_produces_exit() {
    let t = create_test_evaluator(vec![hazard()]);
    t.at(0, CENTER.0, CENTER.1);

    t.zones().set_active(&ZoneId::new("hazard"), false).unwrap();
    assert_eq!(kinds(&t.at(1, CENTER.0, CENTER.1)), vec![(AlertKind::Exit, "hazard")]);
}

#[test]
fn test_enter_exit_balance_over_random_walk() {
    let t = create_test_evaluator(vec![hazard()]);
    let mut seed = 42u64;
    let mut enters = 0i64;
    let mut exits = 0i64;

    for i in 0..500u64 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let offset_m = (seed >> 33) as f64 / (1u64 << 31) as f64 * 120.0;
        let (lat, lon) = north_of_center(offset_m);
        for event in t.at(i, lat, lon).events() {
            match event.kind {
                AlertKind::Enter => enters += 1,
                AlertKind::Exit => exits += 1,
            }
        }
        assert!(enters - exits == 0 || enters - exits == 1);
    }
    let inside = !t.membership(&DeviceId::new("dev-1")).is_empty();
    assert_eq!(enters - exits, inside as i64);
}

#[test]
fn test_concurrent_devices_keep_independent_state() {
    let t = create_test_evaluator(vec![hazard()]);
    let evaluator = &t.evaluator;
    let t0 = t.t0;

    std::thread::scope(|s| {
        for d in 0..8 {
            s.spawn(move || {
                let id = format!("dev-{d}");
                for i in 0..100u64 {
                    let (lat, lon) = if i % 2 == 0 { CENTER } else { north_of_center(200.0) };
                    let out = evaluator.submit_sample(
                        PositionSample::new(id.clone(), lat, lon, 5.0, T0 + i * 1000),
                        t0 + Duration::from_secs(i),
                    );
                    assert_eq!(out.events().len(), 1);
                }
            });
        }
    });

    assert_eq!(t.tracked_devices(), 8);
    for d in 0..8 {
        // Last sample (i = 99) was outside
        assert!(t.membership(&DeviceId::new(format!("dev-{d}"))).is_empty());
    }
}

#[test]
fn test_alert_queue_full_does_not_block_evaluation() {
    let store = Arc::new(ZoneStore::default());
    store.load(vec![hazard()]).unwrap();
    let metrics = Arc::new(Metrics::new());
    let (sender, _rx) = create_alert_channel(1, metrics.clone());
    let evaluator = MembershipEvaluator::new(EvaluatorSettings::default(), store, sender, metrics.clone());
    let now = Instant::now();

    let (out_lat, out_lon) = north_of_center(200.0);
    for i in 0..6u64 {
        let (lat, lon) = if i % 2 == 0 { CENTER } else { (out_lat, out_lon) };
        let out = evaluator.submit_sample(PositionSample::new("dev-1", lat, lon, 5.0, T0 + i), now);
        assert_eq!(out.events().len(), 1);
    }
    assert_eq!(metrics.alerts_enqueued(), 1);
    assert_eq!(metrics.alerts_queue_full(), 5);
}

#[test]
fn test_tracked_devices_gauge_follows_new_devices() {
    let t = create_test_evaluator(vec![hazard()]);
    t.at(0, CENTER.0, CENTER.1);
    assert_eq!(t.metrics.snapshot().tracked_devices, 1);

    t.submit_sample(PositionSample::new("dev-2", CENTER.0, CENTER.1, 5.0, T0), t.t0);
    assert_eq!(t.metrics.snapshot().tracked_devices, 2);

    // Known device: gauge unchanged
    t.at(1, CENTER.0, CENTER.1);
    assert_eq!(t.metrics.snapshot().tracked_devices, 2);
}
