//! Geofence device simulator
//!
//! Moves a fleet of simulated devices around a circular path that crosses the
//! demo danger zones, and either evaluates them in-process or publishes them
//! to the MQTT positions topic.
//!
//! Usage:
//!   cargo run --bin geofence-sim                          # in-process, prints alerts
//!   cargo run --bin geofence-sim -- --mode mqtt           # publish to the broker
//!   cargo run --bin geofence-sim -- --devices 5 --interval-ms 100 --steps 240

use anyhow::Context;
use clap::{Parser, ValueEnum};
use geofence_engine::domain::geometry::METERS_PER_DEG_LAT;
use geofence_engine::domain::types::{epoch_ms, AlertEvent, PositionReport};
use geofence_engine::infra::{Config, Metrics};
use geofence_engine::io::{create_alert_channel, ChannelSink};
use geofence_engine::services::spatial_index::IndexConfig;
use geofence_engine::services::{
    AlertDispatcher, AlertHistory, AlertSink, DispatcherSettings, EvaluatorSettings,
    MembershipEvaluator, ZoneStore,
};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Path center (lower Manhattan)
const PATH_CENTER: (f64, f64) = (40.7128, -74.0060);

/// Samples per lap
const STEPS_PER_LAP: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run the engine in-process and print alerts
    Local,
    /// Publish position reports to the MQTT broker
    Mqtt,
}

#[derive(Parser, Debug)]
#[command(name = "geofence-sim")]
#[command(about = "Simulated devices for the geofence engine")]
struct Args {
    #[arg(long, value_enum, default_value = "local")]
    mode: Mode,

    /// Config file path (zones file, MQTT broker, engine settings)
    #[arg(short, long)]
    config: Option<String>,

    /// Number of simulated devices
    #[arg(short, long, default_value = "3")]
    devices: u32,

    /// Delay between sample rounds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Sample rounds to run (0 = run until Ctrl+C)
    #[arg(long, default_value = "120")]
    steps: u32,

    /// Path radius in meters
    #[arg(long, default_value = "200")]
    radius_m: f64,

    /// Reported horizontal accuracy in meters
    #[arg(long, default_value = "5")]
    accuracy_m: f64,
}

/// Point on a circle of `radius_m` around `center`, `angle` radians from north
fn position_on_path(center: (f64, f64), radius_m: f64, angle: f64) -> (f64, f64) {
    let dlat = radius_m * angle.cos() / METERS_PER_DEG_LAT;
    let dlon = radius_m * angle.sin() / (METERS_PER_DEG_LAT * center.0.to_radians().cos());
    (center.0 + dlat, center.1 + dlon)
}

/// Reports for every device at `step`. Devices are spread evenly around the path.
fn reports_for_step(args: &Args, step: u32) -> Vec<PositionReport> {
    let ts = epoch_ms();
    (0..args.devices)
        .map(|i| {
            let phase = TAU * f64::from(i) / f64::from(args.devices.max(1));
            let angle = phase + TAU * f64::from(step % STEPS_PER_LAP) / f64::from(STEPS_PER_LAP);
            let (lat, lon) = position_on_path(PATH_CENTER, args.radius_m, angle);
            PositionReport {
                device_id: Some(format!("sim-{:03}", i + 1)),
                latitude: Some(lat),
                longitude: Some(lon),
                accuracy_m: Some(args.accuracy_m),
                speed: Some(args.radius_m * TAU / f64::from(STEPS_PER_LAP) / (args.interval_ms as f64 / 1000.0)),
                heading: Some((angle.to_degrees() + 90.0).rem_euclid(360.0)),
                timestamp: Some(ts),
            }
        })
        .collect()
}

fn format_ts(ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}

fn print_alert(event: &AlertEvent) {
    println!(
        "{}  {:<5}  {:<8}  {:<28}  severity={:<6}  ({:.6}, {:.6})",
        format_ts(event.timestamp),
        event.kind.as_str().to_uppercase(),
        event.device_id.as_str(),
        event.zone_name,
        event.severity.as_str(),
        event.latitude,
        event.longitude
    );
}

/// Wait for the next round, returning false on Ctrl+C
async fn next_round(interval: &mut tokio::time::Interval) -> bool {
    tokio::select! {
        _ = interval.tick() => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}

async fn run_local(args: &Args, config: &Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new());
    let zones = Arc::new(ZoneStore::new(IndexConfig::from_config(config)));
    let snapshot = zones
        .load_file(config.zones_file())
        .with_context(|| format!("failed to load zones from {}", config.zones_file()))?;
    info!(zones = %snapshot.len(), "sim_zones_loaded");

    let (alert_tx, alert_rx) = create_alert_channel(config.alert_queue_capacity(), metrics.clone());
    let evaluator = MembershipEvaluator::new(
        EvaluatorSettings::from_config(config),
        zones,
        alert_tx,
        metrics.clone(),
    );

    let (sink, mut printed_rx) = ChannelSink::new(256);
    let sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(sink)];
    let history = Arc::new(AlertHistory::new(config.history_size()));
    let dispatcher =
        AlertDispatcher::new(DispatcherSettings::from_config(config), sinks, history.clone(), metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_handle = tokio::spawn(dispatcher.run(alert_rx, shutdown_rx));
    let printer = tokio::spawn(async move {
        while let Some(event) = printed_rx.recv().await {
            print_alert(&event);
        }
    });

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut step = 0u32;
    while (args.steps == 0 || step < args.steps) && next_round(&mut interval).await {
        for report in reports_for_step(args, step) {
            if let Err(e) = evaluator.submit_position(report) {
                warn!(error = %e, "sim_report_invalid");
            }
        }
        step += 1;
    }

    let _ = shutdown_tx.send(true);
    dispatcher_handle.await.context("dispatcher task failed")?;
    printer.await.context("printer task failed")?;

    let stats = history.statistics();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    metrics.report().log();
    Ok(())
}

async fn run_mqtt(args: &Args, config: &Config) -> anyhow::Result<()> {
    let client_id = format!("geofence-sim-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("sim_mqtt_connected"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "sim_mqtt_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let topic = config.mqtt_positions_topic().to_string();
    info!(topic = %topic, devices = %args.devices, "sim_publishing");

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut step = 0u32;
    while (args.steps == 0 || step < args.steps) && next_round(&mut interval).await {
        let payload = serde_json::to_vec(&reports_for_step(args, step))?;
        client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .context("failed to queue publish")?;
        step += 1;
    }

    // Give the event loop a moment to flush in-flight publishes
    tokio::time::sleep(Duration::from_millis(500)).await;
    let _ = client.disconnect().await;
    info!(rounds = %step, "sim_finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(Config::resolve_config_path(args.config.as_deref()));

    match args.mode {
        Mode::Local => run_local(&args, &config).await,
        Mode::Mqtt => run_mqtt(&args, &config).await,
    }
}
