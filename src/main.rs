//! Geofence engine - real-time danger zone alerting
//!
//! Consumes device position reports from MQTT, tracks which danger zones each
//! device occupies, and dispatches enter/exit alerts to the configured sinks.
//!
//! Module structure:
//! - `domain/` - Core types (positions, zones, geometry, alerts)
//! - `io/` - External interfaces (MQTT ingest, alert sinks, Prometheus)
//! - `services/` - Zone store, spatial index, evaluator, dispatcher
//! - `infra/` - Infrastructure (Config, Metrics, zone files)

use anyhow::Context;
use clap::Parser;
use geofence_engine::infra::{Config, Metrics};
use geofence_engine::io::create_alert_channel;
use geofence_engine::io::sinks::sinks_from_config;
use geofence_engine::services::spatial_index::IndexConfig;
use geofence_engine::services::{
    AlertDispatcher, AlertHistory, DispatcherSettings, EvaluatorSettings, MembershipEvaluator,
    ZoneStore,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence engine - danger zone enter/exit alerting
#[derive(Parser, Debug)]
#[command(name = "geofence-engine", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-sample detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "geofence-engine starting");

    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        zones_file = %config.zones_file(),
        mqtt_enabled = %config.mqtt_enabled(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        positions_topic = %config.mqtt_positions_topic(),
        max_accuracy_m = %config.max_accuracy_m(),
        idle_timeout_secs = %config.idle_timeout().as_secs(),
        cooldown_secs = %config.cooldown().as_secs(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared components
    let metrics = Arc::new(Metrics::new());
    let zones = Arc::new(ZoneStore::new(IndexConfig::from_config(&config)));
    let snapshot = zones
        .load_file(config.zones_file())
        .with_context(|| format!("failed to load zones from {}", config.zones_file()))?;
    metrics.set_zones_loaded(snapshot.len() as u64);

    let (alert_tx, alert_rx) = create_alert_channel(config.alert_queue_capacity(), metrics.clone());
    let evaluator = Arc::new(MembershipEvaluator::new(
        EvaluatorSettings::from_config(&config),
        zones.clone(),
        alert_tx.clone(),
        metrics.clone(),
    ));

    // Alert dispatcher
    let history = Arc::new(AlertHistory::new(config.history_size()));
    let sinks = sinks_from_config(&config)?;
    let dispatcher =
        AlertDispatcher::new(DispatcherSettings::from_config(&config), sinks, history, metrics.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run(alert_rx, shutdown_rx.clone()));

    // MQTT position ingest
    if config.mqtt_enabled() {
        let mqtt_config = config.clone();
        let mqtt_evaluator = evaluator.clone();
        let mqtt_metrics = metrics.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = geofence_engine::io::mqtt_ingest::start_mqtt_ingest(
                &mqtt_config,
                mqtt_evaluator,
                mqtt_metrics,
                mqtt_shutdown,
            )
            .await
            {
                error!(error = %e, "mqtt_ingest_failed");
            }
        });
    }

    // Idle device sweep and queue gauges
    let sweep_evaluator = evaluator.clone();
    let sweep_metrics = metrics.clone();
    let sweep_zones = zones.clone();
    let sweep_interval = config.sweep_interval();
    let mut sweep_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    sweep_evaluator.expire_idle(Instant::now());
                    sweep_metrics.set_alert_queue_depth(alert_tx.queue_depth() as u64);
                    sweep_metrics.set_zones_loaded(sweep_zones.len() as u64);
                }
                _ = sweep_shutdown.changed() => {
                    if *sweep_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = geofence_engine::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_server_failed");
            }
        });
    }

    // Periodic metrics summary
    let report_metrics = metrics.clone();
    let report_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(report_interval));
        loop {
            interval.tick().await;
            report_metrics.report().log();
        }
    });

    // Zone reload on SIGHUP
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
        let reload_zones = zones.clone();
        let reload_metrics = metrics.clone();
        let zones_file = config.zones_file().to_string();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!(path = %zones_file, "zone_reload_requested");
                match reload_zones.load_file(&zones_file) {
                    Ok(snapshot) => {
                        reload_metrics.record_zone_reload(true);
                        reload_metrics.set_zones_loaded(snapshot.len() as u64);
                    }
                    Err(e) => {
                        reload_metrics.record_zone_reload(false);
                        error!(path = %zones_file, error = %e, "zone_reload_failed");
                    }
                }
            }
        });
    }

    info!(zones = %snapshot.len(), "geofence_engine_started");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Let the dispatcher drain queued alerts
    if let Err(e) = dispatcher_handle.await {
        error!(error = %e, "alert_dispatcher_join_failed");
    }

    info!("geofence-engine shutdown complete");
    Ok(())
}
