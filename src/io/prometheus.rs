//! Prometheus metrics HTTP endpoint
//!
//! Exposes engine metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write one counter family split by a `kind` label
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    values: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (kind, val) in values {
        let _ = writeln!(output, "{name}{{site=\"{site}\",kind=\"{kind}\"}} {val}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_sample_metrics(&mut output, site_id, &summary);
    write_latency_metrics(&mut output, site_id, &summary);
    write_alert_metrics(&mut output, site_id, &summary);
    write_state_metrics(&mut output, site_id, &summary);

    output
}

fn write_sample_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "geofence_samples_received_total",
        "Position samples received",
        MetricType::Counter,
        site,
        summary.samples_received,
    );
    write_metric(
        output,
        "geofence_samples_accepted_total",
        "Position samples that passed the filter",
        MetricType::Counter,
        site,
        summary.samples_accepted,
    );
    write_labeled_counter(
        output,
        "geofence_samples_rejected_total",
        "Position samples gated out by the filter",
        site,
        &[
            ("stale", summary.samples_rejected_stale),
            ("inaccurate", summary.samples_rejected_inaccurate),
        ],
    );
    write_metric(
        output,
        "geofence_samples_invalid_total",
        "Position reports failing validation",
        MetricType::Counter,
        site,
        summary.samples_invalid,
    );
    write_metric(
        output,
        "geofence_parse_errors_total",
        "Undecodable position payloads",
        MetricType::Counter,
        site,
        summary.parse_errors,
    );
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "geofence_eval_latency_us",
        "Sample evaluation latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_eval_latency_us,
    );
    write_metric(
        output,
        "geofence_eval_latency_p99_us",
        "99th percentile evaluation latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
    write_metric(
        output,
        "geofence_eval_latency_max_us",
        "Maximum evaluation latency",
        MetricType::Gauge,
        site,
        summary.max_eval_latency_us,
    );
}

fn write_alert_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_labeled_counter(
        output,
        "geofence_transitions_total",
        "Zone membership transitions",
        site,
        &[("enter", summary.enter_events), ("exit", summary.exit_events)],
    );
    write_metric(
        output,
        "geofence_alerts_enqueued_total",
        "Alerts handed to the dispatch queue",
        MetricType::Counter,
        site,
        summary.alerts_enqueued,
    );
    write_metric(
        output,
        "geofence_alerts_queue_full_total",
        "Alerts dropped because the dispatch queue was full",
        MetricType::Counter,
        site,
        summary.alerts_queue_full,
    );
    write_metric(
        output,
        "geofence_alerts_suppressed_total",
        "Alerts suppressed by the cooldown window",
        MetricType::Counter,
        site,
        summary.alerts_suppressed,
    );
    write_metric(
        output,
        "geofence_alerts_delivered_total",
        "Alerts delivered to at least one sink",
        MetricType::Counter,
        site,
        summary.alerts_delivered,
    );
    write_metric(
        output,
        "geofence_alerts_retried_total",
        "Sink delivery retries",
        MetricType::Counter,
        site,
        summary.alerts_retried,
    );
    write_metric(
        output,
        "geofence_alerts_dropped_total",
        "Alerts no sink accepted after all retries",
        MetricType::Counter,
        site,
        summary.alerts_dropped,
    );
    write_metric(
        output,
        "geofence_alerts_discarded_total",
        "Alerts discarded while alerting is disabled",
        MetricType::Counter,
        site,
        summary.alerts_discarded,
    );
}

fn write_state_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "geofence_tracked_devices",
        "Devices with live membership state",
        MetricType::Gauge,
        site,
        summary.tracked_devices,
    );
    write_metric(
        output,
        "geofence_zones_loaded",
        "Zones in the current snapshot",
        MetricType::Gauge,
        site,
        summary.zones_loaded,
    );
    write_metric(
        output,
        "geofence_alert_queue_depth",
        "Current dispatch queue depth",
        MetricType::Gauge,
        site,
        summary.alert_queue_depth,
    );
    write_metric(
        output,
        "geofence_devices_expired_total",
        "Devices dropped after the idle timeout",
        MetricType::Counter,
        site,
        summary.devices_expired,
    );
    write_labeled_counter(
        output,
        "geofence_zone_reloads_total",
        "Zone file reload attempts",
        site,
        &[("ok", summary.zone_reloads), ("failed", summary.zone_reload_failures)],
    );
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::AlertKind;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_sample_received();
        metrics.record_sample_received();
        metrics.record_sample_evaluated(150);
        metrics.record_sample_stale();
        metrics.record_transition(AlertKind::Enter);
        metrics.set_tracked_devices(3);
        metrics.set_zones_loaded(2);

        let output = format_prometheus_metrics(&metrics, "plant-1");

        assert!(output.contains("geofence_samples_received_total{site=\"plant-1\"} 2"));
        assert!(output.contains("geofence_samples_accepted_total{site=\"plant-1\"} 1"));
        assert!(output.contains("geofence_samples_rejected_total{site=\"plant-1\",kind=\"stale\"} 1"));
        assert!(output.contains("geofence_eval_latency_us_bucket{site=\"plant-1\",le=\"200\"} 1"));
        assert!(output.contains("geofence_eval_latency_us_count{site=\"plant-1\"} 1"));
        assert!(output.contains("geofence_transitions_total{site=\"plant-1\",kind=\"enter\"} 1"));
        assert!(output.contains("geofence_tracked_devices{site=\"plant-1\"} 3"));
        assert!(output.contains("geofence_zones_loaded{site=\"plant-1\"} 2"));
    }

    #[test]
    fn test_scrape_does_not_reset_counters() {
        let metrics = Metrics::new();
        metrics.record_sample_evaluated(50);

        let first = format_prometheus_metrics(&metrics, "s");
        let second = format_prometheus_metrics(&metrics, "s");
        assert!(first.contains("geofence_eval_latency_us_count{site=\"s\"} 1"));
        assert!(second.contains("geofence_eval_latency_us_count{site=\"s\"} 1"));
    }
}
