//! MQTT position ingest
//!
//! Subscribes to the positions topic and feeds every report into the
//! membership evaluator. A payload is either one report object or an array
//! of reports.

use crate::domain::types::PositionReport;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::evaluator::MembershipEvaluator;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Deserialize)]
#[serde(untagged)]
enum PositionPayload {
    Batch(Vec<PositionReport>),
    Single(PositionReport),
}

/// Decode a positions payload into its reports
pub fn parse_position_payload(json_str: &str) -> Result<Vec<PositionReport>, serde_json::Error> {
    Ok(match serde_json::from_str(json_str)? {
        PositionPayload::Batch(reports) => reports,
        PositionPayload::Single(report) => vec![report],
    })
}

/// Start the MQTT subscriber and evaluate incoming positions until shutdown
pub async fn start_mqtt_ingest(
    config: &Config,
    evaluator: Arc<MembershipEvaluator>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("geofence-ingest-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let topic = config.mqtt_positions_topic().to_string();
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

    info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_ingest_starting");

    // Rate-limit invalid payload warnings to 1 per second
    let mut last_invalid_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_ingest_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let reports = match std::str::from_utf8(&publish.payload)
                            .map_err(|e| e.to_string())
                            .and_then(|s| parse_position_payload(s).map_err(|e| e.to_string()))
                        {
                            Ok(reports) => reports,
                            Err(e) => {
                                metrics.record_parse_error();
                                if last_invalid_warn.elapsed() > Duration::from_secs(1) {
                                    warn!(topic = %publish.topic, error = %e, "position_payload_invalid");
                                    last_invalid_warn = Instant::now();
                                }
                                continue;
                            }
                        };

                        debug!(topic = %publish.topic, reports = %reports.len(), "position_payload_received");
                        for report in reports {
                            if let Err(e) = evaluator.submit_position(report) {
                                if last_invalid_warn.elapsed() > Duration::from_secs(1) {
                                    warn!(error = %e, "position_report_invalid");
                                    last_invalid_warn = Instant::now();
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean sessions lose subscriptions, so subscribe on every connect
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                            error!(error = %e, "mqtt_subscribe_failed");
                        } else {
                            info!(topic = %topic, "mqtt_ingest_subscribed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_ingest_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_report() {
        let json = r#"{
            "device_id": "worker-7",
            "latitude": 40.7128,
            "longitude": -74.0060,
            "accuracy": 4.5,
            "timestamp": 1700000000000
        }"#;

        let reports = parse_position_payload(json).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].device_id.as_deref(), Some("worker-7"));
        assert_eq!(reports[0].accuracy_m, Some(4.5));
        assert_eq!(reports[0].timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn test_parse_batch() {
        let json = r#"[
            {"device_id": "a", "latitude": 1.0, "longitude": 2.0, "accuracy_m": 3.0, "ts": 10},
            {"device_id": "b", "latitude": 1.5, "longitude": 2.5, "accuracy_m": 3.0, "ts": 11}
        ]"#;

        let reports = parse_position_payload(json).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].device_id.as_deref(), Some("b"));
        assert_eq!(reports[1].timestamp, Some(11));
    }

    #[test]
    fn test_missing_fields_parse_but_fail_validation() {
        let reports = parse_position_payload(r#"{"device_id": "a"}"#).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].clone().validate().is_err());
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(parse_position_payload("not json").is_err());
        assert!(parse_position_payload("42").is_err());
        assert!(parse_position_payload(r#"{"latitude": "north"}"#).is_err());
    }
}
