//! Alert sink implementations
//!
//! - `jsonl` - append-only JSON lines alert log
//! - `mqtt` - QoS 1 publish to an MQTT topic
//! - `webhook` - HTTP POST of the alert JSON
//! - `channel` - in-process consumer queue

pub mod channel;
pub mod jsonl;
pub mod mqtt;
pub mod webhook;

pub use channel::ChannelSink;
pub use jsonl::JsonlSink;
pub use mqtt::MqttSink;
pub use webhook::WebhookSink;

use crate::infra::config::Config;
use crate::services::dispatcher::AlertSink;
use tracing::info;

/// Build the sinks enabled in the configuration
///
/// Must be called from within a tokio runtime when an MQTT topic is set.
pub fn sinks_from_config(config: &Config) -> anyhow::Result<Vec<Box<dyn AlertSink>>> {
    let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();

    if let Some(path) = config.alerts_jsonl_file() {
        sinks.push(Box::new(JsonlSink::new(path)));
    }
    if let Some(url) = config.webhook_url() {
        sinks.push(Box::new(WebhookSink::new(url, config.webhook_timeout())?));
    }
    if let Some(topic) = config.alerts_mqtt_topic() {
        sinks.push(Box::new(MqttSink::connect(config, topic)));
    }

    info!(sinks = %sinks.len(), "alert_sinks_configured");
    Ok(sinks)
}
