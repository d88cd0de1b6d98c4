//! IO modules - external system interfaces
//!
//! - `mqtt_ingest` - MQTT subscriber feeding position reports to the evaluator
//! - `alert_channel` - bounded queue between the evaluator and the dispatcher
//! - `sinks` - alert delivery targets (JSONL, MQTT, webhook, in-process)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod alert_channel;
pub mod mqtt_ingest;
pub mod prometheus;
pub mod sinks;

// Re-export commonly used types
pub use alert_channel::{create_alert_channel, AlertSender};
pub use sinks::{ChannelSink, JsonlSink, MqttSink, WebhookSink};
