//! MQTT alert publisher (QoS 1)

use crate::domain::types::AlertEvent;
use crate::infra::config::Config;
use crate::services::dispatcher::{AlertSink, SinkError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MqttSink {
    client: AsyncClient,
    topic: String,
}

impl MqttSink {
    /// Create the publisher and spawn its event loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: &Config, topic: &str) -> Self {
        let client_id = format!("geofence-alerts-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_alerts_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_alerts_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_alerts_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(topic = %topic, "mqtt_alert_sink_started");
        Self::with_client(client, topic)
    }

    fn with_client(client: AsyncClient, topic: &str) -> Self {
        Self { client, topic: topic.to_string() }
    }
}

#[async_trait]
impl AlertSink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    /// Queue the publish without waiting. A full request queue (broker
    /// unreachable) fails the attempt so the dispatcher can retry.
    async fn deliver(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let json = event.to_json()?;
        self.client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, json.into_bytes())
            .map_err(|e| SinkError::Mqtt(e.to_string()))
    }
}
