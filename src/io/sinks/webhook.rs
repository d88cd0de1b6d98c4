//! HTTP webhook alert sink

use crate::domain::types::AlertEvent;
use crate::services::dispatcher::{AlertSink, SinkError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SinkError> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Http(e.to_string()))?;
        info!(url = %url, timeout_ms = %timeout.as_millis(), "webhook_sink_initialized");
        Ok(Self { url: url.to_string(), client })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let body = event.to_json()?;
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AlertKind, DeviceId, Severity, ZoneId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    fn event() -> AlertEvent {
        AlertEvent {
            alert_id: Uuid::now_v7(),
            device_id: DeviceId::new("dev-1"),
            zone_id: ZoneId::new("hazard"),
            zone_name: "Hazard".to_string(),
            kind: AlertKind::Enter,
            severity: Severity::High,
            timestamp: 1,
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    /// Answer one request with the given status line and return the raw request
    async fn one_shot_server(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/alerts", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = String::new();
            // Read until the JSON body is complete
            while !request.contains("\r\n\r\n") || !request.trim_end().ends_with('}') {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
            let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).await.unwrap();
            request
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_posts_json_body() {
        let (url, server) = one_shot_server("200 OK").await;
        let sink = WebhookSink::new(&url, Duration::from_secs(5)).unwrap();

        sink.deliver(&event()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /alerts"));
        assert!(request.to_lowercase().contains("content-type: application/json"));
        assert!(request.contains("\"zone_id\":\"hazard\""));
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure() {
        let (url, server) = one_shot_server("503 Service Unavailable").await;
        let sink = WebhookSink::new(&url, Duration::from_secs(5)).unwrap();

        let err = sink.deliver(&event()).await.unwrap_err();
        assert!(matches!(err, SinkError::Status(503)));
        server.await.unwrap();
    }
}
