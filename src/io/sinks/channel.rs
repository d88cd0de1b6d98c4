//! In-process alert consumer queue
//!
//! Hands delivered alerts to an in-process consumer (dashboard feed,
//! push transport, tests).

use crate::domain::types::AlertEvent;
use crate::services::dispatcher::{AlertSink, SinkError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// How long a delivery waits for room in a full consumer queue
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ChannelSink {
    tx: mpsc::Sender<AlertEvent>,
    send_timeout: Duration,
}

impl ChannelSink {
    /// Create a sink and the receiver its consumer reads from
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<AlertEvent>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        (Self { tx, send_timeout: DEFAULT_SEND_TIMEOUT }, rx)
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }
}

#[async_trait]
impl AlertSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), SinkError> {
        match self.tx.send_timeout(event.clone(), self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SinkError::Timeout(self.send_timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}
