//! Bounded queue between the evaluator and the alert dispatcher
//!
//! The evaluator never waits on dispatch: `send` uses `try_send` and a full
//! queue drops the event and counts it.

use crate::domain::types::AlertEvent;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Sender handle for alert events
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, events are dropped.
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<AlertEvent>,
    metrics: Arc<Metrics>,
}

impl AlertSender {
    pub fn new(tx: mpsc::Sender<AlertEvent>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Enqueue an alert. Returns false if it was dropped.
    pub fn send(&self, event: AlertEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics.record_alert_enqueued();
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.record_alert_queue_full();
                warn!(
                    device_id = %event.device_id,
                    zone_id = %event.zone_id,
                    kind = %event.kind,
                    "alert_queue_full"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.metrics.record_alert_queue_full();
                warn!(device_id = %event.device_id, zone_id = %event.zone_id, "alert_queue_closed");
                false
            }
        }
    }

    /// Events waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Create a new alert channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_alert_channel(
    capacity: usize,
    metrics: Arc<Metrics>,
) -> (AlertSender, mpsc::Receiver<AlertEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AlertSender::new(tx, metrics), rx)
}
