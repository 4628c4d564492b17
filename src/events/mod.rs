use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Events emitted after an allocation transaction has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ReservationsCommitted {
        order_id: Uuid,
        reservation_ids: Vec<Uuid>,
        shortage_lines: usize,
    },
    ReservationConfirmed {
        reservation_id: Uuid,
        lot_id: i64,
        sap_document_no: Option<String>,
    },
    ReservationReleased {
        reservation_id: Uuid,
        lot_id: i64,
        quantity: Decimal,
    },
    ReservationPreempted {
        reservation_id: Uuid,
        lot_id: i64,
        freed: Decimal,
        remaining: Decimal,
        preempted_by: Uuid,
    },
    GatewayRegistrationFailed {
        reservation_id: Uuid,
        message: String,
        at: DateTime<Utc>,
    },
}

/// Publisher handed to the engine at construction.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }
}

#[async_trait]
impl EventPublisher for EventSender {
    async fn publish(&self, event: Event) -> Result<(), ServiceError> {
        self.send(event).await
    }
}

/// Discards every event. For callers that do not observe allocation events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _event: Event) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Publishes every event, logging failures. The state change is already committed, so a
/// lost notification is not a reason to fail the caller.
pub async fn publish_all(publisher: &dyn EventPublisher, events: Vec<Event>) {
    for event in events {
        if let Err(e) = publisher.publish(event).await {
            warn!(error = %e, "Failed to publish allocation event");
        }
    }
}

/// Drains the event channel, logging each event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        info!(event = ?event, "Allocation event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_delivers_to_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();
        sender
            .publish(Event::ReservationReleased {
                reservation_id: id,
                lot_id: 3,
                quantity: Decimal::ONE,
            })
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(Event::ReservationReleased {
                reservation_id: id,
                lot_id: 3,
                quantity: Decimal::ONE
            })
        );
    }

    #[tokio::test]
    async fn closed_channel_is_an_event_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = EventSender::new(tx)
            .send(Event::ReservationReleased {
                reservation_id: Uuid::new_v4(),
                lot_id: 1,
                quantity: Decimal::ONE,
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "event_error");
    }

    #[tokio::test]
    async fn closed_channel_does_not_panic_publish_all() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        publish_all(
            &sender,
            vec![Event::GatewayRegistrationFailed {
                reservation_id: Uuid::new_v4(),
                message: "down".into(),
                at: Utc::now(),
            }],
        )
        .await;
    }
}
