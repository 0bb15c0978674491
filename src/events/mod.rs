//! In-process domain events. Mutating operations emit an event after their
//! transaction commits; the consumer loop logs them and is the seam where
//! webhook/queue fan-out would hang off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::ledger_entry::MovementKind;
use crate::entities::reservation::OriginKind;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a connected sender/receiver pair with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StockMovementRecorded {
        entry_id: i64,
        organization_id: Uuid,
        product_id: Uuid,
        branch_id: Option<Uuid>,
        movement_kind: MovementKind,
        quantity: i32,
        resulting_stock: i32,
    },
    ReservationCreated {
        reservation_id: Uuid,
        organization_id: Uuid,
        product_id: Uuid,
        branch_id: Option<Uuid>,
        quantity: i32,
        origin_kind: OriginKind,
        expires_at: DateTime<Utc>,
    },
    ReservationConfirmed {
        reservation_id: Uuid,
        ledger_entry_id: i64,
        quantity: i32,
    },
    ReservationCanceled {
        reservation_id: Uuid,
        quantity: i32,
    },
    ReservationExtended {
        reservation_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    ReservationsExpired {
        organization_id: Option<Uuid>,
        count: u64,
    },
}

/// Consumer loop for domain events. Spawn once at startup.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockMovementRecorded {
                entry_id,
                product_id,
                quantity,
                resulting_stock,
                ..
            } => info!(
                entry_id = entry_id,
                product_id = %product_id,
                quantity = quantity,
                resulting_stock = resulting_stock,
                "Stock movement recorded"
            ),
            Event::ReservationCreated {
                reservation_id,
                product_id,
                quantity,
                expires_at,
                ..
            } => info!(
                reservation_id = %reservation_id,
                product_id = %product_id,
                quantity = quantity,
                expires_at = %expires_at,
                "Reservation created"
            ),
            Event::ReservationConfirmed {
                reservation_id,
                ledger_entry_id,
                ..
            } => info!(
                reservation_id = %reservation_id,
                ledger_entry_id = ledger_entry_id,
                "Reservation confirmed"
            ),
            Event::ReservationCanceled { reservation_id, .. } => {
                info!(reservation_id = %reservation_id, "Reservation canceled")
            }
            Event::ReservationExtended {
                reservation_id,
                expires_at,
            } => info!(
                reservation_id = %reservation_id,
                expires_at = %expires_at,
                "Reservation extended"
            ),
            Event::ReservationsExpired { count, .. } => {
                if *count > 0 {
                    info!(count = count, "Reservations expired by sweeper");
                } else {
                    debug!("Sweep pass found nothing to expire");
                }
            }
        }
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (sender, mut rx) = channel(8);
        sender
            .send(Event::ReservationsExpired {
                organization_id: None,
                count: 3,
            })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            Event::ReservationsExpired { count, .. } => assert_eq!(count, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
