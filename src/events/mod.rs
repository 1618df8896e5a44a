use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Events emitted by the ledger subsystem after a transaction commits.
///
/// Emission is best-effort: a full or closed channel never fails the
/// operation that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    MovementRecorded {
        material_id: Uuid,
        movement_id: Uuid,
        movement_type: String,
        quantity: Decimal,
        qty_on_hand: Decimal,
    },
    MovementReversed {
        material_id: Uuid,
        movement_id: Uuid,
        qty_on_hand: Decimal,
    },
    PurchaseReceiptApplied {
        purchase_id: Uuid,
        material_id: Uuid,
        movement_id: Uuid,
        quantity: Decimal,
    },
    PurchaseReceiptReversed {
        purchase_id: Uuid,
        material_id: Uuid,
        movement_id: Uuid,
        quantity: Decimal,
    },
    PurchaseStatusChanged {
        purchase_id: Uuid,
        old_status: String,
        new_status: String,
    },
    StockDriftDetected {
        material_id: Uuid,
        cached: Decimal,
        computed: Decimal,
        detected_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and logs instead of failing when the channel is
    /// unavailable. Ledger operations use this after commit.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}
