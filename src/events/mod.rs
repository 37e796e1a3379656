use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted after a state change has been committed to the substrate.
/// Consumers (notification fan-out, loyalty computation, dashboards) hang
/// off the channel; the engine itself only logs them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    BatchReceived {
        batch_id: Uuid,
        product_id: Uuid,
        quantity: i64,
    },
    StockAllocated {
        product_id: Uuid,
        quantity: i64,
        batches: Vec<Uuid>,
    },
    StockReturned {
        restored_units: i64,
        lost_units: i64,
    },
    MovementRecorded {
        movement_id: Uuid,
        product_id: Uuid,
        quantity: i64,
        status: String,
    },
    MovementApproved {
        movement_id: Uuid,
        reviewed_by: Option<Uuid>,
    },
    MovementRejected {
        movement_id: Uuid,
        reviewed_by: Option<Uuid>,
    },
    SaleCompleted {
        sale_id: Uuid,
        total: Decimal,
        line_count: usize,
        timestamp: DateTime<Utc>,
    },
    SaleRolledBack {
        failed_line: usize,
        product_id: Uuid,
        reason: String,
    },
    FlatStockMigrated {
        product_id: Uuid,
        batch_id: Uuid,
        quantity: i64,
    },
    DepletedBatchesPruned {
        pruned: usize,
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

    /// Bounded-buffer channel pair; spawn [`process_events`] on the receiver.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Send an event without letting channel failure derail the caller.
    /// Committed state changes must not be unwound because a consumer fell
    /// behind; the failure is logged instead.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event channel full or closed; dropping event");
        }
    }
}

/// Drain loop for the engine's event channel. The library ships a logging
/// drain; hosts that need fan-out replace this with their own consumer.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("event processing loop started");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::SaleCompleted {
                sale_id,
                total,
                line_count,
                ..
            } => {
                info!(sale_id = %sale_id, total = %total, line_count, "sale committed");
            }
            Event::SaleRolledBack {
                failed_line,
                product_id,
                reason,
            } => {
                warn!(failed_line, product_id = %product_id, reason = %reason, "sale rolled back");
            }
            Event::StockReturned { lost_units, .. } if *lost_units > 0 => {
                warn!(lost_units, "stock return lost units to pruned batches");
            }
            other => {
                info!(event = ?other, "stock event");
            }
        }
    }
    info!("event processing loop stopped");
}
