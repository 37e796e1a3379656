use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle of a batch. A batch whose quantity reaches exactly zero is not
/// deleted; it becomes a `Depleted` tombstone so a later return can still
/// find it. Tombstones are removed only by the explicit garbage-collection
/// pass in the batch store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Depleted,
}

/// A discrete lot of a product: one expiry date, one quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockBatch {
    pub id: Uuid,
    pub product_id: Uuid,
    /// Base units remaining; never negative.
    pub quantity: i64,
    pub expiry_date: NaiveDate,
    pub cost_price: Decimal,
    /// Reference to whatever created the batch (purchase id, migration tag).
    pub source_ref: Option<String>,
    /// Free-text lot label from the supplier.
    pub batch_number: Option<String>,
    pub received_date: NaiveDate,
    pub status: BatchStatus,
    pub depleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StockBatch {
    pub fn is_active(&self) -> bool {
        self.status == BatchStatus::Active
    }

    /// Allocatable "now": live, holding stock, and strictly unexpired.
    pub fn is_allocatable(&self, today: NaiveDate) -> bool {
        self.is_active() && self.quantity > 0 && self.expiry_date > today
    }
}

/// Fields a caller supplies when receiving stock; the store assigns the id,
/// status and timestamps.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub product_id: Uuid,
    pub quantity: i64,
    pub expiry_date: NaiveDate,
    pub cost_price: Decimal,
    pub source_ref: Option<String>,
    pub batch_number: Option<String>,
    pub received_date: NaiveDate,
}
