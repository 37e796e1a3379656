use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sale::PaymentMethod;

/// Cash/shift ledger row appended when a sale completes immediately.
/// Deferred sales get theirs when they are settled, outside this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterEntry {
    pub id: Uuid,
    pub sale_id: Uuid,
    pub payment_method: PaymentMethod,
    pub amount: Decimal,
    pub recorded_at: DateTime<Utc>,
}
