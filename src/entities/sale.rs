use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A claim of units against one specific batch. Carried by the sale line
/// that consumed it so the claim can later be reversed by a stock return.
/// Pure value type; it has no lifecycle of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub batch_id: Uuid,
    pub quantity: i64,
    pub expiry_date: NaiveDate,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SaleStatus {
    /// Paid and handed over; hits the register immediately.
    Completed,
    /// Deferred order (e.g. on-account); no register entry yet.
    Pending,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Mobile,
    OnAccount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: Uuid,
    pub product_name: String,
    /// Quantity as entered at the till.
    pub quantity: i64,
    pub is_base_unit: bool,
    /// Quantity converted to base units.
    pub units: i64,
    pub unit_price: Decimal,
    pub allocations: Vec<BatchAllocation>,
}

impl SaleLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: SaleStatus,
    pub payment_method: PaymentMethod,
    pub total: Decimal,
    pub cashier_id: Option<Uuid>,
    pub cashier_name: String,
    pub lines: Vec<SaleLine>,
}
