use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// What kind of event changed (or proposes to change) stock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementType {
    Initial,
    Sale,
    Purchase,
    ReturnCustomer,
    ReturnSupplier,
    Adjustment,
    Damage,
    TransferIn,
    TransferOut,
    Correction,
}

/// Review workflow state. Transitions exactly once, from `Pending` to either
/// `Approved` or `Rejected`; every other field of a movement is append-only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementStatus {
    Pending,
    Approved,
    Rejected,
}

/// One row of the audit trail. A `Pending` movement records intent only; its
/// stock effect lands when (and only when) it is approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    /// Product name at record time; survives later renames.
    pub product_name: String,
    pub movement_type: MovementType,
    /// Signed delta in base units.
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reason: Option<String>,
    pub notes: Option<String>,
    /// Groups movements created by one sale or transfer.
    pub transaction_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub performed_by_name: String,
    pub timestamp: DateTime<Utc>,
    pub status: MovementStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl StockMovement {
    pub fn is_pending(&self) -> bool {
        self.status == MovementStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_string_forms_match_the_ledger_format() {
        assert_eq!(MovementType::ReturnCustomer.to_string(), "return_customer");
        assert_eq!(MovementType::TransferIn.to_string(), "transfer_in");
        assert_eq!(
            "return_supplier".parse::<MovementType>().unwrap(),
            MovementType::ReturnSupplier
        );
    }

    #[test]
    fn serde_round_trips_snake_case() {
        let json = serde_json::to_string(&MovementStatus::Approved).unwrap();
        assert_eq!(json, "\"approved\"");
        let back: MovementStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MovementStatus::Approved);
    }
}
