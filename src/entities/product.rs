use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Product aggregate. `stock` and `earliest_expiry` are denormalized from
/// the product's batches; after any successful commit `stock` equals the
/// summed quantity of the product's live batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    /// Base units per retail pack; pack-quantity sale lines multiply by this.
    pub units_per_pack: u32,
    /// Denormalized sum of live batch quantities, in base units.
    pub stock: i64,
    pub earliest_expiry: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(name: impl Into<String>, units_per_pack: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            units_per_pack: units_per_pack.max(1),
            stock: 0,
            earliest_expiry: None,
            updated_at: now,
        }
    }

    /// Convert a requested sale quantity to base units.
    pub fn to_base_units(&self, quantity: i64, is_base_unit: bool) -> i64 {
        if is_base_unit {
            quantity
        } else {
            quantity * i64::from(self.units_per_pack)
        }
    }
}
