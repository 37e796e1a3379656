use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    clock::Clock,
    entities::{BatchAllocation, BatchStatus, NewBatch, StockBatch},
    errors::StockError,
    store::{collections, TypedStore},
};

/// Exclusive owner of the stock batch collection.
///
/// The substrate is whole-collection read/replace with no locking of its
/// own, so every mutation here runs as a [`TypedStore::update`] cycle under
/// the collection mutex; writers on different products still serialize
/// because they rewrite the same collection. Batches are never deleted on
/// the hot path: at quantity zero they become `Depleted` tombstones and only
/// [`BatchStore::prune_depleted`] removes them.
#[derive(Clone)]
pub struct BatchStore {
    store: TypedStore,
    clock: Arc<dyn Clock>,
}

impl BatchStore {
    pub fn new(store: TypedStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn read_all(&self) -> Result<Vec<StockBatch>, StockError> {
        self.store.read(collections::STOCK_BATCHES).await
    }

    /// All batches, tombstones included. Callers filter explicitly.
    pub async fn list_batches(&self) -> Result<Vec<StockBatch>, StockError> {
        self.read_all().await
    }

    pub async fn batches_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<StockBatch>, StockError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|b| b.product_id == product_id)
            .collect())
    }

    pub async fn get_batch(&self, batch_id: Uuid) -> Result<Option<StockBatch>, StockError> {
        Ok(self.read_all().await?.into_iter().find(|b| b.id == batch_id))
    }

    #[instrument(skip(self, new), fields(product_id = %new.product_id, quantity = new.quantity))]
    pub async fn create_batch(&self, new: NewBatch) -> Result<StockBatch, StockError> {
        if new.quantity < 0 {
            return Err(StockError::InvalidQuantity(format!(
                "batch quantity must not be negative, got {}",
                new.quantity
            )));
        }

        let now = self.clock.now();
        let batch = StockBatch {
            id: Uuid::now_v7(),
            product_id: new.product_id,
            quantity: new.quantity,
            expiry_date: new.expiry_date,
            cost_price: new.cost_price,
            source_ref: new.source_ref,
            batch_number: new.batch_number,
            received_date: new.received_date,
            status: if new.quantity > 0 {
                BatchStatus::Active
            } else {
                BatchStatus::Depleted
            },
            depleted_at: if new.quantity > 0 { None } else { Some(now) },
            created_at: now,
        };

        let stored = batch.clone();
        self.store
            .update::<Vec<StockBatch>, _, _>(collections::STOCK_BATCHES, move |batches| {
                batches.push(stored);
                Ok(())
            })
            .await?;

        info!(batch_id = %batch.id, expiry = %batch.expiry_date, "batch created");
        Ok(batch)
    }

    /// Apply a signed delta to one batch, clamping the result at zero.
    ///
    /// At exactly zero the batch becomes a `Depleted` tombstone (stamped with
    /// the clock's now) and the tombstoned record is returned so the caller
    /// can still read its final state. A positive delta on a tombstone
    /// revives it to `Active`. Unknown batch ids yield `Ok(None)`.
    #[instrument(skip(self))]
    pub async fn adjust_quantity(
        &self,
        batch_id: Uuid,
        delta: i64,
    ) -> Result<Option<StockBatch>, StockError> {
        let now = self.clock.now();
        self.store
            .update::<Vec<StockBatch>, _, _>(collections::STOCK_BATCHES, move |batches| {
                let Some(batch) = batches.iter_mut().find(|b| b.id == batch_id) else {
                    return Ok(None);
                };

                let new_quantity = (batch.quantity + delta).max(0);
                batch.quantity = new_quantity;
                if new_quantity == 0 {
                    batch.status = BatchStatus::Depleted;
                    batch.depleted_at = Some(now);
                } else if batch.status == BatchStatus::Depleted {
                    batch.status = BatchStatus::Active;
                    batch.depleted_at = None;
                    debug!(batch_id = %batch_id, "depleted batch revived by return");
                }

                Ok(Some(batch.clone()))
            })
            .await
    }

    /// Commit a planned FEFO decrement set atomically under the collection
    /// mutex. Re-reads the collection, verifies each planned batch still
    /// holds at least the planned quantity, then applies every decrement and
    /// writes once. A verification miss means a concurrent writer got
    /// between plan and commit; the caller re-plans on `Conflict`, and the
    /// `update` closure's error path guarantees nothing was written.
    #[instrument(skip(self, allocations), fields(product_id = %product_id, count = allocations.len()))]
    pub async fn apply_allocations(
        &self,
        product_id: Uuid,
        allocations: &[BatchAllocation],
    ) -> Result<(), StockError> {
        let allocations = allocations.to_vec();
        let now = self.clock.now();
        self.store
            .update::<Vec<StockBatch>, _, _>(collections::STOCK_BATCHES, move |batches| {
                for allocation in &allocations {
                    let holds = batches
                        .iter()
                        .find(|b| b.id == allocation.batch_id)
                        .map(|b| b.is_active() && b.quantity >= allocation.quantity)
                        .unwrap_or(false);
                    if !holds {
                        return Err(StockError::Conflict(format!(
                            "batch {} no longer holds {} units",
                            allocation.batch_id, allocation.quantity
                        )));
                    }
                }

                for allocation in &allocations {
                    if let Some(batch) = batches.iter_mut().find(|b| b.id == allocation.batch_id)
                    {
                        batch.quantity -= allocation.quantity;
                        if batch.quantity == 0 {
                            batch.status = BatchStatus::Depleted;
                            batch.depleted_at = Some(now);
                        }
                    }
                }
                Ok(())
            })
            .await
    }

    /// Sum of live batch quantities for a product.
    pub async fn total_stock(&self, product_id: Uuid) -> Result<i64, StockError> {
        Ok(self
            .batches_for_product(product_id)
            .await?
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.quantity)
            .sum())
    }

    /// Minimum expiry among batches with stock remaining.
    pub async fn earliest_expiry(
        &self,
        product_id: Uuid,
    ) -> Result<Option<NaiveDate>, StockError> {
        Ok(self
            .batches_for_product(product_id)
            .await?
            .iter()
            .filter(|b| b.quantity > 0)
            .map(|b| b.expiry_date)
            .min())
    }

    /// Garbage-collect depleted tombstones older than the retention window.
    /// Returns from sales taken before the tombstone was pruned can no
    /// longer find their target afterwards, so this never runs on the hot
    /// path; hosts schedule it deliberately.
    #[instrument(skip(self))]
    pub async fn prune_depleted(&self, retention: Duration) -> Result<usize, StockError> {
        let cutoff = self.clock.now() - retention;
        let pruned = self
            .store
            .update::<Vec<StockBatch>, _, _>(collections::STOCK_BATCHES, move |batches| {
                let before = batches.len();
                batches.retain(|b| match (b.status, b.depleted_at) {
                    (BatchStatus::Depleted, Some(depleted_at)) => depleted_at > cutoff,
                    _ => true,
                });
                Ok(before - batches.len())
            })
            .await?;
        if pruned > 0 {
            info!(pruned, "depleted batch tombstones pruned");
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::InMemoryStore;
    use rust_decimal_macros::dec;

    fn store() -> BatchStore {
        let clock = FixedClock::at_date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        BatchStore::new(
            TypedStore::new(Arc::new(InMemoryStore::new())),
            Arc::new(clock),
        )
    }

    fn new_batch(product_id: Uuid, quantity: i64, expiry: (i32, u32, u32)) -> NewBatch {
        NewBatch {
            product_id,
            quantity,
            expiry_date: NaiveDate::from_ymd_opt(expiry.0, expiry.1, expiry.2).unwrap(),
            cost_price: dec!(2.00),
            source_ref: None,
            batch_number: None,
            received_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn adjust_clamps_at_zero_and_tombstones() {
        let store = store();
        let product_id = Uuid::now_v7();
        let batch = store
            .create_batch(new_batch(product_id, 5, (2025, 1, 1)))
            .await
            .unwrap();

        let updated = store.adjust_quantity(batch.id, -8).await.unwrap().unwrap();
        assert_eq!(updated.quantity, 0);
        assert_eq!(updated.status, BatchStatus::Depleted);
        assert!(updated.depleted_at.is_some());

        // Tombstone stays findable and revives on a positive delta.
        let revived = store.adjust_quantity(batch.id, 3).await.unwrap().unwrap();
        assert_eq!(revived.quantity, 3);
        assert_eq!(revived.status, BatchStatus::Active);
        assert!(revived.depleted_at.is_none());
    }

    #[tokio::test]
    async fn unknown_batch_adjust_is_none() {
        let store = store();
        assert!(store
            .adjust_quantity(Uuid::now_v7(), 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn totals_ignore_tombstones() {
        let store = store();
        let product_id = Uuid::now_v7();
        let b1 = store
            .create_batch(new_batch(product_id, 5, (2025, 1, 1)))
            .await
            .unwrap();
        store
            .create_batch(new_batch(product_id, 10, (2025, 6, 1)))
            .await
            .unwrap();

        store.adjust_quantity(b1.id, -5).await.unwrap();
        assert_eq!(store.total_stock(product_id).await.unwrap(), 10);
        assert_eq!(
            store.earliest_expiry(product_id).await.unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 1)
        );
    }

    #[tokio::test]
    async fn apply_allocations_conflicts_on_stale_plan() {
        let store = store();
        let product_id = Uuid::now_v7();
        let batch = store
            .create_batch(new_batch(product_id, 5, (2025, 1, 1)))
            .await
            .unwrap();

        let plan = vec![BatchAllocation {
            batch_id: batch.id,
            quantity: 5,
            expiry_date: batch.expiry_date,
        }];

        // A writer slips in after the plan was computed.
        store.adjust_quantity(batch.id, -2).await.unwrap();

        let err = store.apply_allocations(product_id, &plan).await.unwrap_err();
        assert!(err.is_retryable());
        // Nothing was applied.
        assert_eq!(store.total_stock(product_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn prune_respects_retention() {
        let clock = FixedClock::at_date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let store = BatchStore::new(
            TypedStore::new(Arc::new(InMemoryStore::new())),
            Arc::new(clock.clone()),
        );
        let product_id = Uuid::now_v7();
        let batch = store
            .create_batch(new_batch(product_id, 2, (2025, 1, 1)))
            .await
            .unwrap();
        store.adjust_quantity(batch.id, -2).await.unwrap();

        // Inside the retention window: kept.
        assert_eq!(store.prune_depleted(Duration::days(30)).await.unwrap(), 0);

        clock.advance(chrono::Duration::days(31));
        assert_eq!(store.prune_depleted(Duration::days(30)).await.unwrap(), 1);
        assert!(store.get_batch(batch.id).await.unwrap().is_none());
    }
}
