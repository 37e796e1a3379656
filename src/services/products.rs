use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    clock::Clock,
    entities::{Product, StockBatch},
    errors::StockError,
    services::batch_store::BatchStore,
    store::{collections, TypedStore},
};

/// Owner of the denormalized [`Product`] aggregate.
///
/// `stock` and `earliest_expiry` are always recomputed from the batch store,
/// never decremented in place, so the aggregate invariant survives any
/// sequence of allocations, returns and adjustments.
#[derive(Clone)]
pub struct ProductCatalog {
    store: TypedStore,
    batch_store: BatchStore,
    clock: Arc<dyn Clock>,
}

impl ProductCatalog {
    pub fn new(store: TypedStore, batch_store: BatchStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            batch_store,
            clock,
        }
    }

    async fn read_all(&self) -> Result<Vec<Product>, StockError> {
        self.store.read(collections::PRODUCTS).await
    }

    pub async fn list(&self) -> Result<Vec<Product>, StockError> {
        self.read_all().await
    }

    pub async fn get(&self, product_id: Uuid) -> Result<Option<Product>, StockError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|p| p.id == product_id))
    }

    pub async fn require(&self, product_id: Uuid) -> Result<Product, StockError> {
        self.get(product_id)
            .await?
            .ok_or(StockError::ProductNotFound(product_id))
    }

    /// Insert or replace a product record.
    pub async fn upsert(&self, product: Product) -> Result<(), StockError> {
        self.store
            .update::<Vec<Product>, _, _>(collections::PRODUCTS, move |products| {
                match products.iter_mut().find(|p| p.id == product.id) {
                    Some(existing) => *existing = product,
                    None => products.push(product),
                }
                Ok(())
            })
            .await
    }

    /// Recompute `stock` and `earliest_expiry` from the batch store and
    /// persist the product. Called after every applied stock delta. The
    /// collection mutex is held across the recompute as well as the write:
    /// concurrent refreshes serialize, and whichever runs last reads batch
    /// totals at least as fresh as any it overwrites.
    #[instrument(skip(self))]
    pub async fn refresh_summary(&self, product_id: Uuid) -> Result<Product, StockError> {
        let lock = self.store.collection_lock(collections::PRODUCTS);
        let _guard = lock.lock().await;

        let stock = self.batch_store.total_stock(product_id).await?;
        let earliest_expiry = self.batch_store.earliest_expiry(product_id).await?;

        let mut products = self.read_all().await?;
        let product = products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or(StockError::ProductNotFound(product_id))?;
        product.stock = stock;
        product.earliest_expiry = earliest_expiry;
        product.updated_at = self.clock.now();
        let refreshed = product.clone();

        self.store.write(collections::PRODUCTS, &products).await?;
        debug!(stock, "product summary refreshed");
        Ok(refreshed)
    }

    /// The "expiring soon" report: live batches that are still sellable
    /// today but expire within the window, soonest first, paired with their
    /// product record. Already-expired lots are a disposal problem, not an
    /// expiry warning, and are left out.
    pub async fn expiring_within(
        &self,
        days: u32,
    ) -> Result<Vec<(Product, StockBatch)>, StockError> {
        let today = self.clock.today();
        let horizon = today + Duration::days(i64::from(days));
        let products = self.read_all().await?;

        let mut rows: Vec<(Product, StockBatch)> = self
            .batch_store
            .list_batches()
            .await?
            .into_iter()
            .filter(|b| {
                b.is_active()
                    && b.quantity > 0
                    && b.expiry_date > today
                    && b.expiry_date <= horizon
            })
            .filter_map(|batch| {
                products
                    .iter()
                    .find(|p| p.id == batch.product_id)
                    .cloned()
                    .map(|product| (product, batch))
            })
            .collect();
        rows.sort_by_key(|(_, batch)| (batch.expiry_date, batch.id));
        Ok(rows)
    }
}
