use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{consts as perm, Actor, PermissionOracle},
    clock::Clock,
    config::EngineConfig,
    entities::{MovementType, NewBatch, StockBatch, StockMovement},
    errors::StockError,
    events::{Event, EventSender},
    services::{
        batch_store::BatchStore,
        movement_ledger::{MovementLedger, NewMovement},
        products::ProductCatalog,
    },
};

#[derive(Debug, Clone, Validate)]
pub struct ReceiveStock {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub expiry_date: NaiveDate,
    pub cost_price: Decimal,
    #[validate(length(max = 100))]
    pub source_ref: Option<String>,
    #[validate(length(max = 100))]
    pub batch_number: Option<String>,
}

#[derive(Debug, Clone, Validate)]
pub struct AdjustBatch {
    pub batch_id: Uuid,
    /// Signed delta in base units.
    pub delta: i64,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Clone, Validate)]
pub struct WriteOff {
    pub batch_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i64,
    /// `Damage` or `Correction`; anything else is rejected.
    pub movement_type: MovementType,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Orchestration for the ad-hoc stock flows outside the sale path: purchase
/// receipts, manual batch adjustments, write-offs and the one-time migration
/// of legacy flat stock into batches. All of them leave their audit trail in
/// the [`MovementLedger`].
#[derive(Clone)]
pub struct StockAdjustmentService {
    batch_store: BatchStore,
    catalog: ProductCatalog,
    ledger: MovementLedger,
    oracle: Arc<dyn PermissionOracle>,
    clock: Arc<dyn Clock>,
    events: EventSender,
    config: EngineConfig,
}

impl StockAdjustmentService {
    pub fn new(
        batch_store: BatchStore,
        catalog: ProductCatalog,
        ledger: MovementLedger,
        oracle: Arc<dyn PermissionOracle>,
        clock: Arc<dyn Clock>,
        events: EventSender,
        config: EngineConfig,
    ) -> Self {
        Self {
            batch_store,
            catalog,
            ledger,
            oracle,
            clock,
            events,
            config,
        }
    }

    /// Receive a purchase delivery: create the batch and record an approved
    /// `Purchase` movement referencing it. Requires `stock:receive`.
    #[instrument(skip(self, receive, actor), fields(product_id = %receive.product_id, actor = %actor.name))]
    pub async fn receive_stock(
        &self,
        receive: ReceiveStock,
        actor: &Actor,
    ) -> Result<StockBatch, StockError> {
        receive.validate()?;
        if !self.oracle.can(&actor.role, perm::STOCK_RECEIVE) {
            return Err(StockError::Forbidden(format!(
                "role '{}' may not receive stock",
                actor.role
            )));
        }
        self.catalog.require(receive.product_id).await?;

        let previous_stock = self.batch_store.total_stock(receive.product_id).await?;
        let batch = self
            .batch_store
            .create_batch(NewBatch {
                product_id: receive.product_id,
                quantity: receive.quantity,
                expiry_date: receive.expiry_date,
                cost_price: receive.cost_price,
                source_ref: receive.source_ref.clone(),
                batch_number: receive.batch_number.clone(),
                received_date: self.clock.today(),
            })
            .await?;
        self.catalog.refresh_summary(receive.product_id).await?;

        // The batch already carries the received units; record the movement
        // as applied so the ledger does not add them again.
        self.ledger
            .record_applied(
                NewMovement {
                    product_id: receive.product_id,
                    movement_type: MovementType::Purchase,
                    quantity: receive.quantity,
                    reason: receive.source_ref,
                    notes: None,
                    transaction_id: None,
                    batch_id: Some(batch.id),
                },
                actor,
                previous_stock,
                previous_stock + receive.quantity,
            )
            .await?;

        info!(batch_id = %batch.id, quantity = receive.quantity, "stock received");
        self.events
            .send_or_log(Event::BatchReceived {
                batch_id: batch.id,
                product_id: receive.product_id,
                quantity: receive.quantity,
            })
            .await;
        Ok(batch)
    }

    /// Manual signed adjustment against one batch, routed through the
    /// ledger's approval gate. An approver's adjustment applies immediately;
    /// anyone else's waits in the review queue and touches nothing yet.
    #[instrument(skip(self, adjust, actor), fields(batch_id = %adjust.batch_id, actor = %actor.name))]
    pub async fn adjust_batch(
        &self,
        adjust: AdjustBatch,
        actor: &Actor,
    ) -> Result<StockMovement, StockError> {
        adjust.validate()?;
        if adjust.delta == 0 {
            return Err(StockError::InvalidQuantity(
                "adjustment delta must be non-zero".into(),
            ));
        }
        let batch = self
            .batch_store
            .get_batch(adjust.batch_id)
            .await?
            .ok_or(StockError::BatchNotFound(adjust.batch_id))?;

        self.ledger
            .record(
                NewMovement {
                    product_id: batch.product_id,
                    movement_type: MovementType::Adjustment,
                    quantity: adjust.delta,
                    reason: Some(adjust.reason),
                    notes: None,
                    transaction_id: None,
                    batch_id: Some(adjust.batch_id),
                },
                actor,
            )
            .await
    }

    /// Damage or correction write-off: a negative adjustment with its own
    /// movement type, same approval gating as [`adjust_batch`].
    ///
    /// [`adjust_batch`]: StockAdjustmentService::adjust_batch
    #[instrument(skip(self, write_off, actor), fields(batch_id = %write_off.batch_id, actor = %actor.name))]
    pub async fn write_off(
        &self,
        write_off: WriteOff,
        actor: &Actor,
    ) -> Result<StockMovement, StockError> {
        write_off.validate()?;
        if !matches!(
            write_off.movement_type,
            MovementType::Damage | MovementType::Correction
        ) {
            return Err(StockError::InvalidStatus(format!(
                "write-offs must be damage or correction, got {}",
                write_off.movement_type
            )));
        }
        let batch = self
            .batch_store
            .get_batch(write_off.batch_id)
            .await?
            .ok_or(StockError::BatchNotFound(write_off.batch_id))?;

        self.ledger
            .record(
                NewMovement {
                    product_id: batch.product_id,
                    movement_type: write_off.movement_type,
                    quantity: -write_off.quantity,
                    reason: Some(write_off.reason),
                    notes: None,
                    transaction_id: None,
                    batch_id: Some(write_off.batch_id),
                },
                actor,
            )
            .await
    }

    /// Fold a legacy product's flat `stock` count into one synthetic
    /// `Initial` batch so everything downstream can assume batches exist.
    /// Idempotent: products that already have batches (or no stock) return
    /// `Ok(None)`. The synthetic expiry is a config-driven shelf life from
    /// today, not a real date; pharmacists correct it from the batch screen.
    #[instrument(skip(self))]
    pub async fn migrate_flat_stock(
        &self,
        product_id: Uuid,
    ) -> Result<Option<StockBatch>, StockError> {
        let product = self.catalog.require(product_id).await?;
        if !self
            .batch_store
            .batches_for_product(product_id)
            .await?
            .is_empty()
        {
            return Ok(None);
        }
        if product.stock <= 0 {
            return Ok(None);
        }

        let actor = Actor::system();
        let expiry = self.clock.today() + self.config.migration_shelf_life();
        let batch = self
            .batch_store
            .create_batch(NewBatch {
                product_id,
                quantity: product.stock,
                expiry_date: expiry,
                cost_price: Decimal::ZERO,
                source_ref: Some("flat stock migration".into()),
                batch_number: None,
                received_date: self.clock.today(),
            })
            .await?;
        self.catalog.refresh_summary(product_id).await?;

        self.ledger
            .record_applied(
                NewMovement {
                    product_id,
                    movement_type: MovementType::Initial,
                    quantity: product.stock,
                    reason: Some("flat stock migration".into()),
                    notes: None,
                    transaction_id: None,
                    batch_id: Some(batch.id),
                },
                &actor,
                product.stock,
                product.stock,
            )
            .await?;

        info!(product_id = %product_id, batch_id = %batch.id, quantity = product.stock, "flat stock migrated");
        self.events
            .send_or_log(Event::FlatStockMigrated {
                product_id,
                batch_id: batch.id,
                quantity: product.stock,
            })
            .await;
        Ok(Some(batch))
    }

    /// Garbage-collect depleted batch tombstones older than the configured
    /// retention window.
    #[instrument(skip(self))]
    pub async fn prune_depleted(&self) -> Result<usize, StockError> {
        let pruned = self
            .batch_store
            .prune_depleted(self.config.depleted_retention())
            .await?;
        if pruned > 0 {
            self.events
                .send_or_log(Event::DepletedBatchesPruned { pruned })
                .await;
        }
        Ok(pruned)
    }
}
