use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    auth::{consts as perm, Actor, PermissionOracle},
    clock::Clock,
    entities::{MovementStatus, MovementType, StockMovement},
    errors::StockError,
    events::{Event, EventSender},
    services::{batch_store::BatchStore, products::ProductCatalog},
    store::{collections, TypedStore},
};

lazy_static! {
    static ref STOCK_MOVEMENTS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_movements_total",
            "Total number of stock movements recorded"
        ),
        &["status"]
    )
    .expect("metric can be created");
}

fn validate_nonzero(quantity: i64) -> Result<(), ValidationError> {
    if quantity == 0 {
        return Err(ValidationError::new("quantity_zero"));
    }
    Ok(())
}

/// Input for recording a movement. Id, timestamp, snapshots and workflow
/// status are assigned by the ledger.
#[derive(Debug, Clone, Validate)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub movement_type: MovementType,
    /// Signed delta in base units; zero is meaningless and rejected.
    #[validate(custom = "validate_nonzero")]
    pub quantity: i64,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    pub transaction_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
}

/// History query filters; all optional, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub product_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub performed_by: Option<Uuid>,
    pub status: Option<MovementStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Append-only audit trail of every stock-affecting event, with the
/// pending/approved/rejected review workflow.
///
/// The ledger owns the apply-on-approve side effect: when a movement lands
/// (or is later reviewed) `Approved` and carries a `batch_id`, the ledger
/// itself applies the delta to the batch store and refreshes the product
/// aggregate. Call sites cannot forget to realize an approved change.
#[derive(Clone)]
pub struct MovementLedger {
    store: TypedStore,
    batch_store: BatchStore,
    catalog: ProductCatalog,
    oracle: Arc<dyn PermissionOracle>,
    clock: Arc<dyn Clock>,
    events: EventSender,
}

impl MovementLedger {
    pub fn new(
        store: TypedStore,
        batch_store: BatchStore,
        catalog: ProductCatalog,
        oracle: Arc<dyn PermissionOracle>,
        clock: Arc<dyn Clock>,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            batch_store,
            catalog,
            oracle,
            clock,
            events,
        }
    }

    async fn read_all(&self) -> Result<Vec<StockMovement>, StockError> {
        self.store.read(collections::STOCK_MOVEMENTS).await
    }

    /// Record a movement, gated by the permission oracle.
    ///
    /// Actors whose role holds `stock:approve` get an `Approved` movement
    /// whose batch delta (if any) is applied immediately; everyone else gets
    /// a `Pending` movement that records intent and touches nothing. The
    /// ledger row is appended before any stock moves: if the append fails
    /// nothing is applied, so no stock change can exist without its audit
    /// row.
    #[instrument(skip(self, new, actor), fields(product_id = %new.product_id, movement_type = %new.movement_type, actor = %actor.name))]
    pub async fn record(
        &self,
        new: NewMovement,
        actor: &Actor,
    ) -> Result<StockMovement, StockError> {
        new.validate()?;
        let product = self.catalog.require(new.product_id).await?;

        let approved = self.oracle.can(&actor.role, perm::STOCK_APPROVE);
        if approved {
            if let Some(batch_id) = new.batch_id {
                // The row licenses the stock change, so the target must
                // exist before anything is appended.
                self.batch_store
                    .get_batch(batch_id)
                    .await?
                    .ok_or(StockError::BatchNotFound(batch_id))?;
            }
        }
        let previous_stock = self.batch_store.total_stock(new.product_id).await?;

        let status = if approved {
            MovementStatus::Approved
        } else {
            MovementStatus::Pending
        };

        let mut movement = StockMovement {
            id: Uuid::now_v7(),
            product_id: new.product_id,
            product_name: product.name,
            movement_type: new.movement_type,
            quantity: new.quantity,
            previous_stock,
            new_stock: previous_stock,
            reason: new.reason,
            notes: new.notes,
            transaction_id: new.transaction_id,
            batch_id: new.batch_id,
            performed_by: actor.id,
            performed_by_name: actor.name.clone(),
            timestamp: self.clock.now(),
            status,
            reviewed_by: None,
            reviewed_at: None,
        };

        self.append(movement.clone()).await?;

        if approved {
            if let Some(batch_id) = new.batch_id {
                movement.new_stock = self
                    .apply_and_restamp(movement.id, batch_id, new.quantity, new.product_id)
                    .await?;
            }
        }

        info!(movement_id = %movement.id, status = %movement.status, "movement recorded");
        self.events
            .send_or_log(Event::MovementRecorded {
                movement_id: movement.id,
                product_id: movement.product_id,
                quantity: movement.quantity,
                status: movement.status.to_string(),
            })
            .await;
        Ok(movement)
    }

    /// Record a movement whose stock effect has already been applied by the
    /// caller (sale commits, purchase receipts). Appended as `Approved` with
    /// the caller's snapshots; the ledger applies nothing.
    #[instrument(skip(self, new, actor), fields(product_id = %new.product_id, movement_type = %new.movement_type))]
    pub async fn record_applied(
        &self,
        new: NewMovement,
        actor: &Actor,
        previous_stock: i64,
        new_stock: i64,
    ) -> Result<StockMovement, StockError> {
        new.validate()?;
        let product = self.catalog.require(new.product_id).await?;

        let movement = StockMovement {
            id: Uuid::now_v7(),
            product_id: new.product_id,
            product_name: product.name,
            movement_type: new.movement_type,
            quantity: new.quantity,
            previous_stock,
            new_stock,
            reason: new.reason,
            notes: new.notes,
            transaction_id: new.transaction_id,
            batch_id: new.batch_id,
            performed_by: actor.id,
            performed_by_name: actor.name.clone(),
            timestamp: self.clock.now(),
            status: MovementStatus::Approved,
            reviewed_by: None,
            reviewed_at: None,
        };

        self.append(movement.clone()).await?;
        Ok(movement)
    }

    async fn append(&self, movement: StockMovement) -> Result<(), StockError> {
        let status = movement.status.to_string();
        self.store
            .update::<Vec<StockMovement>, _, _>(collections::STOCK_MOVEMENTS, move |movements| {
                movements.push(movement);
                Ok(())
            })
            .await?;
        STOCK_MOVEMENTS.with_label_values(&[&status]).inc();
        Ok(())
    }

    /// Realize an already-persisted approved movement: apply the batch
    /// delta, refresh the product aggregate and rewrite the movement's
    /// `new_stock` snapshot from post-apply truth. The ledger row stands
    /// whatever happens here, so a failure is surfaced loudly instead of
    /// unwound.
    async fn apply_and_restamp(
        &self,
        movement_id: Uuid,
        batch_id: Uuid,
        quantity: i64,
        product_id: Uuid,
    ) -> Result<i64, StockError> {
        match self.batch_store.adjust_quantity(batch_id, quantity).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                error!(%movement_id, %batch_id, "approved movement references a missing batch; stock unchanged");
                return Err(StockError::BatchNotFound(batch_id));
            }
            Err(err) => {
                error!(%movement_id, error = %err, "approved movement failed to apply; stock unchanged");
                return Err(err);
            }
        }
        self.catalog.refresh_summary(product_id).await?;

        let new_stock = self.batch_store.total_stock(product_id).await?;
        self.store
            .update::<Vec<StockMovement>, _, _>(collections::STOCK_MOVEMENTS, move |movements| {
                if let Some(movement) = movements.iter_mut().find(|m| m.id == movement_id) {
                    movement.new_stock = new_stock;
                }
                Ok(())
            })
            .await?;
        Ok(new_stock)
    }

    /// Approve a pending movement. Single transition: anything but `Pending`
    /// is `InvalidStatus`. The approved row is persisted first and is what
    /// licenses the stock change; a `batch_id`-carrying movement then has
    /// its delta applied and its `new_stock` snapshot rewritten from
    /// post-apply truth. A substrate failure before the transition lands
    /// leaves the movement `Pending` with nothing applied, so a retry
    /// cannot double-apply.
    #[instrument(skip(self, reviewer), fields(reviewer = %reviewer.name))]
    pub async fn approve(
        &self,
        movement_id: Uuid,
        reviewer: &Actor,
    ) -> Result<StockMovement, StockError> {
        self.review(movement_id, reviewer, MovementStatus::Approved)
            .await
    }

    /// Reject a pending movement. Never touches the batch store.
    #[instrument(skip(self, reviewer), fields(reviewer = %reviewer.name))]
    pub async fn reject(
        &self,
        movement_id: Uuid,
        reviewer: &Actor,
    ) -> Result<StockMovement, StockError> {
        self.review(movement_id, reviewer, MovementStatus::Rejected)
            .await
    }

    async fn review(
        &self,
        movement_id: Uuid,
        reviewer: &Actor,
        verdict: MovementStatus,
    ) -> Result<StockMovement, StockError> {
        if !self.oracle.can(&reviewer.role, perm::STOCK_APPROVE) {
            return Err(StockError::Forbidden(format!(
                "role '{}' may not review stock movements",
                reviewer.role
            )));
        }

        // Persist the transition first; the approved row is what licenses
        // the stock change that follows.
        let reviewer_id = reviewer.id;
        let reviewed_at = self.clock.now();
        let mut reviewed = self
            .store
            .update::<Vec<StockMovement>, _, _>(collections::STOCK_MOVEMENTS, move |movements| {
                let movement = movements
                    .iter_mut()
                    .find(|m| m.id == movement_id)
                    .ok_or(StockError::MovementNotFound(movement_id))?;

                if movement.status != MovementStatus::Pending {
                    return Err(StockError::InvalidStatus(format!(
                        "movement {} is already {}",
                        movement_id, movement.status
                    )));
                }

                movement.status = verdict;
                movement.reviewed_by = reviewer_id;
                movement.reviewed_at = Some(reviewed_at);
                Ok(movement.clone())
            })
            .await?;

        if verdict == MovementStatus::Approved {
            if let Some(batch_id) = reviewed.batch_id {
                reviewed.new_stock = self
                    .apply_and_restamp(movement_id, batch_id, reviewed.quantity, reviewed.product_id)
                    .await?;
            }
        }

        info!(movement_id = %movement_id, verdict = %verdict, "movement reviewed");
        let event = match verdict {
            MovementStatus::Approved => Event::MovementApproved {
                movement_id,
                reviewed_by: reviewer.id,
            },
            _ => Event::MovementRejected {
                movement_id,
                reviewed_by: reviewer.id,
            },
        };
        self.events.send_or_log(event).await;
        Ok(reviewed)
    }

    /// Filtered history, newest first.
    pub async fn history(
        &self,
        filter: MovementFilter,
    ) -> Result<Vec<StockMovement>, StockError> {
        let mut movements: Vec<StockMovement> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|m| filter.product_id.map_or(true, |id| m.product_id == id))
            .filter(|m| filter.movement_type.map_or(true, |t| m.movement_type == t))
            .filter(|m| filter.performed_by.map_or(true, |id| m.performed_by == Some(id)))
            .filter(|m| filter.status.map_or(true, |s| m.status == s))
            .filter(|m| filter.from.map_or(true, |from| m.timestamp >= from))
            .filter(|m| filter.to.map_or(true, |to| m.timestamp <= to))
            .collect();
        movements.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            movements.truncate(limit);
        }
        Ok(movements)
    }

    /// The review queue: pending movements, oldest first.
    pub async fn pending(&self) -> Result<Vec<StockMovement>, StockError> {
        let mut movements: Vec<StockMovement> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|m| m.is_pending())
            .collect();
        movements.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(movements)
    }
}
