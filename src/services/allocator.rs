use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    entities::BatchAllocation,
    errors::StockError,
    events::{Event, EventSender},
    services::batch_store::BatchStore,
};

lazy_static! {
    static ref STOCK_ALLOCATIONS: IntCounter = IntCounter::new(
        "stock_allocations_total",
        "Total number of committed stock allocations"
    )
    .expect("metric can be created");
    static ref STOCK_ALLOCATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_allocation_failures_total",
            "Total number of failed stock allocations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
    static ref STOCK_RETURN_LOST_UNITS: IntCounter = IntCounter::new(
        "stock_return_lost_units_total",
        "Units lost because a return targeted a pruned batch"
    )
    .expect("metric can be created");
}

/// Result of a best-effort stock return. Never an error: callers use
/// returns as an unconditional compensating action, so failures degrade to
/// counts and log lines instead of propagating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReturnOutcome {
    pub restored_units: i64,
    /// Units that could not be restored because their batch tombstone was
    /// garbage-collected (or the substrate failed). Permanently under-counted
    /// stock; surfaced by a warning at the point of loss.
    pub lost_units: i64,
}

impl ReturnOutcome {
    pub fn is_clean(&self) -> bool {
        self.lost_units == 0
    }
}

/// Stateless First-Expiry-First-Out planner and committer over
/// [`BatchStore`].
#[derive(Clone)]
pub struct Allocator {
    batch_store: BatchStore,
    clock: Arc<dyn Clock>,
    events: EventSender,
    max_retries: u32,
}

impl Allocator {
    pub fn new(
        batch_store: BatchStore,
        clock: Arc<dyn Clock>,
        events: EventSender,
        max_retries: u32,
    ) -> Self {
        Self {
            batch_store,
            clock,
            events,
            max_retries: max_retries.max(1),
        }
    }

    /// Compute (and with `commit` apply) a FEFO allocation of
    /// `quantity_needed` base units of a product.
    ///
    /// The plan walks batches in ascending expiry order (ties broken by
    /// batch id, which v7 ids make arrival-ordered), skipping tombstones and
    /// anything not strictly unexpired. If the allocatable total falls short
    /// the call fails with `InsufficientStock` and nothing is mutated,
    /// commit flag or not. A committed plan is re-verified under the product
    /// lock; if a concurrent writer invalidated it the allocator re-plans
    /// from a fresh snapshot up to the configured retry bound.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity_needed, commit))]
    pub async fn allocate(
        &self,
        product_id: Uuid,
        quantity_needed: i64,
        commit: bool,
    ) -> Result<Vec<BatchAllocation>, StockError> {
        if quantity_needed < 1 {
            STOCK_ALLOCATION_FAILURES
                .with_label_values(&["invalid_quantity"])
                .inc();
            return Err(StockError::InvalidQuantity(format!(
                "requested quantity must be at least 1, got {}",
                quantity_needed
            )));
        }

        let mut attempt = 0;
        loop {
            let plan = self.plan(product_id, quantity_needed).await.map_err(|e| {
                let label = if e.is_insufficient_stock() {
                    "insufficient_stock"
                } else {
                    "product_not_found"
                };
                STOCK_ALLOCATION_FAILURES.with_label_values(&[label]).inc();
                e
            })?;

            if !commit {
                return Ok(plan);
            }

            match self.batch_store.apply_allocations(product_id, &plan).await {
                Ok(()) => {
                    STOCK_ALLOCATIONS.inc();
                    info!(
                        batches = plan.len(),
                        "allocation committed"
                    );
                    self.events
                        .send_or_log(Event::StockAllocated {
                            product_id,
                            quantity: quantity_needed,
                            batches: plan.iter().map(|a| a.batch_id).collect(),
                        })
                        .await;
                    return Ok(plan);
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        STOCK_ALLOCATION_FAILURES
                            .with_label_values(&["conflict"])
                            .inc();
                        return Err(e);
                    }
                    warn!(attempt, "allocation plan went stale, re-planning");
                }
                Err(e) => {
                    STOCK_ALLOCATION_FAILURES
                        .with_label_values(&["store_error"])
                        .inc();
                    return Err(e);
                }
            }
        }
    }

    async fn plan(
        &self,
        product_id: Uuid,
        quantity_needed: i64,
    ) -> Result<Vec<BatchAllocation>, StockError> {
        let batches = self.batch_store.batches_for_product(product_id).await?;
        if batches.is_empty() {
            return Err(StockError::ProductNotFound(product_id));
        }

        let today = self.clock.today();
        let mut allocatable: Vec<_> = batches
            .into_iter()
            .filter(|b| b.is_allocatable(today))
            .collect();
        allocatable.sort_by(|a, b| {
            a.expiry_date
                .cmp(&b.expiry_date)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total_available: i64 = allocatable.iter().map(|b| b.quantity).sum();
        if total_available < quantity_needed {
            return Err(StockError::InsufficientStock {
                product_id,
                requested: quantity_needed,
                available: total_available,
            });
        }

        let mut remaining = quantity_needed;
        let mut plan = Vec::new();
        for batch in &allocatable {
            if remaining == 0 {
                break;
            }
            let taken = batch.quantity.min(remaining);
            plan.push(BatchAllocation {
                batch_id: batch.id,
                quantity: taken,
                expiry_date: batch.expiry_date,
            });
            remaining -= taken;
        }

        Ok(plan)
    }

    /// Return previously allocated units to their batches. The sole rollback
    /// mechanism, and deliberately infallible: an empty slice is a no-op,
    /// pruned targets and substrate failures are counted as lost units and
    /// logged, never raised.
    #[instrument(skip(self, allocations), fields(count = allocations.len()))]
    pub async fn return_stock(&self, allocations: &[BatchAllocation]) -> ReturnOutcome {
        let mut outcome = ReturnOutcome::default();

        for allocation in allocations {
            match self
                .batch_store
                .adjust_quantity(allocation.batch_id, allocation.quantity)
                .await
            {
                Ok(Some(_)) => outcome.restored_units += allocation.quantity,
                Ok(None) => {
                    outcome.lost_units += allocation.quantity;
                    STOCK_RETURN_LOST_UNITS.inc_by(allocation.quantity as u64);
                    warn!(
                        batch_id = %allocation.batch_id,
                        units = allocation.quantity,
                        "return target batch was pruned; units permanently lost"
                    );
                }
                Err(e) => {
                    outcome.lost_units += allocation.quantity;
                    STOCK_RETURN_LOST_UNITS.inc_by(allocation.quantity as u64);
                    error!(
                        batch_id = %allocation.batch_id,
                        units = allocation.quantity,
                        error = %e,
                        "substrate failure during stock return; units not restored"
                    );
                }
            }
        }

        if !allocations.is_empty() {
            self.events
                .send_or_log(Event::StockReturned {
                    restored_units: outcome.restored_units,
                    lost_units: outcome.lost_units,
                })
                .await;
        }

        outcome
    }
}
