use lazy_static::lazy_static;
use prometheus::IntCounter;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use strum::Display;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Actor,
    clock::Clock,
    entities::{
        MovementType, PaymentMethod, Product, RegisterEntry, Sale, SaleLine, SaleStatus,
    },
    errors::StockError,
    events::{Event, EventSender},
    services::{
        allocator::Allocator,
        batch_store::BatchStore,
        movement_ledger::{MovementLedger, NewMovement},
        products::ProductCatalog,
    },
    store::{collections, TypedStore},
};

lazy_static! {
    static ref SALES_COMMITTED: IntCounter = IntCounter::new(
        "sales_committed_total",
        "Total number of committed sale transactions"
    )
    .expect("metric can be created");
    static ref SALES_ROLLED_BACK: IntCounter = IntCounter::new(
        "sales_rolled_back_total",
        "Total number of sale transactions rolled back"
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Serialize, Validate)]
pub struct SaleLineRequest {
    pub product_id: Uuid,
    /// Quantity as entered at the till; packs unless `is_base_unit`.
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub is_base_unit: bool,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Validate)]
pub struct SaleRequest {
    #[validate(length(min = 1, message = "a sale needs at least one line"))]
    pub lines: Vec<SaleLineRequest>,
    pub payment_method: PaymentMethod,
    /// `Completed` hits the register immediately; `Pending` defers it.
    pub status: SaleStatus,
}

/// Commit pipeline phases, logged on every transition so a stuck or failed
/// sale can be placed precisely from the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
enum CommitPhase {
    Validating,
    Allocating,
    Committing,
    RollingBack,
    Done,
    Failed,
}

/// Two-phase multi-line sale committer.
///
/// Phase 1 allocates every line or rolls back every allocation made so far;
/// phase 2 persists the sale, refreshed product aggregates, register entry
/// and per-line ledger movements, compensating in reverse order if any of
/// those writes fail. Only a failed compensation surfaces as
/// `PartialCommit`; everything else is all-or-nothing.
#[derive(Clone)]
pub struct SaleCoordinator {
    store: TypedStore,
    batch_store: BatchStore,
    allocator: Allocator,
    catalog: ProductCatalog,
    ledger: MovementLedger,
    clock: Arc<dyn Clock>,
    events: EventSender,
}

/// One line's worth of phase-1 results, kept so the sale can be assembled
/// and, on failure, unwound.
struct AllocatedLine {
    line: SaleLine,
    previous_stock: i64,
}

impl SaleCoordinator {
    pub fn new(
        store: TypedStore,
        batch_store: BatchStore,
        allocator: Allocator,
        catalog: ProductCatalog,
        ledger: MovementLedger,
        clock: Arc<dyn Clock>,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            batch_store,
            allocator,
            catalog,
            ledger,
            clock,
            events,
        }
    }

    #[instrument(skip(self, request, cashier), fields(lines = request.lines.len(), cashier = %cashier.name, phase = tracing::field::Empty))]
    pub async fn commit_sale(
        &self,
        request: SaleRequest,
        cashier: &Actor,
    ) -> Result<Sale, StockError> {
        let span = tracing::Span::current();
        span.record("phase", CommitPhase::Validating.to_string().as_str());
        request.validate()?;
        for line in &request.lines {
            line.validate()?;
        }

        // Resolve products up front so a typo'd id fails before any stock
        // moves.
        let mut products = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            products.push(self.catalog.require(line.product_id).await?);
        }

        span.record("phase", CommitPhase::Allocating.to_string().as_str());
        let allocated = match self.allocate_lines(&request, &products).await {
            Ok(allocated) => allocated,
            Err((failed_line, err, undo)) => {
                span.record("phase", CommitPhase::RollingBack.to_string().as_str());
                self.roll_back_allocations(&undo).await;
                SALES_ROLLED_BACK.inc();
                self.events
                    .send_or_log(Event::SaleRolledBack {
                        failed_line,
                        product_id: request.lines[failed_line].product_id,
                        reason: err.to_string(),
                    })
                    .await;
                span.record("phase", CommitPhase::Failed.to_string().as_str());
                warn!(failed_line, error = %err, "sale rolled back during allocation");
                return Err(err);
            }
        };

        span.record("phase", CommitPhase::Committing.to_string().as_str());
        let sale = self.build_sale(&request, &allocated, cashier);
        match self.persist_sale(&sale, &allocated, cashier).await {
            Ok(()) => {
                span.record("phase", CommitPhase::Done.to_string().as_str());
                SALES_COMMITTED.inc();
                info!(sale_id = %sale.id, total = %sale.total, "sale committed");
                self.events
                    .send_or_log(Event::SaleCompleted {
                        sale_id: sale.id,
                        total: sale.total,
                        line_count: sale.lines.len(),
                        timestamp: sale.timestamp,
                    })
                    .await;
                Ok(sale)
            }
            Err(err) => {
                span.record("phase", CommitPhase::Failed.to_string().as_str());
                SALES_ROLLED_BACK.inc();
                Err(err)
            }
        }
    }

    /// Phase 1: allocate every line, or return the failing line's index and
    /// error plus the allocations that must be unwound.
    async fn allocate_lines(
        &self,
        request: &SaleRequest,
        products: &[Product],
    ) -> Result<Vec<AllocatedLine>, (usize, StockError, Vec<AllocatedLine>)> {
        let mut allocated: Vec<AllocatedLine> = Vec::with_capacity(request.lines.len());

        for (index, (line, product)) in request.lines.iter().zip(products).enumerate() {
            let units = product.to_base_units(line.quantity, line.is_base_unit);
            let previous_stock = match self.batch_store.total_stock(product.id).await {
                Ok(total) => total,
                Err(e) => return Err((index, e, allocated)),
            };
            match self.allocator.allocate(product.id, units, true).await {
                Ok(allocations) => allocated.push(AllocatedLine {
                    line: SaleLine {
                        product_id: product.id,
                        product_name: product.name.clone(),
                        quantity: line.quantity,
                        is_base_unit: line.is_base_unit,
                        units,
                        unit_price: line.unit_price,
                        allocations,
                    },
                    previous_stock,
                }),
                Err(e) => return Err((index, e, allocated)),
            }
        }
        Ok(allocated)
    }

    /// Undo phase 1 in reverse order. Best effort: `return_stock` reports
    /// losses but never fails.
    async fn roll_back_allocations(&self, allocated: &[AllocatedLine]) {
        for entry in allocated.iter().rev() {
            let outcome = self.allocator.return_stock(&entry.line.allocations).await;
            if !outcome.is_clean() {
                warn!(
                    product_id = %entry.line.product_id,
                    lost_units = outcome.lost_units,
                    "units lost while rolling back a sale line"
                );
            }
        }
    }

    fn build_sale(
        &self,
        request: &SaleRequest,
        allocated: &[AllocatedLine],
        cashier: &Actor,
    ) -> Sale {
        let lines: Vec<SaleLine> = allocated.iter().map(|a| a.line.clone()).collect();
        let total = lines.iter().map(SaleLine::line_total).sum();
        Sale {
            id: Uuid::now_v7(),
            timestamp: self.clock.now(),
            status: request.status,
            payment_method: request.payment_method,
            total,
            cashier_id: cashier.id,
            cashier_name: cashier.name.clone(),
            lines,
        }
    }

    /// Phase 2: persist derived state. Each step pushes a compensating
    /// action; on failure the stack is unwound in reverse, and only a failed
    /// compensation escalates to `PartialCommit`.
    async fn persist_sale(
        &self,
        sale: &Sale,
        allocated: &[AllocatedLine],
        cashier: &Actor,
    ) -> Result<(), StockError> {
        // Snapshot products before refreshing their aggregates so they can
        // be restored verbatim.
        let mut product_snapshots = Vec::with_capacity(allocated.len());
        for entry in allocated {
            product_snapshots.push(self.catalog.require(entry.line.product_id).await?);
        }

        let mut refreshed: Vec<Uuid> = Vec::new();
        let result = self
            .persist_steps(sale, allocated, cashier, &mut refreshed)
            .await;

        if let Err(err) = result {
            if let Err(comp_err) = self
                .compensate(sale, &product_snapshots, &refreshed, allocated)
                .await
            {
                error!(sale_id = %sale.id, error = %comp_err, "sale compensation failed");
                return Err(StockError::PartialCommit(format!(
                    "sale {} failed ({}) and compensation also failed: {}",
                    sale.id, err, comp_err
                )));
            }
            warn!(sale_id = %sale.id, error = %err, "sale unwound after commit failure");
            return Err(err);
        }
        Ok(())
    }

    async fn persist_steps(
        &self,
        sale: &Sale,
        allocated: &[AllocatedLine],
        cashier: &Actor,
        refreshed: &mut Vec<Uuid>,
    ) -> Result<(), StockError> {
        for entry in allocated {
            self.catalog.refresh_summary(entry.line.product_id).await?;
            refreshed.push(entry.line.product_id);
        }

        let persisted = sale.clone();
        self.store
            .update::<Vec<Sale>, _, _>(collections::SALES, move |sales| {
                sales.push(persisted);
                Ok(())
            })
            .await?;

        if sale.status == SaleStatus::Completed {
            let entry = RegisterEntry {
                id: Uuid::now_v7(),
                sale_id: sale.id,
                payment_method: sale.payment_method,
                amount: sale.total,
                recorded_at: sale.timestamp,
            };
            self.store
                .update::<Vec<RegisterEntry>, _, _>(
                    collections::REGISTER_ENTRIES,
                    move |register| {
                        register.push(entry);
                        Ok(())
                    },
                )
                .await?;
        }

        // The stock already moved in phase 1; record the movements as
        // applied so the ledger does not double-decrement.
        for entry in allocated {
            self.ledger
                .record_applied(
                    NewMovement {
                        product_id: entry.line.product_id,
                        movement_type: MovementType::Sale,
                        quantity: -entry.line.units,
                        reason: None,
                        notes: None,
                        transaction_id: Some(sale.id),
                        batch_id: None,
                    },
                    cashier,
                    entry.previous_stock,
                    entry.previous_stock - entry.line.units,
                )
                .await?;
        }
        Ok(())
    }

    /// Reverse phase 2 and then phase 1: drop ledger rows and register
    /// entries for this sale, remove the sale itself, restore product
    /// snapshots, and finally return the allocated stock.
    async fn compensate(
        &self,
        sale: &Sale,
        product_snapshots: &[Product],
        refreshed: &[Uuid],
        allocated: &[AllocatedLine],
    ) -> Result<(), StockError> {
        let sale_id = sale.id;
        self.store
            .update::<Vec<crate::entities::StockMovement>, _, _>(
                collections::STOCK_MOVEMENTS,
                move |movements| {
                    movements.retain(|m| m.transaction_id != Some(sale_id));
                    Ok(())
                },
            )
            .await?;

        self.store
            .update::<Vec<RegisterEntry>, _, _>(collections::REGISTER_ENTRIES, move |register| {
                register.retain(|e| e.sale_id != sale_id);
                Ok(())
            })
            .await?;

        self.store
            .update::<Vec<Sale>, _, _>(collections::SALES, move |sales| {
                sales.retain(|s| s.id != sale_id);
                Ok(())
            })
            .await?;

        for snapshot in product_snapshots {
            if refreshed.contains(&snapshot.id) {
                self.catalog.upsert(snapshot.clone()).await?;
            }
        }

        self.roll_back_allocations(allocated).await;
        Ok(())
    }

    pub async fn list_sales(&self) -> Result<Vec<Sale>, StockError> {
        self.store.read(collections::SALES).await
    }

    pub async fn register_entries(&self) -> Result<Vec<RegisterEntry>, StockError> {
        self.store.read(collections::REGISTER_ENTRIES).await
    }
}
