//! rxstock
//!
//! Pharmacy stock engine: expiry-aware batch allocation, a two-phase sale
//! committer, and an approval-gated movement ledger over a pluggable
//! whole-collection JSON substrate.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod entities;
pub mod errors;
pub mod events;
pub mod services;
pub mod store;

use std::sync::Arc;
use tokio::sync::mpsc;

use auth::PermissionOracle;
use clock::Clock;
use config::EngineConfig;
use events::{Event, EventSender};
use services::{
    Allocator, BatchStore, MovementLedger, ProductCatalog, SaleCoordinator,
    StockAdjustmentService,
};
use store::{CollectionStore, TypedStore};

/// The wired-up engine. Constructing one is the only setup a host needs;
/// every service shares the same substrate, clock, oracle and event channel.
#[derive(Clone)]
pub struct StockEngine {
    config: EngineConfig,
    batch_store: BatchStore,
    allocator: Allocator,
    catalog: ProductCatalog,
    ledger: MovementLedger,
    sales: SaleCoordinator,
    adjustments: StockAdjustmentService,
    events: EventSender,
}

impl StockEngine {
    /// Wire the services to an injected substrate, clock and permission
    /// oracle. Returns the engine and the receiving half of its event
    /// channel; spawn [`events::process_events`] on it (or a custom
    /// consumer).
    pub fn new(
        config: EngineConfig,
        substrate: Arc<dyn CollectionStore>,
        clock: Arc<dyn Clock>,
        oracle: Arc<dyn PermissionOracle>,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (events, rx) = EventSender::channel(config.event_buffer_size);
        let typed = TypedStore::new(substrate);

        let batch_store = BatchStore::new(typed.clone(), clock.clone());
        let catalog = ProductCatalog::new(typed.clone(), batch_store.clone(), clock.clone());
        let allocator = Allocator::new(
            batch_store.clone(),
            clock.clone(),
            events.clone(),
            config.allocation_max_retries,
        );
        let ledger = MovementLedger::new(
            typed.clone(),
            batch_store.clone(),
            catalog.clone(),
            oracle.clone(),
            clock.clone(),
            events.clone(),
        );
        let sales = SaleCoordinator::new(
            typed,
            batch_store.clone(),
            allocator.clone(),
            catalog.clone(),
            ledger.clone(),
            clock.clone(),
            events.clone(),
        );
        let adjustments = StockAdjustmentService::new(
            batch_store.clone(),
            catalog.clone(),
            ledger.clone(),
            oracle,
            clock,
            events.clone(),
            config.clone(),
        );

        let engine = Self {
            config,
            batch_store,
            allocator,
            catalog,
            ledger,
            sales,
            adjustments,
            events,
        };
        (engine, rx)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn batches(&self) -> &BatchStore {
        &self.batch_store
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn products(&self) -> &ProductCatalog {
        &self.catalog
    }

    pub fn movements(&self) -> &MovementLedger {
        &self.ledger
    }

    pub fn sales(&self) -> &SaleCoordinator {
        &self.sales
    }

    pub fn adjustments(&self) -> &StockAdjustmentService {
        &self.adjustments
    }

    pub fn event_sender(&self) -> &EventSender {
        &self.events
    }
}

/// One-stop imports for hosts embedding the engine.
pub mod prelude {
    pub use crate::auth::{Actor, PermissionOracle, RolePermissions};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::{load_config, EngineConfig};
    pub use crate::entities::{
        BatchAllocation, MovementStatus, MovementType, PaymentMethod, Product, Sale,
        SaleStatus, StockBatch, StockMovement,
    };
    pub use crate::errors::StockError;
    pub use crate::events::{process_events, Event};
    pub use crate::services::movement_ledger::{MovementFilter, NewMovement};
    pub use crate::services::sales::{SaleLineRequest, SaleRequest};
    pub use crate::store::{CollectionStore, InMemoryStore};
    pub use crate::StockEngine;
}
