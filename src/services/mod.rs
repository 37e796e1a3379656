// Core stock services
pub mod allocator;
pub mod batch_store;
pub mod movement_ledger;
pub mod sales;

// Orchestration and reporting
pub mod adjustments;
pub mod products;

pub use adjustments::StockAdjustmentService;
pub use allocator::Allocator;
pub use batch_store::BatchStore;
pub use movement_ledger::MovementLedger;
pub use products::ProductCatalog;
pub use sales::SaleCoordinator;
