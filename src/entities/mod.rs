//! Plain-data entities persisted through the collection substrate.
//! The substrate is schemaless JSON, so these are ordinary serde structs;
//! identifiers are time-ordered v7 UUIDs.

pub mod product;
pub mod register;
pub mod sale;
pub mod stock_batch;
pub mod stock_movement;

pub use product::Product;
pub use register::RegisterEntry;
pub use sale::{BatchAllocation, PaymentMethod, Sale, SaleLine, SaleStatus};
pub use stock_batch::{BatchStatus, NewBatch, StockBatch};
pub use stock_movement::{MovementStatus, MovementType, StockMovement};
