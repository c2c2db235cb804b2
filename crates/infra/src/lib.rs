//! Infrastructure layer: storage, configuration, and the stock engine
//! services built on top of them.
//!
//! - `store`: `StockStore` boundary with in-memory and Postgres backends
//! - `mutator`: `StockMutator::apply_movement`
//! - `registry`: part master data
//! - `reports`: read-only aggregates over parts and the ledger

pub mod config;
pub mod error;
pub mod mutator;
pub mod registry;
pub mod reports;
pub mod retry;
pub mod store;


pub use config::{ConfigError, StockConfig};
pub use error::{StockError, StockResult};
pub use mutator::{MovementReceipt, StockMutator};
pub use registry::PartRegistry;
pub use reports::{
    CategoryTotal, DailyMovement, DashboardStats, LedgerDiscrepancy, MovementLine, MovementReport,
    ReportAggregator, ValueSummary,
};
pub use retry::RetryPolicy;
pub use store::{
    InMemoryStockStore, MovementFilter, MovementPage, Pagination, PartFilter, PostgresStockStore,
    StockStore, StoreError, TimeRange,
};
