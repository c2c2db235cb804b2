//! Storage boundary for parts and the movement ledger.
//!
//! This module defines the storage-facing abstraction the mutator, registry
//! and reports are built on, plus in-memory and Postgres implementations.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use query::{MovementFilter, MovementPage, Pagination, PartFilter, TimeRange};
pub use r#trait::{StockStore, StoreError};

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::StockConfig;

/// Build the store selected by `config`: Postgres when a database URL is
/// set, otherwise a fresh in-memory store.
pub async fn connect(config: &StockConfig) -> Result<Arc<dyn StockStore>, StoreError> {
    let Some(url) = config.database_url.as_deref() else {
        info!("no database url configured, using in-memory stock store");
        return Ok(Arc::new(InMemoryStockStore::new()));
    };

    let pool = PgPoolOptions::new()
        .acquire_timeout(config.transaction_timeout)
        .connect(url)
        .await
        .map_err(|e| StoreError::Unavailable(format!("failed to connect to postgres: {e}")))?;

    info!("connected to postgres stock store");
    Ok(Arc::new(PostgresStockStore::new(pool, config.lock_timeout)))
}
