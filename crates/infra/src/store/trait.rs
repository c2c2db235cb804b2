use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use sparestock_core::{DomainError, ExpectedVersion, PartId};
use sparestock_inventory::{Movement, NewMovement, NewPart, Part};

use super::query::{MovementFilter, MovementPage, Pagination, PartFilter};

/// Storage operation error.
///
/// These are **infrastructure errors** (missing rows, lost races, I/O) as
/// opposed to business rule failures, which arrive wrapped in `Domain`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("part {0} not found")]
    PartNotFound(PartId),

    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("delete restricted: {0}")]
    Restricted(String),

    #[error("referenced row does not exist: {0}")]
    ForeignKey(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Transactional storage for parts and their movement ledger.
///
/// The ledger is append-only: nothing here updates or deletes a committed
/// movement.
///
/// ## Write Semantics
///
/// Every part write is guarded by an `ExpectedVersion`. The write succeeds
/// only if the stored row is still at that version, and stores the version
/// carried by the new `Part` (the domain bumps it by one per change).
/// A mismatch is `StoreError::Concurrency`.
///
/// `commit_movement` updates the part row and appends the movement as one
/// atomic unit: both become visible together or neither does.
///
/// ## Read Semantics
///
/// Reads return committed rows only. A part is never observed halfway
/// through a mutation.
///
/// ## Implementation Requirements
///
/// - assign part and movement ids monotonically by insertion order
/// - stamp `occurred_at: None` movements with commit time
/// - reject deleting a part that any movement references
/// - writes on different parts must not serialize on each other
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Persist a newly registered part and return it with its assigned id.
    async fn insert_part(&self, draft: NewPart) -> Result<Part, StoreError>;

    /// Load the committed state of a part.
    async fn load_part(&self, part_id: PartId) -> Result<Option<Part>, StoreError>;

    /// Overwrite descriptive/pricing/status fields of a part. Quantity is
    /// never changed through this path.
    async fn save_part(
        &self,
        part: &Part,
        expected_version: ExpectedVersion,
    ) -> Result<Part, StoreError>;

    /// Atomically write the updated part row and append its movement.
    async fn commit_movement(
        &self,
        part: &Part,
        expected_version: ExpectedVersion,
        movement: NewMovement,
    ) -> Result<(Part, Movement), StoreError>;

    /// Delete a part that no movement references.
    async fn delete_part(&self, part_id: PartId) -> Result<(), StoreError>;

    /// Parts matching `filter`, ordered by id.
    async fn list_parts(&self, filter: &PartFilter) -> Result<Vec<Part>, StoreError>;

    /// Movements matching `filter`, newest first (`occurred_at` desc, id desc).
    async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError>;

    /// Every movement matching `filter`, in ledger (id) order.
    async fn scan_movements(&self, filter: &MovementFilter) -> Result<Vec<Movement>, StoreError>;
}

#[async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn insert_part(&self, draft: NewPart) -> Result<Part, StoreError> {
        (**self).insert_part(draft).await
    }

    async fn load_part(&self, part_id: PartId) -> Result<Option<Part>, StoreError> {
        (**self).load_part(part_id).await
    }

    async fn save_part(
        &self,
        part: &Part,
        expected_version: ExpectedVersion,
    ) -> Result<Part, StoreError> {
        (**self).save_part(part, expected_version).await
    }

    async fn commit_movement(
        &self,
        part: &Part,
        expected_version: ExpectedVersion,
        movement: NewMovement,
    ) -> Result<(Part, Movement), StoreError> {
        (**self).commit_movement(part, expected_version, movement).await
    }

    async fn delete_part(&self, part_id: PartId) -> Result<(), StoreError> {
        (**self).delete_part(part_id).await
    }

    async fn list_parts(&self, filter: &PartFilter) -> Result<Vec<Part>, StoreError> {
        (**self).list_parts(filter).await
    }

    async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        (**self).query_movements(filter, pagination).await
    }

    async fn scan_movements(&self, filter: &MovementFilter) -> Result<Vec<Movement>, StoreError> {
        (**self).scan_movements(filter).await
    }
}
