//! Part registry: creation and maintenance of part master data.
//!
//! Quantity is not writable here. Every change goes through `save_part` with
//! the version that was read, retried and timed like stock movements.

use tracing::{info, instrument};

use sparestock_core::{AggregateRoot, DomainError, ExpectedVersion, Money, PartId};
use sparestock_inventory::{NewPart, Part, PartDetails};

use crate::config::StockConfig;
use crate::error::{StockError, StockResult};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{PartFilter, StockStore};

#[derive(Debug, Clone)]
pub struct PartRegistry<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S> PartRegistry<S> {
    pub fn new(store: S, config: &StockConfig) -> Self {
        Self::with_policy(store, RetryPolicy::from_config(config))
    }

    pub fn with_policy(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: StockStore> PartRegistry<S> {
    /// Register a part with zero stock.
    #[instrument(skip(self, draft), fields(name = %draft.name, category = %draft.category), err)]
    pub async fn register_part(&self, draft: NewPart) -> StockResult<Part> {
        draft.validate()?;
        let part = self.store.insert_part(draft).await?;
        info!(part_id = %part.part_id(), "part registered");
        Ok(part)
    }

    /// Fetch a part regardless of status.
    pub async fn get_part(&self, part_id: PartId) -> StockResult<Part> {
        self.store
            .load_part(part_id)
            .await?
            .ok_or_else(|| StockError::NotFound(format!("part {part_id}")))
    }

    pub async fn list_parts(&self, filter: &PartFilter) -> StockResult<Vec<Part>> {
        Ok(self.store.list_parts(filter).await?)
    }

    #[instrument(skip(self, details), err)]
    pub async fn update_details(&self, part_id: PartId, details: PartDetails) -> StockResult<Part> {
        self.modify(part_id, "update_details", |part| part.update_details(&details))
            .await
    }

    /// Change the unit price. Cached total value follows; recorded movements
    /// keep the price they were booked at.
    #[instrument(skip(self), fields(unit_price = %unit_price), err)]
    pub async fn reprice(&self, part_id: PartId, unit_price: Money) -> StockResult<Part> {
        self.modify(part_id, "reprice", |part| part.reprice(unit_price))
            .await
    }

    #[instrument(skip(self), err)]
    pub async fn discontinue(&self, part_id: PartId) -> StockResult<Part> {
        self.modify(part_id, "discontinue", Part::discontinue).await
    }

    #[instrument(skip(self), err)]
    pub async fn reactivate(&self, part_id: PartId) -> StockResult<Part> {
        self.modify(part_id, "reactivate", Part::reactivate).await
    }

    /// Delete a part that has never been moved. Parts with ledger history are
    /// `Restricted`; discontinue them instead.
    #[instrument(skip(self), err)]
    pub async fn remove_part(&self, part_id: PartId) -> StockResult<()> {
        self.store.delete_part(part_id).await?;
        info!("part removed");
        Ok(())
    }

    async fn modify<F>(&self, part_id: PartId, operation: &'static str, change: F) -> StockResult<Part>
    where
        F: Fn(&mut Part) -> Result<(), DomainError>,
    {
        let change = &change;
        let part = with_retry(self.policy, operation, move |deadline| async move {
            let (part, expected) = deadline
                .run(operation, async {
                    let mut part = self.get_part(part_id).await?;
                    let expected = ExpectedVersion::Exact(part.version());
                    change(&mut part)?;
                    Ok::<_, StockError>((part, expected))
                })
                .await?;
            Ok(self.store.save_part(&part, expected).await?)
        })
        .await?;

        info!(operation, version = part.version(), "part updated");
        Ok(part)
    }
}
