//! Stock mutation pipeline.
//!
//! ```text
//! ApplyMovement
//!   ↓
//! 1. Validate the command (no IO)
//!   ↓
//! 2. Load the part and remember its version
//!   ↓
//! 3. Part::handle -> NewMovement (insufficient stock, inactive part, overflow)
//!   ↓
//! 4. Part::apply -> next part state
//!   ↓
//! 5. StockStore::commit_movement guarded by the version from step 2
//!   ↺ on conflict, back to 2 (bounded by `RetryPolicy`)
//! ```
//!
//! Nothing is written before step 5, and step 5 is atomic, so a failed
//! `apply_movement` leaves no trace. Steps 2-4 run under the attempt timeout;
//! step 5 is bounded by the store, so a commit is never abandoned half way
//! and then reported as failed.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use sparestock_core::{Aggregate, AggregateRoot, ExpectedVersion};
use sparestock_inventory::{ApplyMovement, Movement, NewMovement, Part};

use crate::config::StockConfig;
use crate::error::{StockError, StockResult};
use crate::retry::{with_retry, Deadline, RetryPolicy};
use crate::store::StockStore;

/// Outcome of a committed movement: the part as stored after the change,
/// and the ledger row that records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReceipt {
    pub part: Part,
    pub movement: Movement,
}

/// Applies stock movements against a `StockStore`.
#[derive(Debug, Clone)]
pub struct StockMutator<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S> StockMutator<S> {
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

impl<S: StockStore> StockMutator<S> {
    /// Apply one stock-in or stock-out to a part.
    ///
    /// At most one movement is committed per call. Conflicts with concurrent
    /// writers are retried internally; `TransactionConflict` surfaces only
    /// once the retry budget is spent or an attempt runs out of time before
    /// reaching its commit. A commit that has started is awaited, so a
    /// `TransactionConflict` always means nothing was written.
    #[instrument(
        skip(self, command),
        fields(
            part_id = %command.part_id,
            direction = %command.direction,
            quantity = command.quantity,
            actor_id = %command.actor_id
        ),
        err
    )]
    pub async fn apply_movement(&self, command: ApplyMovement) -> StockResult<MovementReceipt> {
        command.validate()?;

        let command = &command;
        let receipt = with_retry(self.policy, "apply_movement", move |deadline| {
            self.attempt(command, deadline)
        })
        .await?;

        info!(
            movement_id = %receipt.movement.id,
            quantity_after = receipt.part.quantity(),
            version = receipt.part.version(),
            "movement committed"
        );
        Ok(receipt)
    }

    async fn attempt(&self, command: &ApplyMovement, deadline: Deadline) -> StockResult<MovementReceipt> {
        let (next, expected, movement) = deadline.run("apply_movement", self.prepare(command)).await?;
        let (part, movement) = self.store.commit_movement(&next, expected, movement).await?;
        Ok(MovementReceipt { part, movement })
    }

    async fn prepare(&self, command: &ApplyMovement) -> StockResult<(Part, ExpectedVersion, NewMovement)> {
        let part = self
            .store
            .load_part(command.part_id)
            .await?
            .ok_or_else(|| StockError::NotFound(format!("part {}", command.part_id)))?;
        let expected = ExpectedVersion::Exact(part.version());

        let movement = part.handle(command)?;
        let mut next = part;
        next.apply(&movement)?;
        Ok((next, expected, movement))
    }
}
