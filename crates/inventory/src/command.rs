use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sparestock_core::{ActorId, DomainError, PartId};

use crate::movement::Direction;

/// Command: ApplyMovement.
///
/// Built by the transport layer from an authenticated request. `actor_id` is
/// trusted as given. `occurred_at: None` stamps the movement with commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyMovement {
    pub part_id: PartId,
    pub direction: Direction,
    pub quantity: i64,
    pub actor_id: ActorId,
    pub reason: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl ApplyMovement {
    pub fn new(part_id: PartId, direction: Direction, quantity: i64, actor_id: ActorId) -> Self {
        Self {
            part_id,
            direction,
            quantity,
            actor_id,
            reason: None,
            occurred_at: None,
        }
    }

    pub fn stock_in(part_id: PartId, quantity: i64, actor_id: ActorId) -> Self {
        Self::new(part_id, Direction::In, quantity, actor_id)
    }

    pub fn stock_out(part_id: PartId, quantity: i64, actor_id: ActorId) -> Self {
        Self::new(part_id, Direction::Out, quantity, actor_id)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Shape checks that do not depend on part state.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quantity <= 0 {
            return Err(DomainError::invalid_argument(format!(
                "quantity must be a positive integer (got {})",
                self.quantity
            )));
        }
        Ok(())
    }

    /// Trimmed reason; blank reasons are dropped.
    pub fn normalized_reason(&self) -> Option<String> {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_quantity() {
        for quantity in [0, -1, i64::MIN] {
            let cmd = ApplyMovement::stock_in(PartId::new(1), quantity, ActorId::new(1));
            assert!(matches!(cmd.validate(), Err(DomainError::InvalidArgument(_))));
        }
    }

    #[test]
    fn blank_reason_is_dropped() {
        let cmd = ApplyMovement::stock_out(PartId::new(1), 2, ActorId::new(1)).with_reason("   ");
        assert_eq!(cmd.normalized_reason(), None);

        let cmd = cmd.with_reason("  broken pump ");
        assert_eq!(cmd.normalized_reason().as_deref(), Some("broken pump"));
    }
}
