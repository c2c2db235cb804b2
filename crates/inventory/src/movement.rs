use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sparestock_core::{ActorId, DomainError, Entity, Money, MovementId, PartId};

/// Which way stock moves.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    /// Quantity with the sign this direction contributes to on-hand stock.
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            Direction::In => quantity,
            Direction::Out => -quantity,
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(DomainError::invalid_argument(format!(
                "unknown direction {other:?} (expected \"in\" or \"out\")"
            ))),
        }
    }
}

/// A movement decided by a part but not yet committed to the ledger.
///
/// `occurred_at: None` means "stamp with commit time"; storage resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub part_id: PartId,
    pub direction: Direction,
    pub quantity: i64,
    pub unit_price: Money,
    pub total_price: Money,
    pub occurred_at: Option<DateTime<Utc>>,
    pub actor_id: ActorId,
    pub reason: Option<String>,
}

impl NewMovement {
    pub fn signed_quantity(&self) -> i64 {
        self.direction.signed(self.quantity)
    }
}

/// An immutable, committed ledger entry.
///
/// `unit_price` is the part's price captured at movement time; later price
/// changes never touch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub part_id: PartId,
    pub direction: Direction,
    pub quantity: i64,
    pub unit_price: Money,
    pub total_price: Money,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: ActorId,
    pub reason: Option<String>,
}

impl Movement {
    /// Assign storage identity and commit timestamp to a pending movement.
    pub fn commit(id: MovementId, new: NewMovement, committed_at: DateTime<Utc>) -> Self {
        Self {
            id,
            part_id: new.part_id,
            direction: new.direction,
            quantity: new.quantity,
            unit_price: new.unit_price,
            total_price: new.total_price,
            occurred_at: new.occurred_at.unwrap_or(committed_at),
            actor_id: new.actor_id,
            reason: new.reason,
        }
    }

    pub fn signed_quantity(&self) -> i64 {
        self.direction.signed(self.quantity)
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn direction_parses_case_insensitively() {
        assert_eq!("IN".parse::<Direction>().unwrap(), Direction::In);
        assert_eq!(" out ".parse::<Direction>().unwrap(), Direction::Out);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(DomainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn direction_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Out).unwrap(), "\"out\"");
    }

    #[test]
    fn commit_keeps_explicit_timestamp_and_fills_missing_one() {
        let committed_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let explicit = Utc.with_ymd_and_hms(2024, 2, 28, 8, 30, 0).unwrap();
        let new = NewMovement {
            part_id: PartId::new(1),
            direction: Direction::Out,
            quantity: 4,
            unit_price: Money::from_cents(250).unwrap(),
            total_price: Money::from_cents(1000).unwrap(),
            occurred_at: None,
            actor_id: ActorId::new(7),
            reason: None,
        };

        let m = Movement::commit(MovementId::new(1), new.clone(), committed_at);
        assert_eq!(m.occurred_at, committed_at);
        assert_eq!(m.signed_quantity(), -4);

        let backdated = NewMovement {
            occurred_at: Some(explicit),
            ..new
        };
        let m = Movement::commit(MovementId::new(2), backdated, committed_at);
        assert_eq!(m.occurred_at, explicit);
    }
}
