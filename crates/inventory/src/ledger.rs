//! Ledger replay: the movement history is the source of truth for quantity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sparestock_core::{DomainError, PartId};

use crate::movement::{Direction, Movement};

/// Gross stock-in / stock-out totals of a movement sequence.
///
/// Single movements are bounded by `i64`; their sums are kept in `i128` so
/// that summing any ledger cannot overflow.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub stock_in: i128,
    pub stock_out: i128,
    pub movements: u64,
}

impl LedgerTotals {
    pub fn record(&mut self, movement: &Movement) {
        match movement.direction {
            Direction::In => self.stock_in += i128::from(movement.quantity),
            Direction::Out => self.stock_out += i128::from(movement.quantity),
        }
        self.movements += 1;
    }

    /// Net on-hand quantity implied by the totals.
    pub fn net(&self) -> i128 {
        self.stock_in - self.stock_out
    }
}

/// Replay one part's movements in ledger order and return the resulting
/// quantity. Fails if the history would ever drive stock below zero.
pub fn replay_quantity<'a>(
    movements: impl IntoIterator<Item = &'a Movement>,
) -> Result<i64, DomainError> {
    let mut quantity = 0i64;
    for m in movements {
        quantity = quantity
            .checked_add(m.signed_quantity())
            .ok_or_else(|| DomainError::invariant(format!("ledger overflow at movement {}", m.id)))?;
        if quantity < 0 {
            return Err(DomainError::invariant(format!(
                "ledger for part {} goes negative at movement {}",
                m.part_id, m.id
            )));
        }
    }
    Ok(quantity)
}

/// Split a ledger into per-part histories, keeping ledger order within each.
pub fn histories_by_part<'a>(
    movements: impl IntoIterator<Item = &'a Movement>,
) -> BTreeMap<PartId, Vec<&'a Movement>> {
    let mut histories: BTreeMap<PartId, Vec<&'a Movement>> = BTreeMap::new();
    for m in movements {
        histories.entry(m.part_id).or_default().push(m);
    }
    histories
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sparestock_core::{ActorId, Money, MovementId};

    fn movement(id: i64, part: i64, direction: Direction, quantity: i64) -> Movement {
        Movement {
            id: MovementId::new(id),
            part_id: PartId::new(part),
            direction,
            quantity,
            unit_price: Money::ZERO,
            total_price: Money::ZERO,
            occurred_at: Utc::now(),
            actor_id: ActorId::new(1),
            reason: None,
        }
    }

    #[test]
    fn replay_sums_signed_quantities() {
        let ledger = vec![
            movement(1, 1, Direction::In, 10),
            movement(2, 1, Direction::Out, 4),
            movement(3, 1, Direction::In, 2),
        ];
        assert_eq!(replay_quantity(&ledger).unwrap(), 8);
    }

    #[test]
    fn replay_rejects_history_that_goes_negative() {
        let ledger = vec![movement(1, 1, Direction::In, 1), movement(2, 1, Direction::Out, 2)];
        assert!(matches!(
            replay_quantity(&ledger),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn histories_are_grouped_per_part_in_ledger_order() {
        let ledger = vec![
            movement(1, 1, Direction::In, 10),
            movement(2, 2, Direction::In, 3),
            movement(3, 1, Direction::Out, 6),
        ];
        let histories = histories_by_part(&ledger);
        let ids: Vec<i64> = histories[&PartId::new(1)].iter().map(|m| m.id.get()).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(replay_quantity(histories[&PartId::new(1)].iter().copied()).unwrap(), 4);
        assert_eq!(histories[&PartId::new(2)].len(), 1);
    }

    #[test]
    fn totals_do_not_overflow_on_extreme_ledgers() {
        let ledger = vec![
            movement(1, 1, Direction::In, i64::MAX),
            movement(2, 1, Direction::Out, i64::MAX),
            movement(3, 1, Direction::In, 1),
            movement(4, 2, Direction::In, i64::MAX),
        ];
        let mut totals = LedgerTotals::default();
        for m in &ledger {
            totals.record(m);
        }
        assert_eq!(totals.stock_in, i128::from(i64::MAX) * 2 + 1);
        assert_eq!(totals.stock_out, i128::from(i64::MAX));
        assert_eq!(totals.movements, 4);
        assert_eq!(totals.net(), i128::from(i64::MAX) + 1);
    }
}
