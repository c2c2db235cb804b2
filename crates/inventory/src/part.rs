use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sparestock_core::{Aggregate, AggregateRoot, DomainError, Money, PartId};

use crate::command::ApplyMovement;
use crate::movement::{Direction, NewMovement};

/// Lifecycle status of a part. Discontinued parts keep their history but
/// accept no further movements.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartStatus {
    Active,
    Discontinued,
}

impl PartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartStatus::Active => "active",
            PartStatus::Discontinued => "discontinued",
        }
    }
}

impl core::fmt::Display for PartStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PartStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(PartStatus::Active),
            "discontinued" => Ok(PartStatus::Discontinued),
            other => Err(DomainError::invalid_argument(format!("unknown part status {other:?}"))),
        }
    }
}

/// Input for registering a new part. Parts always start with zero stock;
/// opening stock is booked as a stock-in so the ledger stays complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPart {
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub unit_price: Money,
    pub minimum_quantity: i64,
}

impl NewPart {
    pub fn new(name: impl Into<String>, category: impl Into<String>, unit_price: Money) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            description: None,
            unit_price,
            minimum_quantity: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_minimum_quantity(mut self, minimum_quantity: i64) -> Self {
        self.minimum_quantity = minimum_quantity;
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        ensure_not_blank("name", &self.name)?;
        ensure_not_blank("category", &self.category)?;
        ensure_non_negative("minimum_quantity", self.minimum_quantity)
    }

    /// Trimmed copy with a blank description dropped, as it is persisted.
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            category: self.category.trim().to_string(),
            description: normalize_description(self.description),
            unit_price: self.unit_price,
            minimum_quantity: self.minimum_quantity,
        }
    }
}

/// Partial update of descriptive fields. `None` leaves a field untouched; an
/// empty `description` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDetails {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub minimum_quantity: Option<i64>,
}

impl PartDetails {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.minimum_quantity.is_none()
    }
}

/// Raw persisted state, used by storage backends to rebuild a `Part`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartState {
    pub id: PartId,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit_price: Money,
    pub total_value: Money,
    pub minimum_quantity: i64,
    pub status: PartStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate root: Part.
///
/// `quantity` and `total_value` form a cache over the part's ledger and only
/// change through `apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    id: PartId,
    name: String,
    category: String,
    description: Option<String>,
    quantity: i64,
    unit_price: Money,
    total_value: Money,
    minimum_quantity: i64,
    status: PartStatus,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Part {
    /// Build a freshly registered part (version 1, no stock).
    pub fn register(id: PartId, draft: NewPart, now: DateTime<Utc>) -> Result<Self, DomainError> {
        draft.validate()?;
        let draft = draft.normalized();
        Ok(Self {
            id,
            name: draft.name,
            category: draft.category,
            description: draft.description,
            quantity: 0,
            unit_price: draft.unit_price,
            total_value: Money::ZERO,
            minimum_quantity: draft.minimum_quantity,
            status: PartStatus::Active,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn rehydrate(state: PartState) -> Self {
        Self {
            id: state.id,
            name: state.name,
            category: state.category,
            description: state.description,
            quantity: state.quantity,
            unit_price: state.unit_price,
            total_value: state.total_value,
            minimum_quantity: state.minimum_quantity,
            status: state.status,
            version: state.version,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }

    pub fn part_id(&self) -> PartId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn total_value(&self) -> Money {
        self.total_value
    }

    pub fn minimum_quantity(&self) -> i64 {
        self.minimum_quantity
    }

    pub fn status(&self) -> PartStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == PartStatus::Active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Active and at or below its reorder threshold.
    pub fn is_low_stock(&self) -> bool {
        self.is_active() && self.quantity <= self.minimum_quantity
    }

    /// Verify the cached fields agree with each other.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.quantity < 0 {
            return Err(DomainError::invariant(format!(
                "part {} has negative quantity {}",
                self.id, self.quantity
            )));
        }
        let expected = self.unit_price.times(self.quantity)?;
        if expected != self.total_value {
            return Err(DomainError::invariant(format!(
                "part {} total_value {} != {} x {}",
                self.id, self.total_value, self.quantity, self.unit_price
            )));
        }
        Ok(())
    }

    /// Record the time of the latest persisted change.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    pub fn update_details(&mut self, details: &PartDetails) -> Result<(), DomainError> {
        if details.is_empty() {
            return Err(DomainError::invalid_argument("no fields to update"));
        }
        if let Some(name) = &details.name {
            ensure_not_blank("name", name)?;
        }
        if let Some(category) = &details.category {
            ensure_not_blank("category", category)?;
        }
        if let Some(minimum) = details.minimum_quantity {
            ensure_non_negative("minimum_quantity", minimum)?;
        }

        if let Some(name) = &details.name {
            self.name = name.trim().to_string();
        }
        if let Some(category) = &details.category {
            self.category = category.trim().to_string();
        }
        if let Some(description) = &details.description {
            self.description = normalize_description(Some(description.clone()));
        }
        if let Some(minimum) = details.minimum_quantity {
            self.minimum_quantity = minimum;
        }
        self.version += 1;
        Ok(())
    }

    /// Change the unit price. Past movements keep the price they captured.
    pub fn reprice(&mut self, unit_price: Money) -> Result<(), DomainError> {
        let total_value = unit_price.times(self.quantity)?;
        self.unit_price = unit_price;
        self.total_value = total_value;
        self.version += 1;
        Ok(())
    }

    pub fn discontinue(&mut self) -> Result<(), DomainError> {
        if self.status == PartStatus::Discontinued {
            return Err(DomainError::invalid_argument(format!(
                "part {} is already discontinued",
                self.id
            )));
        }
        self.status = PartStatus::Discontinued;
        self.version += 1;
        Ok(())
    }

    pub fn reactivate(&mut self) -> Result<(), DomainError> {
        if self.status == PartStatus::Active {
            return Err(DomainError::invalid_argument(format!(
                "part {} is already active",
                self.id
            )));
        }
        self.status = PartStatus::Active;
        self.version += 1;
        Ok(())
    }

    fn next_quantity(&self, direction: Direction, quantity: i64) -> Result<i64, DomainError> {
        match direction {
            Direction::In => self.quantity.checked_add(quantity).ok_or_else(|| {
                DomainError::invariant(format!("stock-in of {quantity} overflows part {}", self.id))
            }),
            Direction::Out => {
                if quantity > self.quantity {
                    return Err(DomainError::insufficient_stock(quantity, self.quantity));
                }
                Ok(self.quantity - quantity)
            }
        }
    }

    fn ensure_part_id(&self, part_id: PartId) -> Result<(), DomainError> {
        if self.id != part_id {
            return Err(DomainError::invariant("part_id mismatch"));
        }
        Ok(())
    }
}

impl AggregateRoot for Part {
    type Id = PartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Part {
    type Command = ApplyMovement;
    type Event = NewMovement;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        self.ensure_part_id(event.part_id)?;
        let quantity = self.next_quantity(event.direction, event.quantity)?;
        let total_value = self.unit_price.times(quantity)?;

        self.quantity = quantity;
        self.total_value = total_value;
        self.version += 1;
        Ok(())
    }

    fn handle(&self, command: &Self::Command) -> Result<Self::Event, Self::Error> {
        command.validate()?;
        self.ensure_part_id(command.part_id)?;
        if !self.is_active() {
            return Err(DomainError::not_found(format!("part {} is discontinued", self.id)));
        }

        // Check the resulting state up front so `apply` cannot fail afterwards.
        let quantity = self.next_quantity(command.direction, command.quantity)?;
        self.unit_price.times(quantity)?;
        let total_price = self.unit_price.times(command.quantity)?;

        Ok(NewMovement {
            part_id: self.id,
            direction: command.direction,
            quantity: command.quantity,
            unit_price: self.unit_price,
            total_price,
            occurred_at: command.occurred_at,
            actor_id: command.actor_id,
            reason: command.normalized_reason(),
        })
    }
}

fn ensure_not_blank(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::invalid_argument(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn ensure_non_negative(field: &str, value: i64) -> Result<(), DomainError> {
    if value < 0 {
        return Err(DomainError::invalid_argument(format!(
            "{field} cannot be negative (got {value})"
        )));
    }
    Ok(())
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use sparestock_core::ActorId;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn price(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn registered(unit_price: &str) -> Part {
        Part::register(
            PartId::new(1),
            NewPart::new("Brake pad", "brakes", price(unit_price)).with_minimum_quantity(3),
            test_time(),
        )
        .unwrap()
    }

    fn stocked(quantity: i64, unit_price: &str) -> Part {
        let mut part = registered(unit_price);
        let cmd = ApplyMovement::stock_in(part.part_id(), quantity, ActorId::new(1));
        let m = part.handle(&cmd).unwrap();
        part.apply(&m).unwrap();
        part
    }

    #[test]
    fn register_starts_empty_and_active() {
        let part = registered("5.00");
        assert_eq!(part.quantity(), 0);
        assert_eq!(part.total_value(), Money::ZERO);
        assert_eq!(part.status(), PartStatus::Active);
        assert_eq!(part.version(), 1);
    }

    #[test]
    fn register_rejects_blank_name_and_negative_minimum() {
        let err = Part::register(PartId::new(1), NewPart::new("  ", "x", Money::ZERO), test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));

        let err = Part::register(
            PartId::new(1),
            NewPart::new("Filter", "x", Money::ZERO).with_minimum_quantity(-1),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn stock_in_captures_current_price_and_updates_value() {
        let part = stocked(10, "5.00");
        let cmd = ApplyMovement::stock_in(part.part_id(), 5, ActorId::new(7));

        let movement = part.handle(&cmd).unwrap();
        assert_eq!(movement.direction, Direction::In);
        assert_eq!(movement.quantity, 5);
        assert_eq!(movement.unit_price, price("5.00"));
        assert_eq!(movement.total_price, price("25.00"));

        let mut part = part;
        part.apply(&movement).unwrap();
        assert_eq!(part.quantity(), 15);
        assert_eq!(part.total_value(), price("75.00"));
        part.check_invariants().unwrap();
    }

    #[test]
    fn stock_out_beyond_on_hand_is_rejected_without_change() {
        let part = stocked(15, "5.00");
        let before = part.clone();
        let cmd = ApplyMovement::stock_out(part.part_id(), 20, ActorId::new(7));

        let err = part.handle(&cmd).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(20, 15));
        assert_eq!(part, before);
    }

    #[test]
    fn stock_out_to_exactly_zero_is_allowed() {
        let mut part = stocked(4, "2.50");
        let m = part
            .handle(&ApplyMovement::stock_out(part.part_id(), 4, ActorId::new(1)))
            .unwrap();
        part.apply(&m).unwrap();
        assert_eq!(part.quantity(), 0);
        assert_eq!(part.total_value(), Money::ZERO);
    }

    #[test]
    fn discontinued_part_rejects_movements_as_not_found() {
        let mut part = stocked(5, "1.00");
        part.discontinue().unwrap();
        let err = part
            .handle(&ApplyMovement::stock_in(part.part_id(), 1, ActorId::new(1)))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn handle_rejects_command_for_another_part() {
        let part = stocked(5, "1.00");
        let err = part
            .handle(&ApplyMovement::stock_in(PartId::new(99), 1, ActorId::new(1)))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn reprice_recomputes_total_value() {
        let mut part = stocked(8, "5.00");
        let version = part.version();
        part.reprice(price("6.25")).unwrap();
        assert_eq!(part.total_value(), price("50.00"));
        assert_eq!(part.version(), version + 1);
        part.check_invariants().unwrap();
    }

    #[test]
    fn low_stock_requires_active_status() {
        let mut part = stocked(3, "1.00");
        assert!(part.is_low_stock());
        part.discontinue().unwrap();
        assert!(!part.is_low_stock());
    }

    #[test]
    fn update_details_validates_before_changing_anything() {
        let mut part = registered("1.00");
        let before = part.clone();
        let details = PartDetails {
            name: Some("Renamed".into()),
            minimum_quantity: Some(-5),
            ..Default::default()
        };
        assert!(part.update_details(&details).is_err());
        assert_eq!(part, before);

        let details = PartDetails {
            description: Some("".into()),
            category: Some("hydraulics".into()),
            ..Default::default()
        };
        part.update_details(&details).unwrap();
        assert_eq!(part.category(), "hydraulics");
        assert_eq!(part.description(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of requested movements, the accepted ones
        /// reconstruct the quantity, the value stays derived, and every rejected
        /// stock-out really exceeded what was on hand.
        #[test]
        fn accepted_movements_reconstruct_quantity(
            price_cents in 0i64..100_000i64,
            requests in prop::collection::vec((any::<bool>(), 1i64..500i64), 1..60)
        ) {
            let mut part = registered("0.00");
            part.reprice(Money::from_cents(price_cents).unwrap()).unwrap();

            let mut stock_in = 0i64;
            let mut stock_out = 0i64;

            for (is_in, quantity) in requests {
                let cmd = if is_in {
                    ApplyMovement::stock_in(part.part_id(), quantity, ActorId::new(1))
                } else {
                    ApplyMovement::stock_out(part.part_id(), quantity, ActorId::new(1))
                };
                let on_hand = part.quantity();
                match part.handle(&cmd) {
                    Ok(m) => {
                        part.apply(&m).unwrap();
                        match m.direction {
                            Direction::In => stock_in += m.quantity,
                            Direction::Out => stock_out += m.quantity,
                        }
                    }
                    Err(DomainError::InsufficientStock { requested, available }) => {
                        prop_assert!(!is_in);
                        prop_assert!(requested > available);
                        prop_assert_eq!(available, on_hand);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }

                prop_assert!(part.quantity() >= 0);
                prop_assert_eq!(part.quantity(), stock_in - stock_out);
                prop_assert_eq!(part.total_value(), part.unit_price().times(part.quantity()).unwrap());
            }
        }
    }
}
