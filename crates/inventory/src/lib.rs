//! Spare-parts inventory domain module.
//!
//! This crate contains business rules for parts and their stock ledger,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod command;
pub mod ledger;
pub mod movement;
pub mod part;

pub use command::ApplyMovement;
pub use ledger::{LedgerTotals, histories_by_part, replay_quantity};
pub use movement::{Direction, Movement, NewMovement};
pub use part::{NewPart, Part, PartDetails, PartState, PartStatus};
