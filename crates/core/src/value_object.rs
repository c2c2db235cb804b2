//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**; they are defined entirely by their
//! attribute values. Two value objects with the same values are equal.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one. `Money { cents: 500 }` is a value object; a `Part` with an
/// id is an entity.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
