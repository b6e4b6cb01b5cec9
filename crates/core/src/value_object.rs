//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values.
/// `Money { 10.00, USD }` equals any other `Money { 10.00, USD }`; a ledger
/// entry carrying that amount does not.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
