//! Value object trait: equality by value, not identity.
//!
//! Catalog value objects are defined entirely by their contents. A variant's
//! signature and a generated combination are value objects: two signatures
//! with the same `(attribute, option)` pairs are the same signature, no
//! matter which variant they were read from.

/// Marker trait for value objects.
///
/// The trait requires:
/// - **Clone**: values are copied freely
/// - **Eq**: values are compared by their contents
/// - **Debug**: values show up in logs and assertions
pub trait ValueObject: Clone + Eq + core::fmt::Debug {}
