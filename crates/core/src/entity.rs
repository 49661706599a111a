//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Attributes, options and variants are entities: a renamed attribute or a
/// restocked variant is still the same row.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Ord + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
