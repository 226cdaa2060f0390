//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Performance obligations and schedule entries are entities: they live inside
/// a larger structure but keep a stable identity that lineage queries join on.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
