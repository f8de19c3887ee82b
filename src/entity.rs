//! Trait implemented by entities whose changes invalidate cache keys.

use std::fmt::Display;

/// An entity that can appear in a cache key and be reported as changed.
///
/// # Example
///
/// ```
/// use cache_tokens::TrackedEntity;
///
/// pub struct Employment {
///     pub id: u64,
///     pub employer_name: String,
/// }
///
/// impl TrackedEntity for Employment {
///     type Key = u64;
///
///     fn entity_id(&self) -> Self::Key {
///         self.id
///     }
///
///     fn collection() -> &'static str {
///         "employment"
///     }
/// }
/// ```
pub trait TrackedEntity {
    /// Type of the entity's id (typically an integer, String or UUID).
    type Key: Display;

    /// Return the entity's stable id.
    fn entity_id(&self) -> Self::Key;

    /// Return the collection this entity belongs to, e.g. `"users"`.
    ///
    /// Identifier format: `"{namespace}:{collection}#{id}"`
    fn collection() -> &'static str;
}

impl<T: TrackedEntity> TrackedEntity for &T {
    type Key = T::Key;

    fn entity_id(&self) -> Self::Key {
        (*self).entity_id()
    }

    fn collection() -> &'static str {
        T::collection()
    }
}
