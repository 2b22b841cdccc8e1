//! Persistence collaborator traits.
//!
//! The reconciler never talks to a database directly. The host ORM implements
//! [`LinkStore`] for its owner/related entity pair and hands it to every
//! operation; [`LinkEntity`] is how both sides report their primary key.

use crate::key::{normalize_key, NormalizedKey, PrimaryKey};
use sea_query::Value;

/// An entity addressable by primary key
///
/// # Example
///
/// ```
/// use linkmany::{LinkEntity, NormalizedKey, PrimaryKey};
///
/// struct Group {
///     id: i32,
/// }
///
/// impl LinkEntity for Group {
///     fn primary_key(&self) -> PrimaryKey {
///         self.id.into()
///     }
/// }
///
/// assert_eq!(Group { id: 3 }.normalized_key(), NormalizedKey::Int(3));
/// ```
pub trait LinkEntity {
    /// Raw primary key of this entity
    fn primary_key(&self) -> PrimaryKey;

    /// Primary key in comparable form
    fn normalized_key(&self) -> NormalizedKey {
        normalize_key(self.primary_key())
    }
}

/// Storage operations the reconciler needs for one owner/related pair
///
/// Implemented by the surrounding data layer. All calls are synchronous and
/// issued sequentially; wrap owner save and reconciliation in one transaction
/// on the host side if the junction update must be atomic.
pub trait LinkStore<O, R> {
    /// Error type surfaced by the data layer
    type Error: std::error::Error + Send + Sync + 'static;

    /// Entities currently linked to `owner` through `relation`
    fn linked(&self, owner: &O, relation: &str) -> Result<Vec<R>, Self::Error>;

    /// Whether `relation` is already loaded on `owner` (reading it needs no fetch)
    fn is_relation_loaded(&self, owner: &O, relation: &str) -> bool;

    /// Resolve keys to related entities
    ///
    /// Keys with no matching entity are simply absent from the result.
    fn find_by_keys(&self, keys: &[NormalizedKey]) -> Result<Vec<R>, Self::Error>;

    /// Create the junction row between `owner` and `related`
    fn link(
        &self,
        owner: &O,
        relation: &str,
        related: &R,
        extra_columns: &[(String, Value)],
    ) -> Result<(), Self::Error>;

    /// Remove (`delete = true`) or detach the junction row between `owner` and `related`
    fn unlink(&self, owner: &O, relation: &str, related: &R, delete: bool) -> Result<(), Self::Error>;

    /// Remove or detach every junction row of `relation` for `owner`
    ///
    /// Must succeed when there is nothing to remove.
    fn unlink_all(&self, owner: &O, relation: &str, delete: bool) -> Result<(), Self::Error>;
}
