//! Many-to-many relation reconciler.
//!
//! [`LinkMany`] keeps the desired reference keys for one relation of one owner
//! entity and, after the owner is saved, turns the difference between those
//! keys and the persisted junction rows into the minimal set of unlink/link
//! calls on a [`LinkStore`].
//!
//! # Example
//!
//! ```
//! use linkmany::memory::MemoryLinkStore;
//! use linkmany::{LinkEntity, LinkMany, PrimaryKey};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Item { id: i32 }
//! #[derive(Debug, Clone, PartialEq)]
//! struct Group { id: i32 }
//!
//! impl LinkEntity for Item {
//!     fn primary_key(&self) -> PrimaryKey { self.id.into() }
//! }
//! impl LinkEntity for Group {
//!     fn primary_key(&self) -> PrimaryKey { self.id.into() }
//! }
//!
//! let store = MemoryLinkStore::new((1..=4).map(|id| Group { id }));
//! let item = Item { id: 1 };
//!
//! let mut group_ids = LinkMany::<Group>::new("groups");
//! group_ids.set_desired_references(vec![2, 4]);
//!
//! // Host calls this after the item row is inserted or updated
//! let report = group_ids.after_update(&store, &item).unwrap();
//! assert_eq!(report.linked.len(), 2);
//! ```

use crate::config::LinkManyConfig;
use crate::error::{LinkError, LinkOperation};
use crate::extra::{ExtraColumn, ExtraColumns};
use crate::key::NormalizedKey;
use crate::store::{LinkEntity, LinkStore};
use std::collections::{HashMap, HashSet};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Input accepted by [`LinkMany::set_desired_references`]
///
/// `Null` marks the references as uninitialized again; everything else
/// initializes them. An empty string is treated like an empty list, the way
/// an empty form field clears a multi-select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceInput {
    /// Forget the current value; the next read loads persisted state
    Null,
    /// Exactly one reference
    One(NormalizedKey),
    /// Ordered references, duplicates allowed
    Many(Vec<NormalizedKey>),
}

impl ReferenceInput {
    fn into_references(self) -> Option<Vec<NormalizedKey>> {
        match self {
            ReferenceInput::Null => None,
            ReferenceInput::One(key) => Some(vec![key]),
            ReferenceInput::Many(keys) => Some(keys),
        }
    }
}

impl From<NormalizedKey> for ReferenceInput {
    fn from(key: NormalizedKey) -> Self {
        ReferenceInput::One(key)
    }
}

impl<K: Into<NormalizedKey>> From<Vec<K>> for ReferenceInput {
    fn from(keys: Vec<K>) -> Self {
        ReferenceInput::Many(keys.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<NormalizedKey>, const N: usize> From<[K; N]> for ReferenceInput {
    fn from(keys: [K; N]) -> Self {
        ReferenceInput::Many(keys.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<NormalizedKey> + Clone> From<&[K]> for ReferenceInput {
    fn from(keys: &[K]) -> Self {
        ReferenceInput::Many(keys.iter().cloned().map(Into::into).collect())
    }
}

impl<K: Into<NormalizedKey>> From<Option<Vec<K>>> for ReferenceInput {
    fn from(keys: Option<Vec<K>>) -> Self {
        match keys {
            Some(keys) => keys.into(),
            None => ReferenceInput::Null,
        }
    }
}

impl From<&str> for ReferenceInput {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            ReferenceInput::Many(Vec::new())
        } else {
            ReferenceInput::One(value.into())
        }
    }
}

impl From<String> for ReferenceInput {
    fn from(value: String) -> Self {
        ReferenceInput::from(value.as_str())
    }
}

impl From<uuid::Uuid> for ReferenceInput {
    fn from(value: uuid::Uuid) -> Self {
        ReferenceInput::One(value.into())
    }
}

macro_rules! impl_int_reference {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ReferenceInput {
                fn from(value: $ty) -> Self {
                    ReferenceInput::One(value.into())
                }
            }
        )*
    };
}

impl_int_reference!(i8, i16, i32, i64, u8, u16, u32, u64);

/// What a reconcile pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// True when references were never initialized and nothing was touched
    pub skipped: bool,
    /// Keys of newly linked entities, in desired order
    pub linked: Vec<NormalizedKey>,
    /// Keys of unlinked entities, in persisted order
    pub unlinked: Vec<NormalizedKey>,
    /// Desired keys that matched no entity and were left out
    pub dropped: Vec<NormalizedKey>,
}

impl ReconcileReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// True when no junction row was created or removed
    pub fn is_noop(&self) -> bool {
        self.linked.is_empty() && self.unlinked.is_empty()
    }
}

/// Reconciler for one many-to-many relation of one owner entity
///
/// Construct one per owner instance, set (or read) the desired references,
/// then call the lifecycle hooks from the owner's persistence code:
/// [`after_insert`](Self::after_insert) / [`after_update`](Self::after_update)
/// once the owner row is written, [`after_delete`](Self::after_delete) once it
/// is gone.
pub struct LinkMany<R> {
    relation: String,
    reference_attribute: Option<String>,
    references: Option<Vec<NormalizedKey>>,
    extra_columns: ExtraColumns<R>,
    delete_on_unlink: bool,
    strict_resolution: bool,
}

impl<R> LinkMany<R> {
    /// Create a reconciler for `relation`
    ///
    /// The name is validated lazily: an empty name surfaces as
    /// [`LinkError::Configuration`] from the first operation that needs storage.
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            reference_attribute: None,
            references: None,
            extra_columns: ExtraColumns::new(),
            delete_on_unlink: true,
            strict_resolution: false,
        }
    }

    /// Create a reconciler from loaded configuration
    ///
    /// Configured extra columns are literals; add generators afterwards with
    /// [`with_extra_column`](Self::with_extra_column).
    pub fn from_config(config: &LinkManyConfig) -> Self {
        let mut link_many = Self::new(config.relation.clone())
            .with_delete_on_unlink(config.delete_on_unlink)
            .with_strict_resolution(config.strict_resolution);
        link_many.reference_attribute = config.reference_attribute.clone();
        for (name, value) in config.extra_column_values() {
            link_many.extra_columns.set(name, ExtraColumn::Literal(value));
        }
        link_many
    }

    /// Name of the virtual attribute the host exposes the references as
    pub fn with_reference_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.reference_attribute = Some(attribute.into());
        self
    }

    /// Attach an extra column to every new junction row
    pub fn with_extra_column(mut self, name: impl Into<String>, column: ExtraColumn<R>) -> Self {
        self.extra_columns.set(name, column);
        self
    }

    /// Whether unlinking deletes the junction row (default) or only detaches it
    pub fn with_delete_on_unlink(mut self, delete: bool) -> Self {
        self.delete_on_unlink = delete;
        self
    }

    /// Fail instead of silently dropping desired keys that match no entity
    pub fn with_strict_resolution(mut self, strict: bool) -> Self {
        self.strict_resolution = strict;
        self
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn reference_attribute(&self) -> Option<&str> {
        self.reference_attribute.as_deref()
    }

    pub fn delete_on_unlink(&self) -> bool {
        self.delete_on_unlink
    }

    pub fn set_delete_on_unlink(&mut self, delete: bool) {
        self.delete_on_unlink = delete;
    }

    pub fn strict_resolution(&self) -> bool {
        self.strict_resolution
    }

    pub fn extra_columns(&self) -> &ExtraColumns<R> {
        &self.extra_columns
    }

    pub fn extra_columns_mut(&mut self) -> &mut ExtraColumns<R> {
        &mut self.extra_columns
    }

    /// Set the desired reference keys
    ///
    /// Stored as given: no deduplication happens here, so callers can still
    /// validate the raw input. [`ReferenceInput::Null`] resets the reconciler to
    /// the uninitialized state.
    pub fn set_desired_references(&mut self, values: impl Into<ReferenceInput>) {
        self.references = values.into().into_references();
    }

    /// Desired references if set or already loaded, without touching storage
    pub fn references(&self) -> Option<&[NormalizedKey]> {
        self.references.as_deref()
    }

    /// Whether the references were set explicitly or loaded from storage
    pub fn is_initialized(&self) -> bool {
        self.references.is_some()
    }

    fn checked_relation(&self) -> Result<&str, LinkError> {
        if self.relation.trim().is_empty() {
            return Err(LinkError::Configuration(match &self.reference_attribute {
                Some(attribute) => format!("relation name is not set for attribute '{attribute}'"),
                None => "relation name is not set".to_string(),
            }));
        }
        Ok(&self.relation)
    }

    fn fail<E>(&self, operation: LinkOperation, key: Option<NormalizedKey>, err: E) -> LinkError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        log::error!(
            "linkmany: {} on relation '{}' failed: {}",
            operation,
            self.relation,
            err
        );
        #[cfg(feature = "metrics")]
        METRICS.record_persistence_error(operation);
        LinkError::persistence(operation, key, err)
    }
}

impl<R: LinkEntity> LinkMany<R> {
    /// Desired reference keys, loaded from storage on first read if never set
    ///
    /// The loaded list keeps the persisted order and is cached; later calls
    /// return it without touching storage.
    pub fn desired_references<O, S>(&mut self, store: &S, owner: &O) -> Result<&[NormalizedKey], LinkError>
    where
        S: LinkStore<O, R>,
    {
        let references = match self.references.take() {
            Some(references) => references,
            None => self.load_references(store, owner)?,
        };
        Ok(self.references.insert(references).as_slice())
    }

    fn load_references<O, S>(&self, store: &S, owner: &O) -> Result<Vec<NormalizedKey>, LinkError>
    where
        S: LinkStore<O, R>,
    {
        let relation = self.checked_relation()?;
        if !store.is_relation_loaded(owner, relation) {
            log::debug!("linkmany: loading relation '{relation}' to initialize references");
        }
        let linked = store
            .linked(owner, relation)
            .map_err(|e| self.fail(LinkOperation::FetchLinked, None, e))?;
        Ok(linked.iter().map(LinkEntity::normalized_key).collect())
    }

    /// Bring the persisted junction rows in line with the desired references
    ///
    /// Does nothing (and makes no storage call) when the references were never
    /// initialized. Otherwise unlinks every linked entity whose key is not
    /// desired, then links every desired key not yet linked, in that order.
    /// The first storage failure aborts the pass; already applied operations
    /// stay applied.
    pub fn reconcile<O, S>(&self, store: &S, owner: &O) -> Result<ReconcileReport, LinkError>
    where
        S: LinkStore<O, R>,
    {
        let relation = self.checked_relation()?;
        let Some(references) = self.references.as_deref() else {
            log::debug!("linkmany: references for '{relation}' never initialized, nothing to reconcile");
            return Ok(ReconcileReport::skipped());
        };

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::reconcile_span(relation).entered();
        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let result = self.apply(store, owner, relation, references);

        #[cfg(feature = "metrics")]
        METRICS.record_reconcile_duration(start.elapsed());

        result
    }

    fn apply<O, S>(
        &self,
        store: &S,
        owner: &O,
        relation: &str,
        references: &[NormalizedKey],
    ) -> Result<ReconcileReport, LinkError>
    where
        S: LinkStore<O, R>,
    {
        let pending = unique_keys(references);
        let mut unmatched: HashSet<&NormalizedKey> = pending.iter().collect();

        let linked = store
            .linked(owner, relation)
            .map_err(|e| self.fail(LinkOperation::FetchLinked, None, e))?;

        let mut to_unlink = Vec::new();
        for entity in linked {
            let key = entity.normalized_key();
            if !unmatched.remove(&key) {
                to_unlink.push((key, entity));
            }
        }

        let pending: Vec<NormalizedKey> = pending
            .iter()
            .filter(|key| unmatched.contains(key))
            .cloned()
            .collect();

        let mut to_link = Vec::new();
        let mut dropped = Vec::new();
        if !pending.is_empty() {
            let mut found: HashMap<NormalizedKey, R> = store
                .find_by_keys(&pending)
                .map_err(|e| self.fail(LinkOperation::FindByKeys, None, e))?
                .into_iter()
                .map(|entity| (entity.normalized_key(), entity))
                .collect();
            for key in pending {
                match found.remove(&key) {
                    Some(entity) => to_link.push((key, entity)),
                    None => dropped.push(key),
                }
            }
        }

        if !dropped.is_empty() {
            if self.strict_resolution {
                return Err(LinkError::UnresolvedReferences(dropped));
            }
            log::warn!(
                "linkmany: {} reference(s) on '{}' matched no entity and were dropped: {:?}",
                dropped.len(),
                relation,
                dropped
            );
            #[cfg(feature = "metrics")]
            METRICS.record_dropped(dropped.len());
        }

        log::debug!(
            "linkmany: reconciling '{}': {} to unlink, {} to link",
            relation,
            to_unlink.len(),
            to_link.len()
        );

        let mut report = ReconcileReport {
            dropped,
            ..ReconcileReport::default()
        };

        for (key, entity) in to_unlink {
            store
                .unlink(owner, relation, &entity, self.delete_on_unlink)
                .map_err(|e| self.fail(LinkOperation::Unlink, Some(key.clone()), e))?;
            log::trace!("linkmany: unlinked {key} from '{relation}'");
            #[cfg(feature = "metrics")]
            METRICS.record_unlink();
            report.unlinked.push(key);
        }

        for (key, entity) in to_link {
            let extra_columns = self.extra_columns.resolve(&entity);
            store
                .link(owner, relation, &entity, &extra_columns)
                .map_err(|e| self.fail(LinkOperation::Link, Some(key.clone()), e))?;
            log::trace!("linkmany: linked {key} to '{relation}'");
            #[cfg(feature = "metrics")]
            METRICS.record_link();
            report.linked.push(key);
        }

        Ok(report)
    }

    /// Remove (or detach) every junction row of the relation
    ///
    /// Runs regardless of initialization state: the owner is gone, so none of
    /// its junction rows may remain.
    pub fn reconcile_delete<O, S>(&self, store: &S, owner: &O) -> Result<(), LinkError>
    where
        S: LinkStore<O, R>,
    {
        let relation = self.checked_relation()?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::reconcile_delete_span(relation).entered();

        store
            .unlink_all(owner, relation, self.delete_on_unlink)
            .map_err(|e| self.fail(LinkOperation::UnlinkAll, None, e))?;
        log::debug!(
            "linkmany: cleared relation '{}' (delete = {})",
            relation,
            self.delete_on_unlink
        );
        Ok(())
    }

    /// Hook for the host: the owner row was inserted
    pub fn after_insert<O, S>(&self, store: &S, owner: &O) -> Result<ReconcileReport, LinkError>
    where
        S: LinkStore<O, R>,
    {
        self.reconcile(store, owner)
    }

    /// Hook for the host: the owner row was updated
    pub fn after_update<O, S>(&self, store: &S, owner: &O) -> Result<ReconcileReport, LinkError>
    where
        S: LinkStore<O, R>,
    {
        self.reconcile(store, owner)
    }

    /// Hook for the host: the owner row was deleted
    pub fn after_delete<O, S>(&self, store: &S, owner: &O) -> Result<(), LinkError>
    where
        S: LinkStore<O, R>,
    {
        self.reconcile_delete(store, owner)
    }
}

impl<R> std::fmt::Debug for LinkMany<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkMany")
            .field("relation", &self.relation)
            .field("reference_attribute", &self.reference_attribute)
            .field("references", &self.references)
            .field("extra_columns", &self.extra_columns)
            .field("delete_on_unlink", &self.delete_on_unlink)
            .field("strict_resolution", &self.strict_resolution)
            .finish()
    }
}

/// Canonicalize, then deduplicate keeping first occurrences
fn unique_keys(keys: &[NormalizedKey]) -> Vec<NormalizedKey> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter()
        .cloned()
        .map(NormalizedKey::canonical)
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryLinkStore, StoreCall};
    use crate::key::PrimaryKey;
    use sea_query::Value;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: i32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Group {
        id: i32,
    }

    impl LinkEntity for Item {
        fn primary_key(&self) -> PrimaryKey {
            self.id.into()
        }
    }

    impl LinkEntity for Group {
        fn primary_key(&self) -> PrimaryKey {
            self.id.into()
        }
    }

    fn keys(ids: &[i32]) -> Vec<NormalizedKey> {
        ids.iter().map(|id| NormalizedKey::from(*id)).collect()
    }

    /// Groups 1..=5, item 1 linked to groups 1 and 2
    fn fixture() -> (MemoryLinkStore<Item, Group>, Item) {
        let store = MemoryLinkStore::new((1..=5).map(|id| Group { id }));
        let item = Item { id: 1 };
        store.seed_link(&item, "groups", &Group { id: 1 });
        store.seed_link(&item, "groups", &Group { id: 2 });
        store.clear_calls();
        (store, item)
    }

    #[test]
    fn test_set_and_get_references_without_relation() {
        let mut link_many: LinkMany<Group> = LinkMany::new("");

        link_many.set_desired_references(vec![1, 2]);
        assert!(link_many.is_initialized());
        assert_eq!(link_many.references(), Some(keys(&[1, 2]).as_slice()));

        link_many.set_desired_references(Vec::<i32>::new());
        assert_eq!(link_many.references(), Some(&[][..]));

        link_many.set_desired_references("");
        assert!(link_many.is_initialized());
        assert_eq!(link_many.references(), Some(&[][..]));

        link_many.set_desired_references(ReferenceInput::Null);
        assert!(!link_many.is_initialized());
    }

    #[test]
    fn test_scalar_becomes_single_element_list() {
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        link_many.set_desired_references(7);
        assert_eq!(link_many.references(), Some(keys(&[7]).as_slice()));

        link_many.set_desired_references("abc");
        assert_eq!(link_many.references(), Some(&[NormalizedKey::from("abc")][..]));
    }

    #[test]
    fn test_setter_keeps_duplicates_and_order() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        link_many.set_desired_references([3, 1, 3]);

        let references = link_many.desired_references(&store, &item).unwrap().to_vec();
        assert_eq!(references, keys(&[3, 1, 3]));
        assert!(store.calls().is_empty());
    }

    #[test]
    fn test_desired_references_load_once() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");

        let first = link_many.desired_references(&store, &item).unwrap().to_vec();
        let second = link_many.desired_references(&store, &item).unwrap().to_vec();

        assert_eq!(first, keys(&[1, 2]));
        assert_eq!(first, second);
        let fetches = store
            .calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::Linked { .. }))
            .count();
        assert_eq!(fetches, 1);
    }

    #[test]
    fn test_lazy_load_requires_relation_name() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("  ");
        let err = link_many.desired_references(&store, &item).unwrap_err();
        assert!(matches!(err, LinkError::Configuration(_)));
    }

    #[test]
    fn test_reconcile_uninitialized_makes_no_calls() {
        let (store, item) = fixture();
        let link_many: LinkMany<Group> = LinkMany::new("groups");

        let report = link_many.reconcile(&store, &item).unwrap();

        assert!(report.skipped);
        assert!(store.calls().is_empty());
    }

    #[test]
    fn test_reconcile_diff() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        link_many.set_desired_references(vec![2, 4]);

        let report = link_many.reconcile(&store, &item).unwrap();

        assert_eq!(report.unlinked, keys(&[1]));
        assert_eq!(report.linked, keys(&[4]));
        assert!(report.dropped.is_empty());
        let finds: Vec<_> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::FindByKeys { keys } => Some(keys),
                _ => None,
            })
            .collect();
        assert_eq!(finds, vec![keys(&[4])]);
        assert_eq!(store.linked_keys(&item, "groups"), keys(&[2, 4]));
    }

    #[test]
    fn test_unlinks_run_before_links() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        link_many.set_desired_references(vec![3]);

        link_many.reconcile(&store, &item).unwrap();

        let mutations: Vec<_> = store
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::Link { .. } | StoreCall::Unlink { .. }))
            .collect();
        assert_eq!(
            mutations,
            vec![
                StoreCall::Unlink { key: NormalizedKey::from(1), delete: true },
                StoreCall::Unlink { key: NormalizedKey::from(2), delete: true },
                StoreCall::Link { key: NormalizedKey::from(3), extra_columns: vec![] },
            ]
        );
    }

    #[test]
    fn test_duplicates_collapse_to_noop() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        link_many.set_desired_references(vec![1, 2, 2]);

        let report = link_many.reconcile(&store, &item).unwrap();

        assert!(report.is_noop());
        assert_eq!(store.calls(), vec![StoreCall::Linked { relation: "groups".into() }]);
    }

    #[test]
    fn test_explicit_empty_list_unlinks_everything() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        link_many.set_desired_references(Vec::<i32>::new());

        let report = link_many.reconcile(&store, &item).unwrap();

        assert_eq!(report.unlinked, keys(&[1, 2]));
        assert!(report.linked.is_empty());
        assert!(store.linked_keys(&item, "groups").is_empty());
        assert!(!store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::FindByKeys { .. })));
    }

    #[test]
    fn test_unresolvable_key_is_dropped() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        link_many.set_desired_references(vec![1, 2, 3, 99]);

        let report = link_many.reconcile(&store, &item).unwrap();

        assert_eq!(report.linked, keys(&[3]));
        assert_eq!(report.dropped, keys(&[99]));
        assert_eq!(store.linked_keys(&item, "groups"), keys(&[1, 2, 3]));
    }

    #[test]
    fn test_strict_resolution_rejects_before_mutating() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups").with_strict_resolution(true);
        link_many.set_desired_references(vec![3, 99]);

        let err = link_many.reconcile(&store, &item).unwrap_err();

        match err {
            LinkError::UnresolvedReferences(missing) => assert_eq!(missing, keys(&[99])),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.linked_keys(&item, "groups"), keys(&[1, 2]));
    }

    #[test]
    fn test_generator_runs_per_linked_entity() {
        let store = MemoryLinkStore::new((1..=3).map(|id| Group { id }));
        let item = Item { id: 10 };
        let mut link_many = LinkMany::new("groups")
            .with_extra_column("note", ExtraColumn::literal("test"))
            .with_extra_column(
                "group_ref",
                ExtraColumn::generator(|g: &Group| Value::from(g.id * 100)),
            );
        link_many.set_desired_references(vec![1, 3]);

        link_many.reconcile(&store, &item).unwrap();

        let links: Vec<_> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Link { key, extra_columns } => Some((key, extra_columns)),
                _ => None,
            })
            .collect();
        assert_eq!(
            links,
            vec![
                (
                    NormalizedKey::from(1),
                    vec![
                        ("note".to_string(), Value::from("test")),
                        ("group_ref".to_string(), Value::from(100)),
                    ]
                ),
                (
                    NormalizedKey::from(3),
                    vec![
                        ("note".to_string(), Value::from("test")),
                        ("group_ref".to_string(), Value::from(300)),
                    ]
                ),
            ]
        );
    }

    #[test]
    fn test_reconcile_does_not_touch_references() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        link_many.set_desired_references(vec![4, 4, 2]);

        link_many.reconcile(&store, &item).unwrap();

        assert_eq!(link_many.references(), Some(keys(&[4, 4, 2]).as_slice()));
    }

    #[test]
    fn test_reconcile_requires_relation_name() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("").with_reference_attribute("group_ids");
        link_many.set_desired_references(vec![1]);

        let err = link_many.reconcile(&store, &item).unwrap_err();

        assert_eq!(
            err.to_string(),
            "Configuration error: relation name is not set for attribute 'group_ids'"
        );
        assert!(store.calls().is_empty());
    }

    #[test]
    fn test_reconcile_delete_ignores_initialization() {
        let (store, item) = fixture();
        let link_many: LinkMany<Group> = LinkMany::new("groups");

        link_many.after_delete(&store, &item).unwrap();

        assert_eq!(
            store.calls(),
            vec![StoreCall::UnlinkAll { relation: "groups".into(), delete: true }]
        );
        assert!(store.linked_keys(&item, "groups").is_empty());
        // Nothing left to remove is still a success
        link_many.reconcile_delete(&store, &item).unwrap();
    }

    #[test]
    fn test_unique_keys_keeps_first_occurrence() {
        assert_eq!(unique_keys(&keys(&[3, 1, 3, 2, 1])), keys(&[3, 1, 2]));
    }

    #[test]
    fn test_unique_keys_merges_equivalent_shapes() {
        let input = vec![
            NormalizedKey::Tuple(vec![NormalizedKey::Int(1)]),
            NormalizedKey::Int(1),
            NormalizedKey::Int(2),
        ];
        assert_eq!(unique_keys(&input), keys(&[1, 2]));
    }

    #[test]
    fn test_single_element_tuples_match_linked_rows() {
        let (store, item) = fixture();
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        let references: Vec<NormalizedKey> = serde_json::from_str("[[1], [2]]").unwrap();
        link_many.set_desired_references(references);

        let report = link_many.reconcile(&store, &item).unwrap();

        assert!(report.is_noop());
        assert!(report.dropped.is_empty());
        assert_eq!(store.linked_keys(&item, "groups"), keys(&[1, 2]));

        // Hand-built tuples are canonicalized the same way
        link_many.set_desired_references(vec![
            NormalizedKey::Tuple(vec![NormalizedKey::Int(2)]),
            NormalizedKey::Tuple(vec![NormalizedKey::Int(3)]),
        ]);
        let report = link_many.reconcile(&store, &item).unwrap();
        assert_eq!(report.unlinked, keys(&[1]));
        assert_eq!(report.linked, keys(&[3]));
        assert!(report.dropped.is_empty());
    }

    #[test]
    fn test_large_reference_list_diffs_in_order() {
        let store = MemoryLinkStore::new((1..=500).map(|id| Group { id }));
        let item = Item { id: 1 };
        for id in (1..=500).step_by(2) {
            store.seed_link(&item, "groups", &Group { id });
        }
        let mut link_many: LinkMany<Group> = LinkMany::new("groups");
        let desired: Vec<i32> = (1..=500).rev().filter(|id| id % 3 != 0).collect();
        link_many.set_desired_references(desired.clone());

        let report = link_many.reconcile(&store, &item).unwrap();

        let expected_unlinked: Vec<i32> = (1..=500).step_by(2).filter(|id| id % 3 == 0).collect();
        let expected_linked: Vec<i32> = desired.iter().copied().filter(|id| id % 2 == 0).collect();
        assert_eq!(report.unlinked, keys(&expected_unlinked));
        assert_eq!(report.linked, keys(&expected_linked));
        let mut now_linked = store.linked_keys(&item, "groups");
        now_linked.sort();
        let mut wanted = keys(&desired);
        wanted.sort();
        assert_eq!(now_linked, wanted);
    }
}
