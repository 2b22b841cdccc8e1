//! In-memory [`LinkStore`] for tests and prototyping.
//!
//! Keeps a catalog of related entities and a junction table in `RefCell`s and
//! journals every collaborator call, so callers can assert on exactly what a
//! reconcile pass asked the data layer to do. Failures can be injected per
//! operation to exercise the abort path.

use crate::error::LinkOperation;
use crate::key::NormalizedKey;
use crate::store::{LinkEntity, LinkStore};
use sea_query::Value;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

/// One collaborator call, as recorded by [`MemoryLinkStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Linked { relation: String },
    IsRelationLoaded { relation: String },
    FindByKeys { keys: Vec<NormalizedKey> },
    Link { key: NormalizedKey, extra_columns: Vec<(String, Value)> },
    Unlink { key: NormalizedKey, delete: bool },
    UnlinkAll { relation: String, delete: bool },
}

/// A junction row
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionRow {
    pub owner: NormalizedKey,
    pub relation: String,
    pub related: NormalizedKey,
    pub extra_columns: Vec<(String, Value)>,
    /// Set when the row was unlinked without deleting it
    pub detached: bool,
}

/// Error returned by [`MemoryLinkStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryStoreError {
    /// Failure injected with [`MemoryLinkStore::fail_on`]
    Injected(LinkOperation),
    /// An active junction row already exists for this pair
    DuplicateLink(NormalizedKey),
}

impl fmt::Display for MemoryStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryStoreError::Injected(operation) => write!(f, "injected failure on {operation}"),
            MemoryStoreError::DuplicateLink(key) => write!(f, "junction row for {key} already exists"),
        }
    }
}

impl std::error::Error for MemoryStoreError {}

/// In-memory junction table keyed by normalized owner and related keys
pub struct MemoryLinkStore<O, R> {
    catalog: Vec<R>,
    rows: RefCell<Vec<JunctionRow>>,
    loaded: RefCell<HashSet<(NormalizedKey, String)>>,
    calls: RefCell<Vec<StoreCall>>,
    failure: RefCell<Option<(LinkOperation, Option<NormalizedKey>)>>,
    _owner: PhantomData<fn(&O)>,
}

impl<O: LinkEntity, R: LinkEntity + Clone> MemoryLinkStore<O, R> {
    /// Store whose `find_by_keys` resolves against `catalog`
    pub fn new(catalog: impl IntoIterator<Item = R>) -> Self {
        Self {
            catalog: catalog.into_iter().collect(),
            rows: RefCell::new(Vec::new()),
            loaded: RefCell::new(HashSet::new()),
            calls: RefCell::new(Vec::new()),
            failure: RefCell::new(None),
            _owner: PhantomData,
        }
    }

    /// Insert a junction row directly, without journaling
    pub fn seed_link(&self, owner: &O, relation: &str, related: &R) {
        self.rows.borrow_mut().push(JunctionRow {
            owner: owner.normalized_key(),
            relation: relation.to_string(),
            related: related.normalized_key(),
            extra_columns: Vec::new(),
            detached: false,
        });
    }

    /// Fail the next `operation` call (only for `key`, when given)
    pub fn fail_on(&self, operation: LinkOperation, key: Option<NormalizedKey>) {
        *self.failure.borrow_mut() = Some((operation, key));
    }

    /// Recorded calls, oldest first
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// All junction rows, including detached ones
    pub fn rows(&self) -> Vec<JunctionRow> {
        self.rows.borrow().clone()
    }

    /// Active junction rows of `relation` for `owner`
    pub fn rows_for(&self, owner: &O, relation: &str) -> Vec<JunctionRow> {
        let owner_key = owner.normalized_key();
        self.rows
            .borrow()
            .iter()
            .filter(|row| !row.detached && row.owner == owner_key && row.relation == relation)
            .cloned()
            .collect()
    }

    /// Keys linked to `owner` through `relation`, in link order
    pub fn linked_keys(&self, owner: &O, relation: &str) -> Vec<NormalizedKey> {
        self.rows_for(owner, relation)
            .into_iter()
            .map(|row| row.related)
            .collect()
    }

    /// Mark `relation` as loaded on `owner`, as if the host had read it
    pub fn mark_loaded(&self, owner: &O, relation: &str) {
        self.loaded
            .borrow_mut()
            .insert((owner.normalized_key(), relation.to_string()));
    }

    fn record(&self, call: StoreCall) {
        self.calls.borrow_mut().push(call);
    }

    fn check_failure(&self, operation: LinkOperation, key: Option<&NormalizedKey>) -> Result<(), MemoryStoreError> {
        let mut failure = self.failure.borrow_mut();
        let hit = match failure.as_ref() {
            Some((op, None)) => *op == operation,
            Some((op, Some(target))) => *op == operation && Some(target) == key,
            None => false,
        };
        if hit {
            *failure = None;
            return Err(MemoryStoreError::Injected(operation));
        }
        Ok(())
    }

    fn remove_rows<F>(&self, delete: bool, matches: F)
    where
        F: Fn(&JunctionRow) -> bool,
    {
        let mut rows = self.rows.borrow_mut();
        if delete {
            rows.retain(|row| row.detached || !matches(row));
        } else {
            for row in rows.iter_mut().filter(|row| !row.detached && matches(row)) {
                row.detached = true;
            }
        }
    }
}

impl<O: LinkEntity, R: LinkEntity + Clone> LinkStore<O, R> for MemoryLinkStore<O, R> {
    type Error = MemoryStoreError;

    fn linked(&self, owner: &O, relation: &str) -> Result<Vec<R>, Self::Error> {
        self.record(StoreCall::Linked {
            relation: relation.to_string(),
        });
        self.check_failure(LinkOperation::FetchLinked, None)?;
        self.mark_loaded(owner, relation);
        let linked = self
            .linked_keys(owner, relation)
            .into_iter()
            .filter_map(|key| self.catalog.iter().find(|r| r.normalized_key() == key).cloned())
            .collect();
        Ok(linked)
    }

    fn is_relation_loaded(&self, owner: &O, relation: &str) -> bool {
        self.record(StoreCall::IsRelationLoaded {
            relation: relation.to_string(),
        });
        self.loaded
            .borrow()
            .contains(&(owner.normalized_key(), relation.to_string()))
    }

    fn find_by_keys(&self, keys: &[NormalizedKey]) -> Result<Vec<R>, Self::Error> {
        self.record(StoreCall::FindByKeys { keys: keys.to_vec() });
        self.check_failure(LinkOperation::FindByKeys, None)?;
        Ok(self
            .catalog
            .iter()
            .filter(|r| keys.contains(&r.normalized_key()))
            .cloned()
            .collect())
    }

    fn link(
        &self,
        owner: &O,
        relation: &str,
        related: &R,
        extra_columns: &[(String, Value)],
    ) -> Result<(), Self::Error> {
        let key = related.normalized_key();
        self.record(StoreCall::Link {
            key: key.clone(),
            extra_columns: extra_columns.to_vec(),
        });
        self.check_failure(LinkOperation::Link, Some(&key))?;
        if self.linked_keys(owner, relation).contains(&key) {
            return Err(MemoryStoreError::DuplicateLink(key));
        }
        self.rows.borrow_mut().push(JunctionRow {
            owner: owner.normalized_key(),
            relation: relation.to_string(),
            related: key,
            extra_columns: extra_columns.to_vec(),
            detached: false,
        });
        Ok(())
    }

    fn unlink(&self, owner: &O, relation: &str, related: &R, delete: bool) -> Result<(), Self::Error> {
        let key = related.normalized_key();
        self.record(StoreCall::Unlink {
            key: key.clone(),
            delete,
        });
        self.check_failure(LinkOperation::Unlink, Some(&key))?;
        let owner_key = owner.normalized_key();
        self.remove_rows(delete, |row| {
            row.owner == owner_key && row.relation == relation && row.related == key
        });
        Ok(())
    }

    fn unlink_all(&self, owner: &O, relation: &str, delete: bool) -> Result<(), Self::Error> {
        self.record(StoreCall::UnlinkAll {
            relation: relation.to_string(),
            delete,
        });
        self.check_failure(LinkOperation::UnlinkAll, None)?;
        let owner_key = owner.normalized_key();
        self.remove_rows(delete, |row| row.owner == owner_key && row.relation == relation);
        Ok(())
    }
}

impl<O, R> fmt::Debug for MemoryLinkStore<O, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLinkStore")
            .field("catalog_len", &self.catalog.len())
            .field("rows", &self.rows.borrow().len())
            .field("calls", &self.calls.borrow().len())
            .finish()
    }
}
