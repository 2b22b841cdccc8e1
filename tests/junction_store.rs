//! A SQL-flavoured store: every mutation is rendered through `JunctionTable`
//! and journaled before being applied to the in-memory rows.

use linkmany::junction::{find_by_keys_statement, JunctionTable};
use linkmany::memory::{MemoryLinkStore, MemoryStoreError};
use linkmany::{
    ExtraColumn, LinkEntity, LinkError, LinkMany, LinkOperation, LinkStore, NormalizedKey, PrimaryKey,
};
use sea_query::{PostgresQueryBuilder, Value};
use std::cell::RefCell;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone)]
struct Item {
    id: i32,
}

#[derive(Debug, Clone)]
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

#[derive(Debug)]
enum SqlStoreError {
    Statement(LinkError),
    Backend(MemoryStoreError),
}

impl fmt::Display for SqlStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlStoreError::Statement(e) => write!(f, "statement error: {e}"),
            SqlStoreError::Backend(e) => write!(f, "backend error: {e}"),
        }
    }
}

impl std::error::Error for SqlStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SqlStoreError::Statement(e) => Some(e),
            SqlStoreError::Backend(e) => Some(e),
        }
    }
}

impl From<LinkError> for SqlStoreError {
    fn from(e: LinkError) -> Self {
        SqlStoreError::Statement(e)
    }
}

impl From<MemoryStoreError> for SqlStoreError {
    fn from(e: MemoryStoreError) -> Self {
        SqlStoreError::Backend(e)
    }
}

struct SqlJournalStore {
    junction: JunctionTable,
    backend: MemoryLinkStore<Item, Group>,
    journal: RefCell<Vec<String>>,
}

impl SqlJournalStore {
    fn new(junction: JunctionTable) -> Self {
        let backend = MemoryLinkStore::new((1..=4).map(|id| Group { id }));
        backend.seed_link(&Item { id: 1 }, "groups", &Group { id: 1 });
        backend.seed_link(&Item { id: 1 }, "groups", &Group { id: 2 });
        Self {
            junction,
            backend,
            journal: RefCell::new(Vec::new()),
        }
    }

    fn push(&self, sql: String) {
        self.journal.borrow_mut().push(sql);
    }

    fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }
}

impl LinkStore<Item, Group> for SqlJournalStore {
    type Error = SqlStoreError;

    fn linked(&self, owner: &Item, relation: &str) -> Result<Vec<Group>, Self::Error> {
        let stmt = self
            .junction
            .linked_statement("group", &["id"], &owner.normalized_key())?;
        self.push(stmt.to_string(PostgresQueryBuilder));
        Ok(self.backend.linked(owner, relation)?)
    }

    fn is_relation_loaded(&self, owner: &Item, relation: &str) -> bool {
        self.backend.is_relation_loaded(owner, relation)
    }

    fn find_by_keys(&self, keys: &[NormalizedKey]) -> Result<Vec<Group>, Self::Error> {
        let stmt = find_by_keys_statement("group", &["id"], keys)?;
        self.push(stmt.to_string(PostgresQueryBuilder));
        Ok(self.backend.find_by_keys(keys)?)
    }

    fn link(
        &self,
        owner: &Item,
        relation: &str,
        related: &Group,
        extra_columns: &[(String, Value)],
    ) -> Result<(), Self::Error> {
        let stmt = self.junction.link_statement(
            &owner.normalized_key(),
            &related.normalized_key(),
            extra_columns,
        )?;
        self.push(stmt.to_string(PostgresQueryBuilder));
        Ok(self.backend.link(owner, relation, related, extra_columns)?)
    }

    fn unlink(&self, owner: &Item, relation: &str, related: &Group, delete: bool) -> Result<(), Self::Error> {
        let stmt = self
            .junction
            .unlink_statement(&owner.normalized_key(), &related.normalized_key(), delete)?;
        self.push(stmt.to_sql_string());
        Ok(self.backend.unlink(owner, relation, related, delete)?)
    }

    fn unlink_all(&self, owner: &Item, relation: &str, delete: bool) -> Result<(), Self::Error> {
        let stmt = self.junction.unlink_all_statement(&owner.normalized_key(), delete)?;
        self.push(stmt.to_sql_string());
        Ok(self.backend.unlink_all(owner, relation, delete)?)
    }
}

#[test]
fn test_reconcile_issues_expected_sql() {
    let store = SqlJournalStore::new(JunctionTable::new("item_group", "item_id", "group_id"));
    let owner = Item { id: 1 };
    let mut group_ids = LinkMany::new("groups")
        .with_extra_column("note", ExtraColumn::literal("test"))
        .with_extra_column("weight", ExtraColumn::generator(|g: &Group| Value::from(g.id * 10)));
    group_ids.set_desired_references(vec![2, 3]);

    group_ids.after_update(&store, &owner).unwrap();

    let journal = store.journal();
    assert_eq!(journal.len(), 4);
    assert!(journal[0].starts_with(r#"SELECT "group".* FROM "group" INNER JOIN "item_group""#));
    assert!(journal[0].ends_with(r#"WHERE "item_group"."item_id" = 1"#));
    assert_eq!(
        journal[1..],
        [
            r#"SELECT * FROM "group" WHERE "id" IN (3)"#.to_string(),
            r#"DELETE FROM "item_group" WHERE "item_id" = 1 AND "group_id" = 1"#.to_string(),
            r#"INSERT INTO "item_group" ("item_id", "group_id", "note", "weight") VALUES (1, 3, 'test', 30)"#.to_string(),
        ]
    );
    assert_eq!(
        store.backend.linked_keys(&owner, "groups"),
        vec![NormalizedKey::from(2), NormalizedKey::from(3)]
    );
}

#[test]
fn test_detaching_delete_issues_update() {
    let store = SqlJournalStore::new(JunctionTable::new("item_group", "item_id", "group_id"));
    let owner = Item { id: 1 };
    let group_ids: LinkMany<Group> = LinkMany::new("groups").with_delete_on_unlink(false);

    group_ids.after_delete(&store, &owner).unwrap();

    assert_eq!(
        store.journal(),
        vec![r#"UPDATE "item_group" SET "item_id" = NULL, "group_id" = NULL WHERE "item_id" = 1"#.to_string()]
    );
    assert_eq!(store.backend.rows().len(), 2);
    assert!(store.backend.rows().iter().all(|row| row.detached));
}

#[test]
fn test_key_column_collision_aborts_link() {
    let store = SqlJournalStore::new(JunctionTable::new("item_group", "item_id", "group_id"));
    let owner = Item { id: 2 };
    let mut group_ids = LinkMany::new("groups")
        .with_extra_column("group_id", ExtraColumn::generator(|g: &Group| Value::from(g.id)));
    group_ids.set_desired_references(vec![4]);

    let err = group_ids.after_insert(&store, &owner).unwrap_err();

    assert!(err
        .to_string()
        .contains("extra column 'group_id' collides with a key column of 'item_group'"));
    assert!(store.backend.linked_keys(&owner, "groups").is_empty());

    // LinkError -> SqlStoreError -> LinkError::Configuration
    let store_err = err.source().expect("store error");
    let statement_err = store_err.source().expect("statement error");
    assert!(statement_err.to_string().starts_with("Configuration error: extra column 'group_id'"));
}

#[test]
fn test_backend_error_chain_is_preserved() {
    let store = SqlJournalStore::new(JunctionTable::new("item_group", "item_id", "group_id"));
    let owner = Item { id: 1 };
    let mut group_ids: LinkMany<Group> = LinkMany::new("groups");
    group_ids.set_desired_references(vec![1]);
    store.backend.fail_on(LinkOperation::Unlink, None);

    let err = group_ids.after_update(&store, &owner).unwrap_err();

    let chain: Vec<String> = std::iter::successors(err.source(), |&e| e.source())
        .map(|e| e.to_string())
        .collect();
    assert_eq!(
        chain,
        vec![
            "backend error: injected failure on unlink".to_string(),
            "injected failure on unlink".to_string(),
        ]
    );
}
