//! SQL statements for junction tables.
//!
//! [`JunctionTable`] describes where the link rows of a many-to-many relation
//! live and builds the SeaQuery statements a SQL-backed [`LinkStore`](crate::LinkStore)
//! needs: insert a link, delete or detach one link, delete or detach every link
//! of an owner, and select what is currently linked. Composite keys expand
//! column by column.
//!
//! # Example
//!
//! ```
//! use linkmany::junction::JunctionTable;
//! use linkmany::NormalizedKey;
//! use sea_query::{PostgresQueryBuilder, Value};
//!
//! let junction = JunctionTable::new("item_group", "item_id", "group_id");
//! let insert = junction
//!     .link_statement(
//!         &NormalizedKey::from(1),
//!         &NormalizedKey::from(4),
//!         &[("note".to_string(), Value::from("test"))],
//!     )
//!     .unwrap();
//! let (sql, values) = insert.build(PostgresQueryBuilder);
//! assert!(sql.starts_with(r#"INSERT INTO "item_group""#));
//! assert_eq!(values.0.len(), 3);
//! ```

use crate::error::LinkError;
use crate::key::NormalizedKey;
use sea_query::{
    Alias, Asterisk, Condition, DeleteStatement, Expr, ExprTrait, InsertStatement, PostgresQueryBuilder,
    Query, SelectStatement, UpdateStatement, Value, Values,
};

/// Location and key columns of a junction table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionTable {
    table: String,
    owner_columns: Vec<String>,
    related_columns: Vec<String>,
}

/// Statement removing or detaching junction rows
///
/// `Delete` when rows are deleted, `Update` (key columns set to NULL) when they
/// are only detached.
#[derive(Debug, Clone)]
pub enum UnlinkStatement {
    Delete(DeleteStatement),
    Update(UpdateStatement),
}

impl UnlinkStatement {
    /// SQL with placeholders plus bound values, for PostgreSQL
    pub fn build(&self) -> (String, Values) {
        match self {
            UnlinkStatement::Delete(stmt) => stmt.build(PostgresQueryBuilder),
            UnlinkStatement::Update(stmt) => stmt.build(PostgresQueryBuilder),
        }
    }

    /// SQL with values inlined, for logging and tests
    pub fn to_sql_string(&self) -> String {
        match self {
            UnlinkStatement::Delete(stmt) => stmt.to_string(PostgresQueryBuilder),
            UnlinkStatement::Update(stmt) => stmt.to_string(PostgresQueryBuilder),
        }
    }
}

impl JunctionTable {
    /// Junction table with single-column owner and related keys
    pub fn new(table: impl Into<String>, owner_column: impl Into<String>, related_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            owner_columns: vec![owner_column.into()],
            related_columns: vec![related_column.into()],
        }
    }

    /// Junction table with composite owner and/or related keys
    pub fn composite<S: Into<String>>(
        table: impl Into<String>,
        owner_columns: impl IntoIterator<Item = S>,
        related_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            table: table.into(),
            owner_columns: owner_columns.into_iter().map(Into::into).collect(),
            related_columns: related_columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn owner_columns(&self) -> &[String] {
        &self.owner_columns
    }

    pub fn related_columns(&self) -> &[String] {
        &self.related_columns
    }

    /// `INSERT` of one junction row with its extra columns
    pub fn link_statement(
        &self,
        owner: &NormalizedKey,
        related: &NormalizedKey,
        extra_columns: &[(String, Value)],
    ) -> Result<InsertStatement, LinkError> {
        let mut columns: Vec<Alias> = Vec::new();
        let mut values: Vec<Expr> = Vec::new();

        for (column, value) in key_pairs(&self.owner_columns, owner)?
            .into_iter()
            .chain(key_pairs(&self.related_columns, related)?)
        {
            columns.push(iden(column));
            values.push(Expr::val(value));
        }
        for (column, value) in extra_columns {
            if self.is_key_column(column) {
                return Err(LinkError::Configuration(format!(
                    "extra column '{}' collides with a key column of '{}'",
                    column, self.table
                )));
            }
            columns.push(iden(column));
            values.push(Expr::val(value.clone()));
        }

        let mut query = Query::insert();
        query.into_table(iden(&self.table)).columns(columns);
        query
            .values(values)
            .map_err(|e| LinkError::Configuration(format!("invalid junction insert: {e}")))?;
        Ok(query)
    }

    /// Delete, or detach, the junction row between `owner` and `related`
    pub fn unlink_statement(
        &self,
        owner: &NormalizedKey,
        related: &NormalizedKey,
        delete: bool,
    ) -> Result<UnlinkStatement, LinkError> {
        let mut conditions = key_pairs(&self.owner_columns, owner)?;
        conditions.extend(key_pairs(&self.related_columns, related)?);
        Ok(self.unlink_where(conditions, delete))
    }

    /// Delete, or detach, every junction row of `owner`
    pub fn unlink_all_statement(&self, owner: &NormalizedKey, delete: bool) -> Result<UnlinkStatement, LinkError> {
        let conditions = key_pairs(&self.owner_columns, owner)?;
        Ok(self.unlink_where(conditions, delete))
    }

    /// `SELECT` of the related key columns linked to `owner`
    pub fn linked_keys_statement(&self, owner: &NormalizedKey) -> Result<SelectStatement, LinkError> {
        let mut query = Query::select();
        query
            .columns(self.related_columns.iter().map(|c| iden(c)))
            .from(iden(&self.table));
        for (column, value) in key_pairs(&self.owner_columns, owner)? {
            query.and_where(Expr::col(iden(column)).eq(value));
        }
        Ok(query)
    }

    /// `SELECT related.*` joined through this junction for `owner`
    ///
    /// `related_key_columns` are the primary key columns of `related_table`,
    /// matched positionally with this junction's related columns.
    pub fn linked_statement(
        &self,
        related_table: &str,
        related_key_columns: &[&str],
        owner: &NormalizedKey,
    ) -> Result<SelectStatement, LinkError> {
        if related_key_columns.len() != self.related_columns.len() {
            return Err(LinkError::Configuration(format!(
                "'{}' has {} key column(s) but junction '{}' references {}",
                related_table,
                related_key_columns.len(),
                self.table,
                self.related_columns.len()
            )));
        }

        let mut on = Condition::all();
        for (related_col, junction_col) in related_key_columns.iter().zip(&self.related_columns) {
            on = on.add(
                Expr::col((iden(related_table), iden(related_col)))
                    .eq(Expr::col((iden(&self.table), iden(junction_col)))),
            );
        }

        let mut query = Query::select();
        query
            .column((iden(related_table), Asterisk))
            .from(iden(related_table))
            .inner_join(iden(&self.table), on);
        for (column, value) in key_pairs(&self.owner_columns, owner)? {
            query.and_where(Expr::col((iden(&self.table), iden(column))).eq(value));
        }
        Ok(query)
    }

    fn is_key_column(&self, column: &str) -> bool {
        self.owner_columns.iter().chain(&self.related_columns).any(|c| c == column)
    }

    fn unlink_where(&self, conditions: Vec<(&str, Value)>, delete: bool) -> UnlinkStatement {
        if delete {
            let mut query = Query::delete();
            query.from_table(iden(&self.table));
            for (column, value) in conditions {
                query.and_where(Expr::col(iden(column)).eq(value));
            }
            UnlinkStatement::Delete(query)
        } else {
            let mut query = Query::update();
            query.table(iden(&self.table));
            for column in self.owner_columns.iter().chain(&self.related_columns) {
                query.value(iden(column), Expr::cust("NULL"));
            }
            for (column, value) in conditions {
                query.and_where(Expr::col(iden(column)).eq(value));
            }
            UnlinkStatement::Update(query)
        }
    }
}

/// `SELECT *` of the entities in `table` whose primary key is one of `keys`
///
/// Single-column keys use `IN`; composite keys an `OR` of per-key `AND`s.
pub fn find_by_keys_statement(
    table: &str,
    key_columns: &[&str],
    keys: &[NormalizedKey],
) -> Result<SelectStatement, LinkError> {
    let columns: Vec<String> = key_columns.iter().map(|c| c.to_string()).collect();
    let mut query = Query::select();
    query.column(Asterisk).from(iden(table));

    if keys.is_empty() {
        query.and_where(Expr::cust("FALSE"));
        return Ok(query);
    }

    if let [column] = key_columns {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.extend(key_pairs(&columns, key)?.into_iter().map(|(_, v)| v));
        }
        query.and_where(Expr::col(iden(column)).is_in(values));
    } else {
        let mut any = Condition::any();
        for key in keys {
            let mut all = Condition::all();
            for (column, value) in key_pairs(&columns, key)? {
                all = all.add(Expr::col(iden(column)).eq(value));
            }
            any = any.add(all);
        }
        query.cond_where(any);
    }
    Ok(query)
}

fn iden(name: &str) -> Alias {
    Alias::new(name.to_string())
}

/// Pair each key column with its value, checking arity
fn key_pairs<'a>(columns: &'a [String], key: &NormalizedKey) -> Result<Vec<(&'a str, Value)>, LinkError> {
    let values = key.to_values();
    if values.len() != columns.len() {
        return Err(LinkError::Configuration(format!(
            "key {} has {} part(s) but {} column(s) are mapped: [{}]",
            key,
            values.len(),
            columns.len(),
            columns.join(", ")
        )));
    }
    Ok(columns.iter().map(String::as_str).zip(values).collect())
}
