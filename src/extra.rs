//! Extra junction-row columns.
//!
//! A link can carry more than the two key columns: notes, timestamps, a
//! denormalized foreign key, etc. Each extra column is either a literal value
//! or a generator evaluated once per linked entity.

use sea_query::Value;
use std::fmt;
use std::sync::Arc;

/// Value source for one extra junction column
pub enum ExtraColumn<R> {
    /// Same value on every junction row
    Literal(Value),
    /// Computed per link from the entity being linked
    Generator(Arc<dyn Fn(&R) -> Value + Send + Sync>),
}

impl<R> ExtraColumn<R> {
    /// Literal column value
    pub fn literal(value: impl Into<Value>) -> Self {
        ExtraColumn::Literal(value.into())
    }

    /// Column computed from the linked entity
    pub fn generator<F>(f: F) -> Self
    where
        F: Fn(&R) -> Value + Send + Sync + 'static,
    {
        ExtraColumn::Generator(Arc::new(f))
    }

    /// Column computed without looking at the linked entity
    ///
    /// Still evaluated once per link, so values like timestamps differ per row.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        ExtraColumn::Generator(Arc::new(move |_: &R| f()))
    }

    /// Current UTC time, taken at link time
    pub fn now() -> Self {
        Self::computed(|| Value::from(chrono::Utc::now()))
    }

    /// Resolve the value for a link to `related`
    pub fn resolve(&self, related: &R) -> Value {
        match self {
            ExtraColumn::Literal(value) => value.clone(),
            ExtraColumn::Generator(f) => f(related),
        }
    }
}

impl<R> Clone for ExtraColumn<R> {
    fn clone(&self) -> Self {
        match self {
            ExtraColumn::Literal(value) => ExtraColumn::Literal(value.clone()),
            ExtraColumn::Generator(f) => ExtraColumn::Generator(Arc::clone(f)),
        }
    }
}

impl<R> fmt::Debug for ExtraColumn<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraColumn::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            ExtraColumn::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// Ordered set of extra columns attached to every new junction row
///
/// Setting a column that already exists replaces its value source in place.
pub struct ExtraColumns<R> {
    columns: Vec<(String, ExtraColumn<R>)>,
}

impl<R> ExtraColumns<R> {
    pub fn new() -> Self {
        Self { columns: Vec::new() }
    }

    pub fn set(&mut self, name: impl Into<String>, column: ExtraColumn<R>) {
        let name = name.into();
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = column,
            None => self.columns.push((name, column)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Column names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Evaluate every column for one link operation
    pub fn resolve(&self, related: &R) -> Vec<(String, Value)> {
        self.columns
            .iter()
            .map(|(name, column)| (name.clone(), column.resolve(related)))
            .collect()
    }
}

impl<R> Default for ExtraColumns<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for ExtraColumns<R> {
    fn clone(&self) -> Self {
        Self {
            columns: self.columns.clone(),
        }
    }
}

impl<R> fmt::Debug for ExtraColumns<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.columns.iter().map(|(name, column)| (name, column)))
            .finish()
    }
}
