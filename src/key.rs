//! Primary key normalization.
//!
//! Owner and related entities report their primary key as a [`PrimaryKey`]:
//! a closed set of shapes (integer, text, composite, or a custom key type with a
//! canonical string form). [`normalize_key`] turns any of them into a
//! [`NormalizedKey`], which is what the reconciler compares. Both sides of a diff
//! (desired references and currently linked rows) go through the same function,
//! so two keys are equal exactly when their normalized forms are equal.

use sea_query::Value;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

/// A key type that is compared through its canonical string form
///
/// Implement this for structured key objects (object ids, UUIDs, ...) so they
/// normalize to a plain string before comparison.
///
/// # Example
///
/// ```
/// use linkmany::{normalize_key, CanonicalKey, NormalizedKey, PrimaryKey};
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// struct ObjectId([u8; 4]);
///
/// impl CanonicalKey for ObjectId {
///     fn canonical_key(&self) -> String {
///         self.0.iter().map(|b| format!("{b:02x}")).collect()
///     }
/// }
///
/// let key = normalize_key(PrimaryKey::Custom(Arc::new(ObjectId([0xde, 0xad, 0xbe, 0xef]))));
/// assert_eq!(key, NormalizedKey::Text("deadbeef".to_string()));
/// ```
pub trait CanonicalKey: fmt::Debug + Send + Sync {
    /// Canonical string representation used for comparison
    fn canonical_key(&self) -> String;
}

impl CanonicalKey for uuid::Uuid {
    fn canonical_key(&self) -> String {
        self.hyphenated().to_string()
    }
}

/// Raw primary key value as reported by an entity
#[derive(Debug, Clone)]
pub enum PrimaryKey {
    /// Integer key (any signed or unsigned width that fits in `i64`)
    Int(i64),
    /// Text key
    Text(String),
    /// Composite key, one entry per key column in column order
    Composite(Vec<PrimaryKey>),
    /// Structured key normalized through [`CanonicalKey`]
    Custom(Arc<dyn CanonicalKey>),
}

/// Comparable form of a primary key
///
/// Deserializes untagged, so `1`, `"abc"` and `[1, "abc"]` are all valid
/// reference values in JSON or TOML input. Deserialized values go through
/// [`normalize_key`], so `[5]` reads as `5` and `[[1, 2], 3]` as `[1, 2, 3]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum NormalizedKey {
    /// Integer key
    Int(i64),
    /// Text key, including canonical strings of custom key types
    Text(String),
    /// Composite key in column order
    Tuple(Vec<NormalizedKey>),
}

/// Normalize a raw primary key into its comparable form
///
/// - integers and text are kept as-is
/// - custom keys become their canonical string
/// - composite keys become a flat ordered tuple: nested composites are spliced
///   in place, and a single-column composite collapses to its only element,
///   so `Composite([Int(1)])` equals `Int(1)`
pub fn normalize_key(key: PrimaryKey) -> NormalizedKey {
    match key {
        PrimaryKey::Int(value) => NormalizedKey::Int(value),
        PrimaryKey::Text(value) => NormalizedKey::Text(value),
        PrimaryKey::Custom(value) => NormalizedKey::Text(value.canonical_key()),
        PrimaryKey::Composite(parts) => {
            let mut flat = Vec::with_capacity(parts.len());
            for part in parts {
                match normalize_key(part) {
                    NormalizedKey::Tuple(inner) => flat.extend(inner),
                    scalar => flat.push(scalar),
                }
            }
            if flat.len() == 1 {
                if let Some(only) = flat.pop() {
                    return only;
                }
            }
            NormalizedKey::Tuple(flat)
        }
    }
}

impl NormalizedKey {
    /// Canonical form of a key that may have been built by hand
    ///
    /// Keys produced by [`normalize_key`] are already canonical; a hand-built
    /// `Tuple` with nested or single-element tuples is flattened the same way.
    pub fn canonical(self) -> NormalizedKey {
        normalize_key(self.into())
    }

    /// Number of key columns this key spans
    pub fn arity(&self) -> usize {
        match self {
            NormalizedKey::Tuple(parts) => parts.len(),
            _ => 1,
        }
    }

    /// Flatten into one SeaQuery value per key column
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            NormalizedKey::Int(value) => vec![Value::from(*value)],
            NormalizedKey::Text(value) => vec![Value::from(value.clone())],
            NormalizedKey::Tuple(parts) => parts.iter().flat_map(|p| p.to_values()).collect(),
        }
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedKey::Int(value) => write!(f, "{value}"),
            NormalizedKey::Text(value) => write!(f, "{value}"),
            NormalizedKey::Tuple(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<NormalizedKey> for PrimaryKey {
    fn from(key: NormalizedKey) -> Self {
        match key {
            NormalizedKey::Int(value) => PrimaryKey::Int(value),
            NormalizedKey::Text(value) => PrimaryKey::Text(value),
            NormalizedKey::Tuple(parts) => PrimaryKey::Composite(parts.into_iter().map(Into::into).collect()),
        }
    }
}

/// Wire shape of a key before canonicalization
#[derive(Deserialize)]
#[serde(untagged)]
enum RawKey {
    Int(i64),
    Text(String),
    Tuple(Vec<RawKey>),
}

impl From<RawKey> for PrimaryKey {
    fn from(raw: RawKey) -> Self {
        match raw {
            RawKey::Int(value) => PrimaryKey::Int(value),
            RawKey::Text(value) => PrimaryKey::Text(value),
            RawKey::Tuple(parts) => PrimaryKey::Composite(parts.into_iter().map(Into::into).collect()),
        }
    }
}

impl<'de> Deserialize<'de> for NormalizedKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawKey::deserialize(deserializer).map(|raw| normalize_key(raw.into()))
    }
}

macro_rules! impl_int_key {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for PrimaryKey {
                fn from(value: $ty) -> Self {
                    PrimaryKey::Int(i64::from(value))
                }
            }

            impl From<$ty> for NormalizedKey {
                fn from(value: $ty) -> Self {
                    NormalizedKey::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_int_key!(i8, i16, i32, i64, u8, u16, u32);

// u64 keys above i64::MAX keep their decimal text form
impl From<u64> for PrimaryKey {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(v) => PrimaryKey::Int(v),
            Err(_) => PrimaryKey::Text(value.to_string()),
        }
    }
}

impl From<u64> for NormalizedKey {
    fn from(value: u64) -> Self {
        normalize_key(PrimaryKey::from(value))
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        PrimaryKey::Text(value)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        PrimaryKey::Text(value.to_string())
    }
}

impl From<String> for NormalizedKey {
    fn from(value: String) -> Self {
        NormalizedKey::Text(value)
    }
}

impl From<&str> for NormalizedKey {
    fn from(value: &str) -> Self {
        NormalizedKey::Text(value.to_string())
    }
}

impl From<uuid::Uuid> for PrimaryKey {
    fn from(value: uuid::Uuid) -> Self {
        PrimaryKey::Custom(Arc::new(value))
    }
}

impl From<uuid::Uuid> for NormalizedKey {
    fn from(value: uuid::Uuid) -> Self {
        NormalizedKey::Text(value.canonical_key())
    }
}

impl From<Vec<PrimaryKey>> for PrimaryKey {
    fn from(parts: Vec<PrimaryKey>) -> Self {
        PrimaryKey::Composite(parts)
    }
}

impl<A, B> From<(A, B)> for PrimaryKey
where
    A: Into<PrimaryKey>,
    B: Into<PrimaryKey>,
{
    fn from((a, b): (A, B)) -> Self {
        PrimaryKey::Composite(vec![a.into(), b.into()])
    }
}

impl<A, B, C> From<(A, B, C)> for PrimaryKey
where
    A: Into<PrimaryKey>,
    B: Into<PrimaryKey>,
    C: Into<PrimaryKey>,
{
    fn from((a, b, c): (A, B, C)) -> Self {
        PrimaryKey::Composite(vec![a.into(), b.into(), c.into()])
    }
}

impl<A, B> From<(A, B)> for NormalizedKey
where
    A: Into<PrimaryKey>,
    B: Into<PrimaryKey>,
{
    fn from(value: (A, B)) -> Self {
        normalize_key(PrimaryKey::from(value))
    }
}

impl<A, B, C> From<(A, B, C)> for NormalizedKey
where
    A: Into<PrimaryKey>,
    B: Into<PrimaryKey>,
    C: Into<PrimaryKey>,
{
    fn from(value: (A, B, C)) -> Self {
        normalize_key(PrimaryKey::from(value))
    }
}
