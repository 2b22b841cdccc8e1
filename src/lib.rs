//! # linkmany
//!
//! Keeps a many-to-many relation in sync with a list of desired reference keys.
//!
//! An owner entity (an `Item`) is linked to related entities (`Group`s)
//! through a junction table. Callers set the group keys they want; after the
//! item is saved, [`LinkMany::reconcile`] compares them with the persisted
//! junction rows and issues only the unlinks and links needed, optionally
//! filling extra junction columns. After the item is deleted,
//! [`LinkMany::reconcile_delete`] clears its junction rows.
//!
//! Storage is abstract: the host ORM implements [`LinkStore`]. The
//! [`junction`] module builds the SeaQuery statements a SQL-backed store
//! needs, and [`memory::MemoryLinkStore`] is a ready-made in-memory store.

pub mod config;
pub mod error;
pub mod extra;
pub mod junction;
pub mod key;
pub mod memory;
pub mod metrics;
pub mod reconciler;
pub mod store;

pub use config::LinkManyConfig;
pub use error::{LinkError, LinkOperation};
pub use extra::{ExtraColumn, ExtraColumns};
pub use key::{normalize_key, CanonicalKey, NormalizedKey, PrimaryKey};
pub use reconciler::{LinkMany, ReconcileReport, ReferenceInput};
pub use store::{LinkEntity, LinkStore};
