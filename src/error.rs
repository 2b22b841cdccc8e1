//! Error types for link reconciliation.

use crate::key::NormalizedKey;
use std::fmt;

/// Collaborator operation that was in flight when a persistence error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkOperation {
    /// Fetching the currently linked entities
    FetchLinked,
    /// Resolving new reference keys to entities
    FindByKeys,
    /// Creating a junction row
    Link,
    /// Removing or detaching one junction row
    Unlink,
    /// Removing or detaching every junction row of the relation
    UnlinkAll,
}

impl LinkOperation {
    /// Short lowercase name, used in log lines and metric attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkOperation::FetchLinked => "fetch_linked",
            LinkOperation::FindByKeys => "find_by_keys",
            LinkOperation::Link => "link",
            LinkOperation::Unlink => "unlink",
            LinkOperation::UnlinkAll => "unlink_all",
        }
    }
}

impl fmt::Display for LinkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for link reconciliation
#[derive(Debug)]
pub enum LinkError {
    /// Reconciler is misconfigured (e.g. empty relation name, key arity mismatch)
    Configuration(String),
    /// The persistence collaborator failed
    ///
    /// Operations completed before the failure are not rolled back here;
    /// the host transaction, if any, governs atomicity.
    Persistence {
        /// Operation that failed
        operation: LinkOperation,
        /// Key of the related entity involved, if the operation targets one
        key: Option<NormalizedKey>,
        /// Underlying collaborator error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Desired keys that matched no entity (only raised with strict resolution)
    UnresolvedReferences(Vec<NormalizedKey>),
}

impl LinkError {
    pub(crate) fn persistence<E>(operation: LinkOperation, key: Option<NormalizedKey>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LinkError::Persistence {
            operation,
            key,
            source: Box::new(err),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            LinkError::Persistence {
                operation,
                key: Some(key),
                source,
            } => write!(f, "Persistence error during {operation} (key {key}): {source}"),
            LinkError::Persistence {
                operation,
                key: None,
                source,
            } => write!(f, "Persistence error during {operation}: {source}"),
            LinkError::UnresolvedReferences(keys) => {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                write!(f, "Unresolved references: [{}]", keys.join(", "))
            }
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Persistence { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
