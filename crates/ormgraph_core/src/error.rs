//! Error types for ormgraph core.

use crate::identity::Identity;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ormgraph core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage error outside of a commit.
    #[error("storage error: {0}")]
    Storage(#[from] ormgraph_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ormgraph_codec::CodecError),

    /// Deleting an object was refused by a Deny delete rule.
    #[error("cannot delete {identity}: relationship '{relationship}' of {entity} is not empty")]
    DeleteDenied {
        /// Entity of the object being deleted.
        entity: String,
        /// Identity of the object being deleted.
        identity: Identity,
        /// The Deny relationship that still has related objects.
        relationship: String,
    },

    /// An update or delete matched a different number of rows than expected.
    #[error("optimistic lock failure on {entity} {identity}: expected {expected} row(s), matched {actual}")]
    OptimisticLock {
        /// Table the statement ran against.
        entity: String,
        /// Identity of the object whose row did not match.
        identity: Identity,
        /// Expected affected rows.
        expected: usize,
        /// Actual affected rows.
        actual: usize,
    },

    /// The schema contains a cycle of required foreign keys.
    #[error("unresolvable dependency cycle between {entities:?}")]
    DependencyCycle {
        /// Tables (or rows) participating in the cycle.
        entities: Vec<String>,
    },

    /// A key value could not be derived for a new object.
    #[error("cannot derive primary key of {entity}: {message}")]
    PkPropagation {
        /// Entity whose key could not be derived.
        entity: String,
        /// Description of the failure.
        message: String,
    },

    /// No row exists for an object identity.
    #[error("object not found: {identity}")]
    ObjectNotFound {
        /// The missing identity.
        identity: Identity,
    },

    /// Entity is not mapped.
    #[error("entity not mapped: {name}")]
    EntityNotMapped {
        /// Entity name.
        name: String,
    },

    /// Property is not mapped on an entity.
    #[error("property '{property}' is not mapped on {entity}")]
    PropertyNotMapped {
        /// Entity name.
        entity: String,
        /// Property name.
        property: String,
    },

    /// Object handle does not belong to this context.
    #[error("object is not registered in this context")]
    ObjectNotRegistered,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// An unexpected storage failure aborted a commit.
    #[error("commit failed: {source}")]
    CommitFailed {
        /// The underlying failure.
        #[source]
        source: ormgraph_storage::StorageError,
    },

    /// The result iterator was already closed.
    #[error("result iterator is closed")]
    IteratorClosed,
}

impl CoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an entity not mapped error.
    pub fn entity_not_mapped(name: impl Into<String>) -> Self {
        Self::EntityNotMapped { name: name.into() }
    }

    /// Creates a property not mapped error.
    pub fn property_not_mapped(entity: impl Into<String>, property: impl Into<String>) -> Self {
        Self::PropertyNotMapped {
            entity: entity.into(),
            property: property.into(),
        }
    }

    /// Creates a key propagation error.
    pub fn pk_propagation(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PkPropagation {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Returns true if the caller can act on the failure and retry
    /// (fix a relationship, refetch and retry).
    ///
    /// Cycles, key propagation failures and mapping errors are
    /// configuration errors and never succeed on retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeleteDenied { .. }
                | Self::OptimisticLock { .. }
                | Self::ObjectNotFound { .. }
                | Self::CommitFailed { .. }
        )
    }
}
