//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while executing operations against a data node.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The table is not part of the node's schema.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Name of the missing table.
        table: String,
    },

    /// The column is not part of the table.
    #[error("column {column} not found in table {table}")]
    ColumnNotFound {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A row with the same primary key already exists.
    #[error("duplicate primary key in table {table}: {key}")]
    DuplicateKey {
        /// Table name.
        table: String,
        /// Rendered key values.
        key: String,
    },

    /// A mandatory column was written with NULL.
    #[error("NOT NULL violation: {table}.{column}")]
    NotNullViolation {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A foreign key constraint was violated.
    #[error("foreign key violation on {table} via {relationship}: {message}")]
    ForeignKeyViolation {
        /// Table the offending row belongs to.
        table: String,
        /// Relationship that enforces the constraint.
        relationship: String,
        /// Description of the violation.
        message: String,
    },

    /// The operation requires an active read-write transaction.
    #[error("no active write transaction on node {node}")]
    NoActiveTransaction {
        /// Node name.
        node: String,
    },

    /// The batch is malformed.
    #[error("invalid batch: {message}")]
    InvalidBatch {
        /// Description of the problem.
        message: String,
    },

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ormgraph_codec::CodecError),
}

impl StorageError {
    /// Creates a table not found error.
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    /// Creates an invalid batch error.
    pub fn invalid_batch(message: impl Into<String>) -> Self {
        Self::InvalidBatch {
            message: message.into(),
        }
    }
}
