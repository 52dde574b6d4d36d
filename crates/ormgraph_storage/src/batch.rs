//! Batched parameterized operations handed to a data node.
//!
//! A batch is one statement shape executed for many rows. Rows whose
//! qualifier has a different NULL pattern cannot share a statement
//! (`IS NULL` vs `= ?`), so callers split them into separate batches.

use crate::row::KeyMap;
use ormgraph_codec::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A qualifier column of an update or delete batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifierColumn {
    /// Column name.
    pub name: String,
    /// When set, the column is matched with `IS NULL` and no value is bound.
    pub is_null: bool,
}

impl QualifierColumn {
    /// Creates a qualifier column matched by value.
    pub fn by_value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_null: false,
        }
    }

    /// Creates a qualifier column matched with `IS NULL`.
    pub fn null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_null: true,
        }
    }
}

/// Inserts rows into one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertBatch {
    /// Target table.
    pub table: String,
    /// Columns written, in row value order.
    pub columns: Vec<String>,
    /// One value vector per row.
    pub rows: Vec<Vec<Value>>,
}

/// One row of an update batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRow {
    /// New values, in `update_columns` order.
    pub values: Vec<Value>,
    /// Qualifier values for the non-null qualifier columns, in order.
    pub qualifier: Vec<Value>,
}

/// Updates rows of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Target table.
    pub table: String,
    /// Columns written.
    pub update_columns: Vec<String>,
    /// Qualifier shape shared by every row.
    pub qualifier: Vec<QualifierColumn>,
    /// Rows.
    pub rows: Vec<UpdateRow>,
    /// Whether the qualifier includes optimistic locking columns.
    pub optimistic: bool,
}

/// Deletes rows of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteBatch {
    /// Target table.
    pub table: String,
    /// Qualifier shape shared by every row.
    pub qualifier: Vec<QualifierColumn>,
    /// Qualifier values for the non-null qualifier columns, one vector per row.
    pub rows: Vec<Vec<Value>>,
    /// Whether the qualifier includes optimistic locking columns.
    pub optimistic: bool,
}

/// A batched operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchQuery {
    /// INSERT.
    Insert(InsertBatch),
    /// UPDATE.
    Update(UpdateBatch),
    /// DELETE.
    Delete(DeleteBatch),
}

impl BatchQuery {
    /// Target table.
    pub fn table(&self) -> &str {
        match self {
            BatchQuery::Insert(b) => &b.table,
            BatchQuery::Update(b) => &b.table,
            BatchQuery::Delete(b) => &b.table,
        }
    }

    /// Statement kind.
    pub fn kind(&self) -> StatementKind {
        match self {
            BatchQuery::Insert(_) => StatementKind::Insert,
            BatchQuery::Update(_) => StatementKind::Update,
            BatchQuery::Delete(_) => StatementKind::Delete,
        }
    }

    /// Number of rows in the batch.
    pub fn row_count(&self) -> usize {
        match self {
            BatchQuery::Insert(b) => b.rows.len(),
            BatchQuery::Update(b) => b.rows.len(),
            BatchQuery::Delete(b) => b.rows.len(),
        }
    }

    /// Whether affected row counts are checked for optimistic locking.
    pub fn is_optimistic(&self) -> bool {
        match self {
            BatchQuery::Insert(_) => false,
            BatchQuery::Update(b) => b.optimistic,
            BatchQuery::Delete(b) => b.optimistic,
        }
    }
}

/// Result of executing one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Affected row count per batch row.
    pub counts: Vec<usize>,
    /// Database-generated key values per inserted row (empty map if none).
    pub generated_keys: Vec<KeyMap>,
}

/// Kind of statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// INSERT.
    Insert,
    /// UPDATE.
    Update,
    /// DELETE.
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Insert => write!(f, "INSERT"),
            StatementKind::Update => write!(f, "UPDATE"),
            StatementKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A record of one executed batch, kept by nodes for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedStatement {
    /// Statement kind.
    pub kind: StatementKind,
    /// Target table.
    pub table: String,
    /// Number of rows bound to the statement.
    pub rows: usize,
}

impl fmt::Display for ExecutedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} rows)", self.kind, self.table, self.rows)
    }
}
