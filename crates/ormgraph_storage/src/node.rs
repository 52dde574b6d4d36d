//! Data node trait definition.

use crate::batch::{BatchQuery, BatchResult};
use crate::error::StorageResult;
use crate::row::DataRow;
use ormgraph_codec::Value;
use std::fmt;

/// Handle of a transaction opened on a data node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeTxId(pub u64);

impl fmt::Display for NodeTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ntx:{}", self.0)
    }
}

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Reads committed state and never blocks writers.
    ReadOnly,
    /// Exclusive writer. Only one read-write transaction runs at a time.
    ReadWrite,
}

/// A physical backing store that executes batched operations.
///
/// Nodes are the boundary to the relational database: they receive
/// fully-shaped batches and return affected row counts and generated keys.
/// SQL rendering is the node's business.
///
/// # Invariants
///
/// - `execute` runs inside a read-write transaction opened with `begin`
/// - nothing written in a transaction is visible to other transactions
///   until `commit`
/// - `rollback` discards every write of the transaction
/// - nodes must be `Send + Sync`
pub trait DataNode: Send + Sync {
    /// Node name, used to route entities to nodes.
    fn name(&self) -> &str;

    /// Opens a transaction.
    ///
    /// A read-write `begin` blocks while another read-write transaction
    /// is open on the node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot open a transaction.
    fn begin(&self, mode: TxMode) -> StorageResult<NodeTxId>;

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is unknown.
    fn commit(&self, tx: NodeTxId) -> StorageResult<()>;

    /// Rolls back a transaction, discarding its writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is unknown.
    fn rollback(&self, tx: NodeTxId) -> StorageResult<()>;

    /// Executes one batch inside a read-write transaction.
    ///
    /// # Errors
    ///
    /// Returns an error on constraint violations, unknown tables or
    /// columns, or if `tx` is not the active writer.
    fn execute(&self, tx: NodeTxId, query: &BatchQuery) -> StorageResult<BatchResult>;

    /// Selects rows of `table` whose columns equal the qualifier values.
    ///
    /// A NULL qualifier value matches NULL columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn select(
        &self,
        tx: NodeTxId,
        table: &str,
        qualifier: &[(String, Value)],
    ) -> StorageResult<Vec<DataRow>>;

    /// Generates a fresh primary key value for `table.column`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn generate_pk(&self, table: &str, column: &str) -> StorageResult<Value>;
}
