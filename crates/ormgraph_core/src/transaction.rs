//! Transactions spanning one or more data nodes.
//!
//! A [`Transaction`] begins a node transaction lazily, the first time a
//! node is used, and commits or rolls back all of them together. A
//! transaction can be bound to the current thread; commits performed on
//! that thread then join it instead of opening their own.

use crate::error::{CoreError, CoreResult};
use ormgraph_storage::{DataNode, NodeTxId, TxMode};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static BOUND: RefCell<Option<Transaction>> = const { RefCell::new(None) };
}

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Open for work.
    Active,
    /// Committed on every node.
    Committed,
    /// Rolled back on every node.
    RolledBack,
}

/// A unit of work over the data nodes of a domain.
pub struct Transaction {
    id: u64,
    nodes: Vec<(Arc<dyn DataNode>, NodeTxId)>,
    rollback_only: bool,
    state: TransactionState,
}

impl Transaction {
    /// Creates a transaction. No node transaction is begun yet.
    pub fn new() -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            rollback_only: false,
            state: TransactionState::Active,
        }
    }

    /// Transaction id, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true if the transaction can only be rolled back.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Marks the transaction so that it can only be rolled back.
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Number of nodes enlisted so far.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the node transaction for `node`, beginning it on first use.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the transaction is finished, and
    /// `CommitFailed` if the node cannot begin a transaction.
    pub fn node_tx(&mut self, node: &Arc<dyn DataNode>) -> CoreResult<NodeTxId> {
        if self.state != TransactionState::Active {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is no longer active",
                self.id
            )));
        }
        if let Some((_, tx)) = self.nodes.iter().find(|(n, _)| Arc::ptr_eq(n, node)) {
            return Ok(*tx);
        }
        let tx = node
            .begin(TxMode::ReadWrite)
            .map_err(|source| CoreError::CommitFailed { source })?;
        tracing::trace!(transaction = self.id, node = node.name(), %tx, "node enlisted");
        self.nodes.push((Arc::clone(node), tx));
        Ok(tx)
    }

    /// Commits every enlisted node.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a rollback-only transaction (after
    /// rolling it back), or `CommitFailed` if a node fails to commit; the
    /// remaining nodes are then rolled back.
    pub fn commit(mut self) -> CoreResult<()> {
        if self.rollback_only {
            self.rollback_nodes();
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is marked rollback-only",
                self.id
            )));
        }
        let nodes = std::mem::take(&mut self.nodes);
        let mut remaining = nodes.into_iter();
        while let Some((node, tx)) = remaining.next() {
            if let Err(source) = node.commit(tx) {
                tracing::warn!(transaction = self.id, node = node.name(), error = %source, "node commit failed");
                self.nodes = remaining.collect();
                self.rollback_nodes();
                return Err(CoreError::CommitFailed { source });
            }
        }
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Rolls back every enlisted node.
    pub fn rollback(mut self) {
        self.rollback_nodes();
    }

    fn rollback_nodes(&mut self) {
        for (node, tx) in self.nodes.drain(..) {
            if let Err(err) = node.rollback(tx) {
                tracing::warn!(transaction = self.id, node = node.name(), error = %err, "node rollback failed");
            }
        }
        self.state = TransactionState::RolledBack;
    }

    /// Runs `f` in the transaction bound to the current thread, or in a
    /// new transaction that is committed on success and rolled back on
    /// error.
    ///
    /// A failure inside a bound transaction marks it rollback-only.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of the commit.
    pub fn perform<T, F>(f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        if let Some(mut bound) = BOUND.with(|b| b.borrow_mut().take()) {
            let result = f(&mut bound);
            if result.is_err() {
                bound.set_rollback_only();
            }
            BOUND.with(|b| *b.borrow_mut() = Some(bound));
            return result;
        }

        let mut tx = Transaction::new();
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Binds the transaction to the current thread.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if another transaction is bound.
    pub fn bind(self) -> CoreResult<BoundTransaction> {
        BOUND.with(|b| {
            let mut slot = b.borrow_mut();
            if slot.is_some() {
                return Err(CoreError::invalid_operation(
                    "a transaction is already bound to this thread",
                ));
            }
            *slot = Some(self);
            Ok(BoundTransaction { finished: false })
        })
    }

    /// Returns true if a transaction is bound to the current thread.
    pub fn is_bound() -> bool {
        BOUND.with(|b| b.borrow().is_some())
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.nodes.is_empty() {
            tracing::warn!(transaction = self.id, "transaction dropped while active, rolling back");
            self.rollback_nodes();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("nodes", &self.nodes.len())
            .field("rollback_only", &self.rollback_only)
            .field("state", &self.state)
            .finish()
    }
}

/// Guard of a thread-bound transaction.
///
/// Dropping the guard without calling [`commit`](Self::commit) rolls the
/// transaction back.
#[derive(Debug)]
pub struct BoundTransaction {
    finished: bool,
}

impl BoundTransaction {
    /// Unbinds and commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns the commit error; a rollback-only transaction fails here.
    pub fn commit(mut self) -> CoreResult<()> {
        self.finished = true;
        match BOUND.with(|b| b.borrow_mut().take()) {
            Some(tx) => tx.commit(),
            None => Err(CoreError::invalid_operation("no transaction bound to this thread")),
        }
    }

    /// Unbinds and rolls back the transaction.
    pub fn rollback(mut self) {
        self.finished = true;
        if let Some(tx) = BOUND.with(|b| b.borrow_mut().take()) {
            tx.rollback();
        }
    }
}

impl Drop for BoundTransaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(tx) = BOUND.with(|b| b.borrow_mut().take()) {
                tx.rollback();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormgraph_codec::Value;
    use ormgraph_storage::{BatchQuery, DataRow, DbEntity, InsertBatch, MemoryDataNode, Schema};

    fn node() -> Arc<MemoryDataNode> {
        let schema = Schema::new().with_entity(DbEntity::new("ARTIST").pk("ARTIST_ID"));
        Arc::new(MemoryDataNode::new("node", Arc::new(schema)))
    }

    fn insert(tx: &mut Transaction, node: &Arc<dyn DataNode>, id: i64) -> CoreResult<()> {
        let ntx = tx.node_tx(node)?;
        node.execute(
            ntx,
            &BatchQuery::Insert(InsertBatch {
                table: "ARTIST".into(),
                columns: vec!["ARTIST_ID".into()],
                rows: vec![vec![Value::Integer(id)]],
            }),
        )
        .map_err(|source| CoreError::CommitFailed { source })?;
        Ok(())
    }

    #[test]
    fn perform_commits_on_success() {
        let memory = node();
        let node: Arc<dyn DataNode> = memory.clone();
        Transaction::perform(|tx| insert(tx, &node, 1)).unwrap();
        assert_eq!(memory.rows("ARTIST"), vec![DataRow::from_pairs([("ARTIST_ID", 1i64)])]);
        assert_eq!(memory.open_transactions(), 0);
    }

    #[test]
    fn perform_rolls_back_on_error() {
        let memory = node();
        let node: Arc<dyn DataNode> = memory.clone();
        let result: CoreResult<()> = Transaction::perform(|tx| {
            insert(tx, &node, 1)?;
            Err(CoreError::invalid_operation("boom"))
        });
        assert!(result.is_err());
        assert_eq!(memory.row_count("ARTIST"), 0);
        assert_eq!(memory.open_transactions(), 0);
    }

    #[test]
    fn node_tx_is_reused() {
        let node: Arc<dyn DataNode> = node();
        let mut tx = Transaction::new();
        let first = tx.node_tx(&node).unwrap();
        let second = tx.node_tx(&node).unwrap();
        assert_eq!(first, second);
        assert_eq!(tx.node_count(), 1);
        tx.rollback();
    }

    #[test]
    fn bound_transaction_spans_performs() {
        let memory = node();
        let node: Arc<dyn DataNode> = memory.clone();
        let bound = Transaction::new().bind().unwrap();
        Transaction::perform(|tx| insert(tx, &node, 1)).unwrap();
        Transaction::perform(|tx| insert(tx, &node, 2)).unwrap();
        assert_eq!(memory.row_count("ARTIST"), 0);
        bound.commit().unwrap();
        assert_eq!(memory.row_count("ARTIST"), 2);
        assert!(!Transaction::is_bound());
    }

    #[test]
    fn failure_marks_bound_transaction_rollback_only() {
        let memory = node();
        let node: Arc<dyn DataNode> = memory.clone();
        let bound = Transaction::new().bind().unwrap();
        Transaction::perform(|tx| insert(tx, &node, 1)).unwrap();
        let failed: CoreResult<()> = Transaction::perform(|_| Err(CoreError::invalid_operation("boom")));
        assert!(failed.is_err());
        assert!(bound.commit().is_err());
        assert_eq!(memory.row_count("ARTIST"), 0);
        assert_eq!(memory.open_transactions(), 0);
    }

    #[test]
    fn dropped_guard_rolls_back() {
        let memory = node();
        let node: Arc<dyn DataNode> = memory.clone();
        {
            let _bound = Transaction::new().bind().unwrap();
            Transaction::perform(|tx| insert(tx, &node, 1)).unwrap();
        }
        assert_eq!(memory.row_count("ARTIST"), 0);
        assert!(!Transaction::is_bound());
    }

    #[test]
    fn second_bind_is_rejected() {
        let bound = Transaction::new().bind().unwrap();
        assert!(Transaction::new().bind().is_err());
        bound.rollback();
    }
}
