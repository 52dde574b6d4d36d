//! Cursor over query results that keeps its transaction open.

use crate::error::{CoreError, CoreResult};
use ormgraph_storage::{DataNode, DataRow, NodeTxId};
use std::collections::VecDeque;
use std::sync::Arc;

/// Iterates over the rows of a query.
///
/// The read transaction the rows come from stays open until
/// [`close`](Self::close) is called. Dropping an unclosed iterator rolls
/// the transaction back and logs a warning: the caller leaked it.
pub struct ResultIterator {
    node: Arc<dyn DataNode>,
    tx: Option<NodeTxId>,
    rows: VecDeque<DataRow>,
    fetched: usize,
}

impl ResultIterator {
    pub(crate) fn new(node: Arc<dyn DataNode>, tx: NodeTxId, rows: Vec<DataRow>) -> Self {
        Self {
            node,
            tx: Some(tx),
            fetched: 0,
            rows: rows.into(),
        }
    }

    /// Returns the next row.
    ///
    /// # Errors
    ///
    /// Returns `IteratorClosed` after [`close`](Self::close).
    pub fn next_row(&mut self) -> CoreResult<Option<DataRow>> {
        if self.tx.is_none() {
            return Err(CoreError::IteratorClosed);
        }
        let row = self.rows.pop_front();
        if row.is_some() {
            self.fetched += 1;
        }
        Ok(row)
    }

    /// Returns up to `n` rows.
    ///
    /// # Errors
    ///
    /// Returns `IteratorClosed` after [`close`](Self::close).
    pub fn next_rows(&mut self, n: usize) -> CoreResult<Vec<DataRow>> {
        let mut rows = Vec::with_capacity(n.min(self.rows.len()));
        while rows.len() < n {
            match self.next_row()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Returns true while more rows are available.
    pub fn has_next(&self) -> bool {
        self.tx.is_some() && !self.rows.is_empty()
    }

    /// Number of rows returned so far.
    pub fn fetched(&self) -> usize {
        self.fetched
    }

    /// Returns true once closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Ends the read transaction. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the node fails to end the transaction.
    pub fn close(&mut self) -> CoreResult<()> {
        self.rows.clear();
        match self.tx.take() {
            Some(tx) => Ok(self.node.commit(tx)?),
            None => Ok(()),
        }
    }
}

impl Iterator for ResultIterator {
    type Item = DataRow;

    fn next(&mut self) -> Option<DataRow> {
        self.next_row().ok().flatten()
    }
}

impl Drop for ResultIterator {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!(
                node = self.node.name(),
                %tx,
                fetched = self.fetched,
                "result iterator dropped without close(), rolling back its transaction"
            );
            if let Err(err) = self.node.rollback(tx) {
                tracing::warn!(node = self.node.name(), error = %err, "rollback of leaked iterator failed");
            }
        }
    }
}

impl std::fmt::Debug for ResultIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultIterator")
            .field("node", &self.node.name())
            .field("open", &self.tx.is_some())
            .field("remaining", &self.rows.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormgraph_storage::{DbEntity, MemoryDataNode, Schema, TxMode};

    fn iterator(rows: usize) -> (Arc<MemoryDataNode>, ResultIterator) {
        let schema = Schema::new().with_entity(DbEntity::new("ARTIST").pk("ARTIST_ID"));
        let node = Arc::new(MemoryDataNode::new("node", Arc::new(schema)));
        for i in 0..rows {
            node.seed("ARTIST", DataRow::from_pairs([("ARTIST_ID", i as i64)])).unwrap();
        }
        let tx = node.begin(TxMode::ReadOnly).unwrap();
        let fetched = node.select(tx, "ARTIST", &[]).unwrap();
        let dyn_node: Arc<dyn DataNode> = node.clone();
        (node, ResultIterator::new(dyn_node, tx, fetched))
    }

    #[test]
    fn close_ends_the_transaction() {
        let (node, mut rows) = iterator(3);
        assert_eq!(node.open_transactions(), 1);
        assert_eq!(rows.next_rows(2).unwrap().len(), 2);
        assert!(rows.has_next());
        rows.close().unwrap();
        assert_eq!(node.open_transactions(), 0);
        assert!(matches!(rows.next_row(), Err(CoreError::IteratorClosed)));
        rows.close().unwrap();
    }

    #[test]
    fn drop_without_close_rolls_back() {
        let (node, rows) = iterator(1);
        drop(rows);
        assert_eq!(node.open_transactions(), 0);
    }

    #[test]
    fn iterates_all_rows() {
        let (_node, mut rows) = iterator(4);
        assert_eq!(rows.by_ref().count(), 4);
        assert_eq!(rows.fetched(), 4);
        rows.close().unwrap();
    }
}
