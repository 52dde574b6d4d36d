//! In-memory data node for testing.

use crate::batch::{
    BatchQuery, BatchResult, DeleteBatch, ExecutedStatement, InsertBatch, QualifierColumn,
    UpdateBatch,
};
use crate::error::{StorageError, StorageResult};
use crate::node::{DataNode, NodeTxId, TxMode};
use crate::row::{DataRow, KeyMap};
use crate::schema::{DbEntity, Schema};
use ormgraph_codec::Value;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// First value handed out by the key generator.
const FIRST_GENERATED_KEY: i64 = 200;

type Row = BTreeMap<String, Value>;
type Tables = HashMap<String, Vec<Row>>;

/// An in-memory relational data node.
///
/// This node keeps every table in memory and enforces the constraints a
/// real database would: primary key uniqueness, NOT NULL columns, and
/// foreign keys derived from the schema's dependency relationships. It is
/// suitable for:
/// - Unit and integration tests of the commit pipeline
/// - Ephemeral stores that don't need persistence
///
/// Every executed batch is appended to a statement log so tests can
/// observe exactly which operations were issued and in which order.
///
/// # Thread Safety
///
/// One read-write transaction runs at a time; a second writer blocks in
/// `begin` until the first commits or rolls back. Read-only transactions
/// see the last committed state and never block.
///
/// # Example
///
/// ```rust
/// use ormgraph_storage::{DataNode, DbEntity, MemoryDataNode, Schema, TxMode};
/// use std::sync::Arc;
///
/// let schema = Arc::new(Schema::new().with_entity(
///     DbEntity::new("ARTIST").pk("ARTIST_ID").column("ARTIST_NAME", true),
/// ));
/// let node = MemoryDataNode::new("node", schema);
/// let tx = node.begin(TxMode::ReadWrite).unwrap();
/// node.commit(tx).unwrap();
/// assert_eq!(node.row_count("ARTIST"), 0);
/// ```
pub struct MemoryDataNode {
    name: String,
    schema: Arc<Schema>,
    state: Mutex<NodeState>,
    writer_released: Condvar,
}

#[derive(Debug, Default)]
struct NodeState {
    /// Current table contents, including uncommitted writes of the writer.
    tables: Tables,
    /// Committed contents, saved while a writer is active.
    committed: Option<Tables>,
    writer: Option<NodeTxId>,
    readers: HashSet<NodeTxId>,
    next_tx: u64,
    sequences: HashMap<String, i64>,
    log: Vec<ExecutedStatement>,
}

impl NodeState {
    fn committed_view(&self) -> &Tables {
        self.committed.as_ref().unwrap_or(&self.tables)
    }

    fn next_sequence(&mut self, table: &str, column: &str) -> i64 {
        let next = self
            .sequences
            .entry(format!("{table}.{column}"))
            .or_insert(FIRST_GENERATED_KEY);
        let value = *next;
        *next += 1;
        value
    }
}

impl MemoryDataNode {
    /// Creates an empty node with one empty table per schema entity.
    pub fn new(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        let tables = schema
            .entities()
            .map(|e| (e.name.clone(), Vec::new()))
            .collect();
        Self {
            name: name.into(),
            schema,
            state: Mutex::new(NodeState {
                tables,
                next_tx: 1,
                ..NodeState::default()
            }),
            writer_released: Condvar::new(),
        }
    }

    /// Returns the schema this node enforces.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Inserts a committed row directly, bypassing transactions and the
    /// statement log. Constraints are still enforced.
    ///
    /// Useful for seeding test data.
    pub fn seed(&self, table: &str, row: DataRow) -> StorageResult<()> {
        let mut state = self.state.lock();
        let entity = self.entity(table)?;
        let mut values = row.into_values();
        for attr in &entity.attributes {
            values.entry(attr.name.clone()).or_insert(Value::Null);
        }
        self.check_row(&state.tables, entity, &values, None)?;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(values.clone());
        if let Some(committed) = state.committed.as_mut() {
            committed.entry(table.to_string()).or_default().push(values);
        }
        Ok(())
    }

    /// Returns all committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<DataRow> {
        let state = self.state.lock();
        state
            .committed_view()
            .get(table)
            .map(|rows| rows.iter().cloned().map(DataRow::new).collect())
            .unwrap_or_default()
    }

    /// Returns the number of committed rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        let state = self.state.lock();
        state.committed_view().get(table).map_or(0, Vec::len)
    }

    /// Returns a copy of the statement log.
    pub fn statement_log(&self) -> Vec<ExecutedStatement> {
        self.state.lock().log.clone()
    }

    /// Clears the statement log.
    pub fn clear_statement_log(&self) {
        self.state.lock().log.clear();
    }

    /// Returns the number of open transactions (writer plus readers).
    pub fn open_transactions(&self) -> usize {
        let state = self.state.lock();
        state.readers.len() + usize::from(state.writer.is_some())
    }

    fn entity(&self, table: &str) -> StorageResult<&DbEntity> {
        self.schema
            .entity(table)
            .ok_or_else(|| StorageError::table_not_found(table))
    }

    fn check_columns<'a>(
        entity: &DbEntity,
        columns: impl IntoIterator<Item = &'a String>,
    ) -> StorageResult<()> {
        for column in columns {
            if entity.attribute(column).is_none() {
                return Err(StorageError::ColumnNotFound {
                    table: entity.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validates NOT NULL, primary key uniqueness and outgoing foreign keys
    /// of `row`. `skip` is the index of the row being replaced, if any.
    fn check_row(
        &self,
        tables: &Tables,
        entity: &DbEntity,
        row: &Row,
        skip: Option<usize>,
    ) -> StorageResult<()> {
        for attr in &entity.attributes {
            if attr.mandatory && row.get(&attr.name).map_or(true, Value::is_null) {
                return Err(StorageError::NotNullViolation {
                    table: entity.name.clone(),
                    column: attr.name.clone(),
                });
            }
        }

        let pk: Vec<&str> = entity.primary_key().map(|a| a.name.as_str()).collect();
        if !pk.is_empty() {
            let existing = tables.get(&entity.name).map(Vec::as_slice).unwrap_or(&[]);
            let duplicate = existing.iter().enumerate().any(|(i, other)| {
                Some(i) != skip && pk.iter().all(|c| other.get(*c) == row.get(*c))
            });
            if duplicate {
                return Err(StorageError::DuplicateKey {
                    table: entity.name.clone(),
                    key: render_key(row, &pk),
                });
            }
        }

        for rel in self.schema.dependencies(entity) {
            let fk: Vec<(&str, &Value)> = rel
                .joins
                .iter()
                .filter_map(|j| row.get(&j.source).map(|v| (j.target.as_str(), v)))
                .collect();
            if fk.len() != rel.joins.len() || fk.iter().any(|(_, v)| v.is_null()) {
                continue;
            }
            let target_rows = tables.get(&rel.target).map(Vec::as_slice).unwrap_or(&[]);
            let found = target_rows
                .iter()
                .any(|t| fk.iter().all(|(col, v)| t.get(*col) == Some(*v)));
            if !found {
                return Err(StorageError::ForeignKeyViolation {
                    table: entity.name.clone(),
                    relationship: rel.name.clone(),
                    message: format!("no {} row for {}", rel.target, render_pairs(&fk)),
                });
            }
        }
        Ok(())
    }

    /// Rejects deleting `row` of `entity` while other rows reference it.
    fn check_not_referenced(
        &self,
        tables: &Tables,
        entity: &DbEntity,
        row: &Row,
    ) -> StorageResult<()> {
        for source in self.schema.entities() {
            for rel in self.schema.dependencies(source) {
                if rel.target != entity.name {
                    continue;
                }
                let key: Vec<(&str, &Value)> = rel
                    .joins
                    .iter()
                    .filter_map(|j| row.get(&j.target).map(|v| (j.source.as_str(), v)))
                    .collect();
                if key.len() != rel.joins.len() || key.iter().any(|(_, v)| v.is_null()) {
                    continue;
                }
                let referencing = tables
                    .get(&source.name)
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
                    .iter()
                    .any(|r| key.iter().all(|(col, v)| r.get(*col) == Some(*v)));
                if referencing {
                    return Err(StorageError::ForeignKeyViolation {
                        table: source.name.clone(),
                        relationship: rel.name.clone(),
                        message: format!(
                            "{} row {} is still referenced",
                            entity.name,
                            render_pairs(&key)
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn execute_insert(
        &self,
        state: &mut NodeState,
        batch: &InsertBatch,
    ) -> StorageResult<BatchResult> {
        let entity = self.entity(&batch.table)?;
        Self::check_columns(entity, &batch.columns)?;

        let mut result = BatchResult::default();
        for values in &batch.rows {
            if values.len() != batch.columns.len() {
                return Err(StorageError::invalid_batch(format!(
                    "insert into {} binds {} values for {} columns",
                    batch.table,
                    values.len(),
                    batch.columns.len()
                )));
            }
            let mut row: Row = batch
                .columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect();

            let mut generated = KeyMap::new();
            for attr in &entity.attributes {
                let missing = row.get(&attr.name).map_or(true, Value::is_null);
                if attr.generated && missing {
                    let value = Value::Integer(state.next_sequence(&entity.name, &attr.name));
                    generated.insert(attr.name.clone(), value.clone());
                    row.insert(attr.name.clone(), value);
                } else {
                    row.entry(attr.name.clone()).or_insert(Value::Null);
                }
            }

            self.check_row(&state.tables, entity, &row, None)?;
            state.tables.entry(entity.name.clone()).or_default().push(row);
            result.counts.push(1);
            result.generated_keys.push(generated);
        }
        Ok(result)
    }

    fn execute_update(
        &self,
        state: &mut NodeState,
        batch: &UpdateBatch,
    ) -> StorageResult<BatchResult> {
        let entity = self.entity(&batch.table)?;
        Self::check_columns(entity, &batch.update_columns)?;
        Self::check_columns(entity, batch.qualifier.iter().map(|q| &q.name))?;

        let mut result = BatchResult::default();
        for update in &batch.rows {
            if update.values.len() != batch.update_columns.len() {
                return Err(StorageError::invalid_batch(format!(
                    "update of {} binds {} values for {} columns",
                    batch.table,
                    update.values.len(),
                    batch.update_columns.len()
                )));
            }
            let matched = matching_rows(&state.tables, &batch.table, &batch.qualifier, &update.qualifier)?;
            for &index in &matched {
                let mut row = state.tables[&batch.table][index].clone();
                for (column, value) in batch.update_columns.iter().zip(&update.values) {
                    row.insert(column.clone(), value.clone());
                }
                self.check_row(&state.tables, entity, &row, Some(index))?;
                if let Some(rows) = state.tables.get_mut(&batch.table) {
                    rows[index] = row;
                }
            }
            result.counts.push(matched.len());
        }
        Ok(result)
    }

    fn execute_delete(
        &self,
        state: &mut NodeState,
        batch: &DeleteBatch,
    ) -> StorageResult<BatchResult> {
        let entity = self.entity(&batch.table)?;
        Self::check_columns(entity, batch.qualifier.iter().map(|q| &q.name))?;

        let mut result = BatchResult::default();
        for qualifier in &batch.rows {
            let matched = matching_rows(&state.tables, &batch.table, &batch.qualifier, qualifier)?;
            for &index in matched.iter().rev() {
                let row = state.tables[&batch.table][index].clone();
                self.check_not_referenced(&state.tables, entity, &row)?;
                if let Some(rows) = state.tables.get_mut(&batch.table) {
                    rows.remove(index);
                }
            }
            result.counts.push(matched.len());
        }
        Ok(result)
    }
}

/// Indices of rows matching a qualifier shape and its bound values.
fn matching_rows(
    tables: &Tables,
    table: &str,
    qualifier: &[QualifierColumn],
    values: &[Value],
) -> StorageResult<Vec<usize>> {
    let bound = qualifier.iter().filter(|q| !q.is_null).count();
    if bound != values.len() {
        return Err(StorageError::invalid_batch(format!(
            "qualifier of {table} binds {} values for {bound} columns",
            values.len()
        )));
    }
    let rows = tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
    Ok(rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            let mut bound_values = values.iter();
            qualifier.iter().all(|q| {
                let actual = row.get(&q.name).unwrap_or(&Value::Null);
                if q.is_null {
                    actual.is_null()
                } else {
                    bound_values.next().is_some_and(|v| !v.is_null() && actual == v)
                }
            })
        })
        .map(|(i, _)| i)
        .collect())
}

fn render_key(row: &Row, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("{c}={}", row.get(*c).unwrap_or(&Value::Null)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_pairs(pairs: &[(&str, &Value)]) -> String {
    pairs
        .iter()
        .map(|(c, v)| format!("{c}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl DataNode for MemoryDataNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin(&self, mode: TxMode) -> StorageResult<NodeTxId> {
        let mut state = self.state.lock();
        let tx = NodeTxId(state.next_tx);
        state.next_tx += 1;
        match mode {
            TxMode::ReadOnly => {
                state.readers.insert(tx);
            }
            TxMode::ReadWrite => {
                while state.writer.is_some() {
                    self.writer_released.wait(&mut state);
                }
                state.writer = Some(tx);
                state.committed = Some(state.tables.clone());
            }
        }
        tracing::trace!(node = %self.name, %tx, ?mode, "transaction started");
        Ok(tx)
    }

    fn commit(&self, tx: NodeTxId) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.writer == Some(tx) {
            state.writer = None;
            state.committed = None;
            self.writer_released.notify_one();
        } else if !state.readers.remove(&tx) {
            return Err(StorageError::NoActiveTransaction {
                node: self.name.clone(),
            });
        }
        tracing::trace!(node = %self.name, %tx, "transaction committed");
        Ok(())
    }

    fn rollback(&self, tx: NodeTxId) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.writer == Some(tx) {
            if let Some(committed) = state.committed.take() {
                state.tables = committed;
            }
            state.writer = None;
            self.writer_released.notify_one();
        } else if !state.readers.remove(&tx) {
            return Err(StorageError::NoActiveTransaction {
                node: self.name.clone(),
            });
        }
        tracing::trace!(node = %self.name, %tx, "transaction rolled back");
        Ok(())
    }

    fn execute(&self, tx: NodeTxId, query: &BatchQuery) -> StorageResult<BatchResult> {
        let mut state = self.state.lock();
        if state.writer != Some(tx) {
            return Err(StorageError::NoActiveTransaction {
                node: self.name.clone(),
            });
        }
        state.log.push(ExecutedStatement {
            kind: query.kind(),
            table: query.table().to_string(),
            rows: query.row_count(),
        });
        match query {
            BatchQuery::Insert(batch) => self.execute_insert(&mut state, batch),
            BatchQuery::Update(batch) => self.execute_update(&mut state, batch),
            BatchQuery::Delete(batch) => self.execute_delete(&mut state, batch),
        }
    }

    fn select(
        &self,
        tx: NodeTxId,
        table: &str,
        qualifier: &[(String, Value)],
    ) -> StorageResult<Vec<DataRow>> {
        let state = self.state.lock();
        let tables = if state.writer == Some(tx) {
            &state.tables
        } else if state.readers.contains(&tx) {
            state.committed_view()
        } else {
            return Err(StorageError::NoActiveTransaction {
                node: self.name.clone(),
            });
        };
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::table_not_found(table))?;
        Ok(rows
            .iter()
            .filter(|row| {
                qualifier
                    .iter()
                    .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
            })
            .cloned()
            .map(DataRow::new)
            .collect())
    }

    fn generate_pk(&self, table: &str, column: &str) -> StorageResult<Value> {
        let entity = self.entity(table)?;
        Self::check_columns(entity, [&column.to_string()])?;
        let mut state = self.state.lock();
        Ok(Value::Integer(state.next_sequence(table, column)))
    }
}

impl std::fmt::Debug for MemoryDataNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDataNode")
            .field("name", &self.name)
            .field("open_transactions", &self.open_transactions())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::UpdateRow;
    use crate::schema::DbRelationship;
    use proptest::prelude::*;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .with_entity(
                    DbEntity::new("ARTIST")
                        .generated_pk("ARTIST_ID")
                        .column("ARTIST_NAME", true),
                )
                .with_entity(
                    DbEntity::new("PAINTING")
                        .pk("PAINTING_ID")
                        .column("PAINTING_TITLE", true)
                        .column("ARTIST_ID", false)
                        .relationship(DbRelationship::to_one(
                            "toArtist",
                            "ARTIST",
                            "ARTIST_ID",
                            "ARTIST_ID",
                        )),
                ),
        )
    }

    fn insert_artist(name: &str) -> BatchQuery {
        BatchQuery::Insert(InsertBatch {
            table: "ARTIST".into(),
            columns: vec!["ARTIST_NAME".into()],
            rows: vec![vec![Value::from(name)]],
        })
    }

    fn insert_painting(id: i64, artist: Value) -> BatchQuery {
        BatchQuery::Insert(InsertBatch {
            table: "PAINTING".into(),
            columns: vec!["PAINTING_ID".into(), "PAINTING_TITLE".into(), "ARTIST_ID".into()],
            rows: vec![vec![Value::Integer(id), Value::from("P"), artist]],
        })
    }

    #[test]
    fn insert_returns_generated_key() {
        let node = MemoryDataNode::new("n", schema());
        let tx = node.begin(TxMode::ReadWrite).unwrap();
        let result = node.execute(tx, &insert_artist("Monet")).unwrap();
        node.commit(tx).unwrap();

        assert_eq!(result.counts, vec![1]);
        assert_eq!(
            result.generated_keys[0].get("ARTIST_ID"),
            Some(&Value::Integer(FIRST_GENERATED_KEY))
        );
        assert_eq!(node.row_count("ARTIST"), 1);
    }

    #[test]
    fn foreign_key_requires_parent() {
        let node = MemoryDataNode::new("n", schema());
        let tx = node.begin(TxMode::ReadWrite).unwrap();
        let result = node.execute(tx, &insert_painting(1, Value::Integer(999)));
        assert!(matches!(result, Err(StorageError::ForeignKeyViolation { .. })));
        node.rollback(tx).unwrap();
    }

    #[test]
    fn null_foreign_key_is_allowed() {
        let node = MemoryDataNode::new("n", schema());
        let tx = node.begin(TxMode::ReadWrite).unwrap();
        node.execute(tx, &insert_painting(1, Value::Null)).unwrap();
        node.commit(tx).unwrap();
        assert_eq!(node.row_count("PAINTING"), 1);
    }

    #[test]
    fn delete_of_referenced_row_is_rejected() {
        let node = MemoryDataNode::new("n", schema());
        let missing_name = node.seed("ARTIST", DataRow::from_pairs([("ARTIST_ID", 1i64)]));
        assert!(matches!(missing_name, Err(StorageError::NotNullViolation { .. })));
        node.seed(
            "ARTIST",
            DataRow::from_pairs([("ARTIST_ID", Value::Integer(1)), ("ARTIST_NAME", Value::from("A"))]),
        )
        .unwrap();
        node.seed(
            "PAINTING",
            DataRow::from_pairs([
                ("PAINTING_ID", Value::Integer(1)),
                ("PAINTING_TITLE", Value::from("P")),
                ("ARTIST_ID", Value::Integer(1)),
            ]),
        )
        .unwrap();

        let tx = node.begin(TxMode::ReadWrite).unwrap();
        let result = node.execute(
            tx,
            &BatchQuery::Delete(DeleteBatch {
                table: "ARTIST".into(),
                qualifier: vec![QualifierColumn::by_value("ARTIST_ID")],
                rows: vec![vec![Value::Integer(1)]],
                optimistic: false,
            }),
        );
        assert!(matches!(result, Err(StorageError::ForeignKeyViolation { .. })));
        node.rollback(tx).unwrap();
        assert_eq!(node.row_count("ARTIST"), 1);
    }

    #[test]
    fn update_with_null_qualifier() {
        let node = MemoryDataNode::new("n", schema());
        node.seed(
            "PAINTING",
            DataRow::from_pairs([
                ("PAINTING_ID", Value::Integer(1)),
                ("PAINTING_TITLE", Value::from("P")),
            ]),
        )
        .unwrap();

        let tx = node.begin(TxMode::ReadWrite).unwrap();
        let result = node
            .execute(
                tx,
                &BatchQuery::Update(UpdateBatch {
                    table: "PAINTING".into(),
                    update_columns: vec!["PAINTING_TITLE".into()],
                    qualifier: vec![
                        QualifierColumn::by_value("PAINTING_ID"),
                        QualifierColumn::null("ARTIST_ID"),
                    ],
                    rows: vec![UpdateRow {
                        values: vec![Value::from("Q")],
                        qualifier: vec![Value::Integer(1)],
                    }],
                    optimistic: true,
                }),
            )
            .unwrap();
        node.commit(tx).unwrap();

        assert_eq!(result.counts, vec![1]);
        assert_eq!(
            node.rows("PAINTING")[0].get("PAINTING_TITLE"),
            Some(&Value::from("Q"))
        );
    }

    #[test]
    fn rollback_discards_writes() {
        let node = MemoryDataNode::new("n", schema());
        let tx = node.begin(TxMode::ReadWrite).unwrap();
        node.execute(tx, &insert_artist("Monet")).unwrap();
        node.rollback(tx).unwrap();
        assert_eq!(node.row_count("ARTIST"), 0);
        assert_eq!(node.statement_log().len(), 1);
    }

    #[test]
    fn readers_see_committed_state_only() {
        let node = MemoryDataNode::new("n", schema());
        let writer = node.begin(TxMode::ReadWrite).unwrap();
        node.execute(writer, &insert_artist("Monet")).unwrap();

        let reader = node.begin(TxMode::ReadOnly).unwrap();
        assert!(node.select(reader, "ARTIST", &[]).unwrap().is_empty());
        assert_eq!(node.select(writer, "ARTIST", &[]).unwrap().len(), 1);
        assert_eq!(node.open_transactions(), 2);

        node.commit(writer).unwrap();
        assert_eq!(node.select(reader, "ARTIST", &[]).unwrap().len(), 1);
        node.commit(reader).unwrap();
        assert_eq!(node.open_transactions(), 0);
    }

    #[test]
    fn execute_outside_transaction_fails() {
        let node = MemoryDataNode::new("n", schema());
        let result = node.execute(NodeTxId(42), &insert_artist("Monet"));
        assert!(matches!(result, Err(StorageError::NoActiveTransaction { .. })));
    }

    #[test]
    fn generate_pk_is_monotonic() {
        let node = MemoryDataNode::new("n", schema());
        let a = node.generate_pk("PAINTING", "PAINTING_ID").unwrap();
        let b = node.generate_pk("PAINTING", "PAINTING_ID").unwrap();
        assert_eq!(a, Value::Integer(FIRST_GENERATED_KEY));
        assert_eq!(b, Value::Integer(FIRST_GENERATED_KEY + 1));
        assert!(node.generate_pk("NOPE", "ID").is_err());
    }

    #[test]
    fn writers_are_serialized() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;
        use std::time::Duration;

        let node = Arc::new(MemoryDataNode::new("n", schema()));
        let first = node.begin(TxMode::ReadWrite).unwrap();
        let second_started = Arc::new(AtomicBool::new(false));

        let handle = {
            let node = Arc::clone(&node);
            let second_started = Arc::clone(&second_started);
            thread::spawn(move || {
                let tx = node.begin(TxMode::ReadWrite).unwrap();
                second_started.store(true, Ordering::SeqCst);
                node.commit(tx).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!second_started.load(Ordering::SeqCst));
        node.commit(first).unwrap();
        handle.join().unwrap();
        assert!(second_started.load(Ordering::SeqCst));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn primary_keys_stay_unique(ids in proptest::collection::vec(0i64..12, 0..24), keep in any::<bool>()) {
            let node = MemoryDataNode::new("n", schema());
            let tx = node.begin(TxMode::ReadWrite).unwrap();
            let mut seen = std::collections::BTreeSet::new();
            for id in &ids {
                let result = node.execute(tx, &insert_painting(*id, Value::Null));
                if seen.insert(*id) {
                    prop_assert_eq!(result.unwrap().counts, vec![1]);
                } else {
                    let duplicate = matches!(result, Err(StorageError::DuplicateKey { .. }));
                    prop_assert!(duplicate);
                }
            }
            prop_assert_eq!(node.statement_log().len(), ids.len());

            if keep {
                node.commit(tx).unwrap();
                prop_assert_eq!(node.row_count("PAINTING"), seen.len());
            } else {
                node.rollback(tx).unwrap();
                prop_assert_eq!(node.row_count("PAINTING"), 0);
            }
            prop_assert_eq!(node.open_transactions(), 0);
        }
    }
}
