//! Planned batches: statement shapes whose values may still depend on
//! keys assigned while the flush runs.

use crate::domain::DataDomain;
use crate::error::{CoreError, CoreResult};
use crate::identity::Identity;
use crate::map::{EntityResolver, ObjRelationship};
use crate::object::{DataObject, Fault, ObjectRef, PropertyValue, Relationship};
use crate::object_store::ObjectStore;
use crate::sorter::DependencySorter;
use ormgraph_codec::Value;
use ormgraph_storage::{
    BatchQuery, BatchResult, DbRelationship, DeleteBatch, InsertBatch, KeyMap, QualifierColumn,
    StatementKind, UpdateBatch, UpdateRow,
};
use std::collections::HashMap;

/// A column value known at planning time, or the key column of an
/// object inserted earlier in the same flush.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ColumnValue {
    Value(Value),
    KeyOf {
        object: ObjectRef,
        entity: String,
        column: String,
    },
}

impl ColumnValue {
    pub(crate) fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Value(Value::Null))
    }

    pub(crate) fn deferred_object(&self) -> Option<ObjectRef> {
        match self {
            ColumnValue::KeyOf { object, .. } => Some(*object),
            ColumnValue::Value(_) => None,
        }
    }

    /// Resolves the value against the keys assigned so far.
    pub(crate) fn resolve(&self, keys: &HashMap<ObjectRef, KeyMap>) -> CoreResult<Value> {
        match self {
            ColumnValue::Value(value) => Ok(value.clone()),
            ColumnValue::KeyOf {
                object,
                entity,
                column,
            } => keys
                .get(object)
                .and_then(|key| key.get(column))
                .cloned()
                .ok_or_else(|| {
                    CoreError::pk_propagation(
                        entity,
                        format!("{column} of a related new object is not assigned before it is needed"),
                    )
                }),
        }
    }
}

/// One row of a planned batch.
#[derive(Debug, Clone)]
pub(crate) struct PlannedRow {
    /// The object the row belongs to; join rows have none.
    pub(crate) owner: Option<(ObjectRef, Identity)>,
    /// Values of the batch columns.
    pub(crate) values: Vec<ColumnValue>,
    /// Values of the non-null qualifier columns.
    pub(crate) qualifier: Vec<ColumnValue>,
}

/// A batch whose rows are materialized right before execution.
#[derive(Debug, Clone)]
pub(crate) struct PlannedBatch {
    pub(crate) kind: StatementKind,
    pub(crate) table: String,
    pub(crate) node: usize,
    /// Insert columns, or update columns.
    pub(crate) columns: Vec<String>,
    pub(crate) qualifier: Vec<QualifierColumn>,
    pub(crate) optimistic: bool,
    pub(crate) rows: Vec<PlannedRow>,
}

impl PlannedBatch {
    pub(crate) fn insert(table: &str, node: usize, columns: Vec<String>, rows: Vec<PlannedRow>) -> Self {
        Self {
            kind: StatementKind::Insert,
            table: table.to_string(),
            node,
            columns,
            qualifier: Vec::new(),
            optimistic: false,
            rows,
        }
    }

    pub(crate) fn update(
        table: &str,
        node: usize,
        columns: Vec<String>,
        qualifier: Vec<QualifierColumn>,
        optimistic: bool,
        rows: Vec<PlannedRow>,
    ) -> Self {
        Self {
            kind: StatementKind::Update,
            table: table.to_string(),
            node,
            columns,
            qualifier,
            optimistic,
            rows,
        }
    }

    pub(crate) fn delete(
        table: &str,
        node: usize,
        qualifier: Vec<QualifierColumn>,
        optimistic: bool,
        rows: Vec<PlannedRow>,
    ) -> Self {
        Self {
            kind: StatementKind::Delete,
            table: table.to_string(),
            node,
            columns: Vec::new(),
            qualifier,
            optimistic,
            rows,
        }
    }

    /// Splits the batch into batches of at most `max` rows (0 keeps it whole).
    pub(crate) fn split(self, max: usize) -> Vec<PlannedBatch> {
        if max == 0 || self.rows.len() <= max {
            return vec![self];
        }
        let Self {
            kind,
            table,
            node,
            columns,
            qualifier,
            optimistic,
            rows,
        } = self;
        rows.chunks(max)
            .map(|chunk| PlannedBatch {
                kind,
                table: table.clone(),
                node,
                columns: columns.clone(),
                qualifier: qualifier.clone(),
                optimistic,
                rows: chunk.to_vec(),
            })
            .collect()
    }

    /// Builds the executable batch.
    pub(crate) fn materialize(&self, keys: &HashMap<ObjectRef, KeyMap>) -> CoreResult<BatchQuery> {
        let resolve_all = |values: &[ColumnValue]| -> CoreResult<Vec<Value>> {
            values.iter().map(|v| v.resolve(keys)).collect()
        };
        let query = match self.kind {
            StatementKind::Insert => BatchQuery::Insert(InsertBatch {
                table: self.table.clone(),
                columns: self.columns.clone(),
                rows: self
                    .rows
                    .iter()
                    .map(|row| resolve_all(&row.values))
                    .collect::<CoreResult<_>>()?,
            }),
            StatementKind::Update => BatchQuery::Update(UpdateBatch {
                table: self.table.clone(),
                update_columns: self.columns.clone(),
                qualifier: self.qualifier.clone(),
                rows: self
                    .rows
                    .iter()
                    .map(|row| {
                        Ok(UpdateRow {
                            values: resolve_all(&row.values)?,
                            qualifier: resolve_all(&row.qualifier)?,
                        })
                    })
                    .collect::<CoreResult<_>>()?,
                optimistic: self.optimistic,
            }),
            StatementKind::Delete => BatchQuery::Delete(DeleteBatch {
                table: self.table.clone(),
                qualifier: self.qualifier.clone(),
                rows: self
                    .rows
                    .iter()
                    .map(|row| resolve_all(&row.qualifier))
                    .collect::<CoreResult<_>>()?,
                optimistic: self.optimistic,
            }),
        };
        Ok(query)
    }

    /// Checks that every object row of an update or delete matched
    /// exactly one row.
    pub(crate) fn verify_counts(&self, result: &BatchResult) -> CoreResult<()> {
        if self.kind == StatementKind::Insert {
            return Ok(());
        }
        for (i, row) in self.rows.iter().enumerate() {
            let Some((_, identity)) = &row.owner else {
                continue;
            };
            let actual = result.counts.get(i).copied().unwrap_or(0);
            if actual != 1 {
                return Err(CoreError::OptimisticLock {
                    entity: self.table.clone(),
                    identity: identity.clone(),
                    expected: 1,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Records the keys of inserted objects: written key columns plus
    /// the values the database generated.
    pub(crate) fn capture_keys(
        &self,
        query: &BatchQuery,
        result: &BatchResult,
        key_columns: &[String],
        keys: &mut HashMap<ObjectRef, KeyMap>,
    ) {
        let BatchQuery::Insert(insert) = query else {
            return;
        };
        for (i, (planned, values)) in self.rows.iter().zip(&insert.rows).enumerate() {
            let Some((object, _)) = planned.owner else {
                continue;
            };
            let key = keys.entry(object).or_default();
            for (column, value) in insert.columns.iter().zip(values) {
                if key_columns.contains(column) {
                    key.insert(column.clone(), value.clone());
                }
            }
            if let Some(generated) = result.generated_keys.get(i) {
                key.extend(generated.iter().map(|(c, v)| (c.clone(), v.clone())));
            }
        }
    }
}

/// Read access to the domain and store while a flush is planned.
pub(crate) struct PlanContext<'a> {
    pub(crate) domain: &'a DataDomain,
    pub(crate) store: &'a ObjectStore,
    pub(crate) sorter: &'a DependencySorter,
}

impl<'a> PlanContext<'a> {
    pub(crate) fn resolver(&self) -> &'a EntityResolver {
        self.store.resolver()
    }

    pub(crate) fn node_index(&self, table: &str) -> usize {
        self.domain.node_index(table)
    }

    /// Value of a key column of a registered object.
    ///
    /// Objects with a permanent identity yield the value directly; new
    /// objects yield a deferred key resolved once their row is inserted.
    pub(crate) fn key_value(&self, target: ObjectRef, column: &str) -> CoreResult<ColumnValue> {
        let object = self.store.object(target)?;
        match object.identity() {
            Some(id) if id.is_temporary() => Ok(ColumnValue::KeyOf {
                object: target,
                entity: object.entity_name().to_string(),
                column: column.to_string(),
            }),
            Some(id) => match id.value(column) {
                Some(value) => Ok(ColumnValue::Value(value.clone())),
                None => self.attribute_column(object, column),
            },
            None => Err(CoreError::pk_propagation(
                object.entity_name(),
                "related object is not registered with the context",
            )),
        }
    }

    /// Value of a key column of the object with an identity.
    pub(crate) fn identity_value(&self, id: &Identity, column: &str) -> CoreResult<ColumnValue> {
        if let Some(value) = id.value(column) {
            return Ok(ColumnValue::Value(value.clone()));
        }
        match self.store.lookup(id) {
            Some(target) => self.key_value(target, column),
            None => Err(CoreError::pk_propagation(
                id.entity_name(),
                format!("{id} has no value for {column}"),
            )),
        }
    }

    fn attribute_column(&self, object: &DataObject, column: &str) -> CoreResult<ColumnValue> {
        let entity = self.resolver().entity(object.entity_name())?;
        entity
            .attribute_for_column(column)
            .map(|attr| ColumnValue::Value(object.value(&attr.name).clone()))
            .ok_or_else(|| {
                CoreError::pk_propagation(
                    &entity.name,
                    format!("column {column} is neither a key nor a mapped attribute"),
                )
            })
    }

    /// Foreign key columns of a to-one, or `None` if the target is
    /// unknown without a query.
    pub(crate) fn fk_values(
        &self,
        object: &DataObject,
        rel: &ObjRelationship,
        db_rel: &DbRelationship,
    ) -> CoreResult<Option<Vec<(String, ColumnValue)>>> {
        let values = match object.property(&rel.name) {
            Some(PropertyValue::ToOne(Relationship::Resolved(Some(target)))) => db_rel
                .joins
                .iter()
                .map(|j| Ok((j.source.clone(), self.key_value(*target, &j.target)?)))
                .collect::<CoreResult<Vec<_>>>()?,
            Some(PropertyValue::ToOne(Relationship::Resolved(None))) => db_rel
                .joins
                .iter()
                .map(|j| (j.source.clone(), ColumnValue::Value(Value::Null)))
                .collect(),
            Some(PropertyValue::ToOne(Relationship::Fault(Fault::ToOne(Some(id))))) => db_rel
                .joins
                .iter()
                .map(|j| Ok((j.source.clone(), self.identity_value(id, &j.target)?)))
                .collect::<CoreResult<Vec<_>>>()?,
            _ => return Ok(None),
        };
        Ok(Some(values))
    }

    /// Permanent identity of an object after the flush, given the keys
    /// assigned during it.
    pub(crate) fn final_identity(&self, r: ObjectRef, keys: &HashMap<ObjectRef, KeyMap>) -> Option<Identity> {
        let object = self.store.object(r).ok()?;
        let id = object.identity()?;
        if !id.is_temporary() {
            return Some(id.clone());
        }
        let entity = self.resolver().entity(object.entity_name()).ok()?;
        let table = self.resolver().db_entity(entity).ok()?;
        let assigned = keys.get(&r)?;
        let mut key = KeyMap::new();
        for attr in table.primary_key() {
            key.insert(attr.name.clone(), assigned.get(&attr.name)?.clone());
        }
        Some(Identity::permanent(&entity.name, key))
    }
}
