//! UPDATE batches for MODIFIED objects.

use super::plan::{ColumnValue, PlanContext, PlannedBatch, PlannedRow};
use crate::error::CoreResult;
use crate::map::{LockType, ObjEntity};
use crate::object::{DataObject, ObjectRef, PersistenceState};
use crate::object_diff::ObjectDiff;
use ormgraph_codec::Value;
use ormgraph_storage::{DbEntity, KeyMap, QualifierColumn};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Batch shape: table, written columns and qualifier.
type UpdateShape = (String, Vec<String>, Vec<QualifierColumn>);

/// Plans updates of the columns each MODIFIED object actually changed.
///
/// Objects whose changes touch no column of their own row (for example
/// only a to-many relationship) produce no update.
pub(crate) fn plan_updates(ctx: &PlanContext<'_>) -> CoreResult<Vec<PlannedBatch>> {
    let resolver = ctx.resolver();
    let mut groups: Vec<(UpdateShape, bool, Vec<PlannedRow>)> = Vec::new();

    for diff in ctx.store.diffs() {
        let r = diff.object();
        let object = ctx.store.object(r)?;
        if object.state() != PersistenceState::Modified {
            continue;
        }
        let entity = resolver.entity(object.entity_name())?;
        let table = resolver.db_entity(entity)?;

        let changed = changed_columns(ctx, object, entity, table, diff)?;
        if changed.is_empty() {
            continue;
        }
        let (qualifier, qualifier_values) = qualifier(entity, table, diff);
        let columns: Vec<String> = changed.keys().cloned().collect();
        let row = PlannedRow {
            owner: Some((r, diff.node_id().clone())),
            values: changed.into_values().collect(),
            qualifier: qualifier_values,
        };
        let shape = (table.name.clone(), columns, qualifier);
        match groups.iter_mut().find(|(s, _, _)| *s == shape) {
            Some((_, _, rows)) => rows.push(row),
            None => groups.push((shape, entity.lock_type == LockType::Optimistic, vec![row])),
        }
    }

    groups.sort_by_key(|((table, _, _), _, _)| ctx.sorter.insert_rank(table));
    for (_, _, rows) in &mut groups {
        rows.sort_by(|a, b| key_order(a, b));
    }
    Ok(groups
        .into_iter()
        .map(|((table, columns, qualifier), optimistic, rows)| {
            tracing::debug!(%table, rows = rows.len(), columns = ?columns, "update bucket");
            PlannedBatch::update(&table, ctx.node_index(&table), columns, qualifier, optimistic, rows)
        })
        .collect())
}

fn changed_columns(
    ctx: &PlanContext<'_>,
    object: &DataObject,
    entity: &ObjEntity,
    table: &DbEntity,
    diff: &ObjectDiff,
) -> CoreResult<BTreeMap<String, ColumnValue>> {
    let mut changed = BTreeMap::new();
    for attr in &entity.attributes {
        if table.is_pk_column(&attr.column) {
            continue;
        }
        let value = object.value(&attr.name);
        if value != diff.snapshot_value(&attr.name) {
            changed.insert(attr.column.clone(), ColumnValue::Value(value.clone()));
        }
    }

    let arena = ctx.store.arena();
    for rel in entity.relationships.iter().filter(|r| !r.to_many) {
        let Some(db_rel) = ctx.resolver().fk_relationship(entity, rel) else {
            continue;
        };
        let (Some(committed), Some(current)) = (diff.arc_snapshot(&rel.name), arena.to_one_identity(object, &rel.name))
        else {
            continue;
        };
        if *committed == current {
            continue;
        }
        if let Some(values) = ctx.fk_values(object, rel, db_rel)? {
            for (column, value) in values {
                if !table.is_pk_column(&column) {
                    changed.insert(column, value);
                }
            }
        }
    }
    Ok(changed)
}

/// Primary key plus, for optimistic entities, the committed values of
/// locked attributes. NULL snapshots are matched with `IS NULL`.
pub(crate) fn qualifier(
    entity: &ObjEntity,
    table: &DbEntity,
    diff: &ObjectDiff,
) -> (Vec<QualifierColumn>, Vec<ColumnValue>) {
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for attr in table.primary_key() {
        let value = diff
            .node_id()
            .value(&attr.name)
            .cloned()
            .or_else(|| {
                entity
                    .attribute_for_column(&attr.name)
                    .map(|a| diff.snapshot_value(&a.name).clone())
            })
            .unwrap_or(Value::Null);
        columns.push(QualifierColumn::by_value(&attr.name));
        values.push(ColumnValue::Value(value));
    }
    for attr in entity.locked_attributes() {
        let committed = diff.snapshot_value(&attr.name);
        if committed.is_null() {
            columns.push(QualifierColumn::null(&attr.column));
        } else {
            columns.push(QualifierColumn::by_value(&attr.column));
            values.push(ColumnValue::Value(committed.clone()));
        }
    }
    (columns, values)
}

/// Handles of objects with an update row in `batches`.
pub(crate) fn updated_objects(batches: &[PlannedBatch]) -> Vec<ObjectRef> {
    batches
        .iter()
        .flat_map(|b| &b.rows)
        .filter_map(|row| row.owner.as_ref().map(|(r, _)| *r))
        .collect()
}

/// Orders rows of one batch by the primary key of their owner.
fn key_order(a: &PlannedRow, b: &PlannedRow) -> Ordering {
    match (owner_key(a), owner_key(b)) {
        (Some(a), Some(b)) => a
            .values()
            .zip(b.values())
            .map(|(x, y)| x.cmp_total(y))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn owner_key(row: &PlannedRow) -> Option<&KeyMap> {
    row.owner.as_ref().and_then(|(_, id)| id.key())
}
