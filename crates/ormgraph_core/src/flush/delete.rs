//! DELETE batches for DELETED objects.

use super::plan::{PlanContext, PlannedBatch, PlannedRow};
use super::update::qualifier;
use crate::error::CoreResult;
use crate::identity::Identity;
use crate::map::LockType;
use crate::object::PersistenceState;
use ormgraph_storage::QualifierColumn;
use std::collections::{HashMap, HashSet};

struct DeleteRow {
    identity: Identity,
    parents: Vec<Identity>,
    qualifier: Vec<QualifierColumn>,
    optimistic: bool,
    row: PlannedRow,
}

/// Plans deletes, dependent tables first.
///
/// Rows are qualified like updates. In a table that references itself,
/// children are deleted before their parents.
pub(crate) fn plan_deletes(ctx: &PlanContext<'_>) -> CoreResult<Vec<PlannedBatch>> {
    let resolver = ctx.resolver();
    let mut by_table: HashMap<String, Vec<DeleteRow>> = HashMap::new();

    for diff in ctx.store.diffs() {
        let r = diff.object();
        let object = ctx.store.object(r)?;
        if object.state() != PersistenceState::Deleted {
            continue;
        }
        let entity = resolver.entity(object.entity_name())?;
        let table = resolver.db_entity(entity)?;
        let (qualifier, values) = qualifier(entity, table, diff);

        let reflexive = ctx.sorter.reflexive_relationships(&table.name);
        let parents = entity
            .relationships
            .iter()
            .filter(|rel| !rel.to_many && rel.target == entity.name)
            .filter(|rel| {
                resolver
                    .fk_relationship(entity, rel)
                    .is_some_and(|db_rel| reflexive.contains(db_rel))
            })
            .filter_map(|rel| diff.arc_snapshot(&rel.name).cloned().flatten())
            .collect();

        by_table.entry(table.name.clone()).or_default().push(DeleteRow {
            identity: diff.node_id().clone(),
            parents,
            qualifier,
            optimistic: entity.lock_type == LockType::Optimistic,
            row: PlannedRow {
                owner: Some((r, diff.node_id().clone())),
                values: Vec::new(),
                qualifier: values,
            },
        });
    }

    let mut tables: Vec<String> = by_table.keys().cloned().collect();
    tables.sort();
    ctx.sorter.sort_for_delete(&mut tables);

    let mut batches = Vec::new();
    for table in tables {
        let mut rows = by_table.remove(&table).unwrap_or_default();
        tracing::debug!(%table, rows = rows.len(), "delete bucket");
        let node = ctx.node_index(&table);
        if ctx.sorter.is_reflexive(&table) {
            rows = children_first(ctx, &table, rows)?;
            batches.extend(consecutive_batches(&table, node, rows));
        } else {
            batches.extend(grouped_batches(&table, node, rows));
        }
    }
    Ok(batches)
}

fn children_first(ctx: &PlanContext<'_>, table: &str, rows: Vec<DeleteRow>) -> CoreResult<Vec<DeleteRow>> {
    let dependencies: Vec<(Identity, Vec<Identity>)> = rows
        .iter()
        .map(|row| (row.identity.clone(), row.parents.clone()))
        .collect();
    let mut order = ctx.sorter.sort_rows(table, &dependencies)?;
    order.reverse();
    let mut slots: Vec<Option<DeleteRow>> = rows.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots.get_mut(i).and_then(Option::take))
        .collect())
}

/// One batch per qualifier shape.
fn grouped_batches(table: &str, node: usize, rows: Vec<DeleteRow>) -> Vec<PlannedBatch> {
    let mut groups: Vec<(Vec<QualifierColumn>, bool, Vec<PlannedRow>)> = Vec::new();
    for row in rows {
        match groups.iter_mut().find(|(q, _, _)| *q == row.qualifier) {
            Some((_, _, planned)) => planned.push(row.row),
            None => groups.push((row.qualifier, row.optimistic, vec![row.row])),
        }
    }
    groups
        .into_iter()
        .map(|(qualifier, optimistic, rows)| PlannedBatch::delete(table, node, qualifier, optimistic, rows))
        .collect()
}

/// Keeps the row order: a new batch starts when the shape changes or
/// when the row is the parent of a row already in the batch.
fn consecutive_batches(table: &str, node: usize, rows: Vec<DeleteRow>) -> Vec<PlannedBatch> {
    let mut batches = Vec::new();
    let mut current: Option<(Vec<QualifierColumn>, bool, HashSet<Identity>, Vec<PlannedRow>)> = None;
    for row in rows {
        let fits = current
            .as_ref()
            .is_some_and(|(q, _, parents, _)| *q == row.qualifier && !parents.contains(&row.identity));
        if !fits {
            if let Some((qualifier, optimistic, _, planned)) = current.take() {
                batches.push(PlannedBatch::delete(table, node, qualifier, optimistic, planned));
            }
            current = Some((row.qualifier.clone(), row.optimistic, HashSet::new(), Vec::new()));
        }
        if let Some((_, _, parents, planned)) = current.as_mut() {
            parents.extend(row.parents);
            planned.push(row.row);
        }
    }
    if let Some((qualifier, optimistic, _, planned)) = current {
        batches.push(PlannedBatch::delete(table, node, qualifier, optimistic, planned));
    }
    batches
}
