//! Join table rows of flattened (many-to-many) relationships.

use super::plan::{ColumnValue, PlanContext, PlannedBatch, PlannedRow};
use crate::error::{CoreError, CoreResult};
use crate::identity::Identity;
use crate::object_diff::{ArcOp, FlattenedArcKey};
use ormgraph_storage::QualifierColumn;
use std::collections::BTreeMap;

/// Join row inserts and deletes, each grouped per table and column list.
#[derive(Debug, Default)]
pub(crate) struct FlattenedBatches {
    pub(crate) inserts: Vec<PlannedBatch>,
    pub(crate) deletes: Vec<PlannedBatch>,
    /// Objects at either end of a changed join row.
    pub(crate) endpoints: Vec<Identity>,
}

pub(crate) fn plan_flattened(ctx: &PlanContext<'_>) -> CoreResult<FlattenedBatches> {
    let mut batches = FlattenedBatches::default();
    let mut inserts: Vec<(String, Vec<String>, Vec<PlannedRow>)> = Vec::new();
    let mut deletes: Vec<(String, Vec<String>, Vec<PlannedRow>)> = Vec::new();

    for (key, op) in ctx.store.pending_flattened() {
        let (table, row) = join_row(ctx, &key, op)?;
        batches.endpoints.push(key.source.clone());
        batches.endpoints.push(key.target.clone());
        let columns: Vec<String> = row.keys().cloned().collect();
        let values: Vec<ColumnValue> = row.into_values().collect();
        let (groups, planned) = match op {
            ArcOp::Create => (
                &mut inserts,
                PlannedRow {
                    owner: None,
                    values,
                    qualifier: Vec::new(),
                },
            ),
            ArcOp::Delete => (
                &mut deletes,
                PlannedRow {
                    owner: None,
                    values: Vec::new(),
                    qualifier: values,
                },
            ),
        };
        match groups.iter_mut().find(|(t, c, _)| *t == table && *c == columns) {
            Some((_, _, rows)) => rows.push(planned),
            None => groups.push((table, columns, vec![planned])),
        }
    }

    if !inserts.is_empty() || !deletes.is_empty() {
        tracing::debug!(inserts = inserts.len(), deletes = deletes.len(), "flattened buckets");
    }
    batches.inserts = inserts
        .into_iter()
        .map(|(table, columns, rows)| {
            let node = ctx.node_index(&table);
            PlannedBatch::insert(&table, node, columns, rows)
        })
        .collect();
    batches.deletes = deletes
        .into_iter()
        .map(|(table, columns, rows)| {
            let node = ctx.node_index(&table);
            let qualifier = columns.into_iter().map(QualifierColumn::by_value).collect();
            PlannedBatch::delete(&table, node, qualifier, false, rows)
        })
        .collect();
    Ok(batches)
}

/// Computes the join table row of an arc from the two halves of the
/// relationship path: source to join table, join table to target.
fn join_row(
    ctx: &PlanContext<'_>,
    key: &FlattenedArcKey,
    op: ArcOp,
) -> CoreResult<(String, BTreeMap<String, ColumnValue>)> {
    let resolver = ctx.resolver();
    let entity = resolver.entity(key.source.entity_name())?;
    let rel = resolver.relationship(entity, &key.relationship)?;
    let path = resolver.db_relationships(entity, rel)?;
    let [to_join, from_join] = path.as_slice() else {
        return Err(CoreError::invalid_operation(format!(
            "{}.{} is not a two-step flattened relationship",
            entity.name, rel.name
        )));
    };
    let join_table = resolver
        .schema()
        .entity(&to_join.target)
        .ok_or_else(|| CoreError::entity_not_mapped(&to_join.target))?;

    let mut row = BTreeMap::new();
    for join in &to_join.joins {
        row.insert(join.target.clone(), ctx.identity_value(&key.source, &join.source)?);
    }
    for join in &from_join.joins {
        row.insert(join.source.clone(), ctx.identity_value(&key.target, &join.target)?);
    }

    if op == ArcOp::Create {
        for attr in join_table.primary_key() {
            if row.contains_key(&attr.name) || attr.generated {
                continue;
            }
            let node = ctx.domain.node_for_table(&join_table.name);
            let value = node
                .generate_pk(&join_table.name, &attr.name)
                .map_err(|source| CoreError::CommitFailed { source })?;
            row.insert(attr.name.clone(), ColumnValue::Value(value));
        }
    }
    Ok((join_table.name.clone(), row))
}
