//! INSERT batches for NEW objects.

use super::plan::{ColumnValue, PlanContext, PlannedBatch, PlannedRow};
use crate::error::{CoreError, CoreResult};
use crate::identity::Identity;
use crate::object::{ObjectRef, PersistenceState, PropertyValue, Relationship};
use crate::object_diff::ObjectDiff;
use ormgraph_storage::DbRelationship;
use std::collections::{BTreeMap, HashMap, HashSet};

type InsertRow = (ObjectRef, Identity, BTreeMap<String, ColumnValue>);

/// Plans the inserts of every NEW object, tables in dependency order and
/// objects in creation order within a table.
pub(crate) fn plan_inserts(ctx: &PlanContext<'_>) -> CoreResult<Vec<PlannedBatch>> {
    let new_objects: Vec<ObjectRef> = ctx
        .store
        .diffs()
        .map(ObjectDiff::object)
        .filter(|r| {
            ctx.store
                .object(*r)
                .is_ok_and(|o| o.state() == PersistenceState::New)
        })
        .collect();
    if new_objects.is_empty() {
        return Ok(Vec::new());
    }

    let masters = dependent_masters(ctx)?;
    let mut by_table: HashMap<String, Vec<InsertRow>> = HashMap::new();
    for r in new_objects {
        let (table, row) = insert_row(ctx, r, &masters)?;
        let id = ctx.store.identity_of(r)?;
        by_table.entry(table).or_default().push((r, id, row));
    }

    let mut tables: Vec<String> = by_table.keys().cloned().collect();
    tables.sort();
    ctx.sorter.sort_for_insert(&mut tables);

    let mut batches = Vec::new();
    for table in tables {
        let rows = by_table.remove(&table).unwrap_or_default();
        tracing::debug!(%table, rows = rows.len(), "insert bucket");
        if ctx.sorter.is_reflexive(&table) {
            batches.extend(reflexive_batches(ctx, &table, rows)?);
        } else {
            batches.extend(grouped_batches(ctx, &table, rows));
        }
    }
    Ok(batches)
}

/// Objects whose primary key is propagated from a master through a
/// to-dependent-PK relationship of the master.
fn dependent_masters<'a>(
    ctx: &PlanContext<'a>,
) -> CoreResult<HashMap<ObjectRef, Vec<(ObjectRef, &'a DbRelationship)>>> {
    let resolver = ctx.resolver();
    let mut masters: HashMap<ObjectRef, Vec<(ObjectRef, &'a DbRelationship)>> = HashMap::new();
    for diff in ctx.store.diffs() {
        let master = diff.object();
        let object = ctx.store.object(master)?;
        let entity = resolver.entity(object.entity_name())?;
        for rel in entity.relationships.iter().filter(|r| !r.to_many && !r.is_flattened()) {
            let Some(db_rel) = resolver.db_relationships(entity, rel)?.into_iter().next() else {
                continue;
            };
            if !db_rel.to_dependent_pk {
                continue;
            }
            if let Some(PropertyValue::ToOne(Relationship::Resolved(Some(dependent)))) =
                object.property(&rel.name)
            {
                masters.entry(*dependent).or_default().push((master, db_rel));
            }
        }
    }
    Ok(masters)
}

/// Computes the column values of one new object.
///
/// Key columns are taken, in order of preference, from a permanent
/// identity, from attributes mapped to them, from the master the key is
/// propagated from, from the database (generated columns are left out
/// and read back) and finally from the node's key generator.
fn insert_row(
    ctx: &PlanContext<'_>,
    r: ObjectRef,
    masters: &HashMap<ObjectRef, Vec<(ObjectRef, &DbRelationship)>>,
) -> CoreResult<(String, BTreeMap<String, ColumnValue>)> {
    let resolver = ctx.resolver();
    let object = ctx.store.object(r)?;
    let entity = resolver.entity(object.entity_name())?;
    let table = resolver.db_entity(entity)?;
    let mut row: BTreeMap<String, ColumnValue> = BTreeMap::new();

    if let Some(key) = object.identity().and_then(Identity::key) {
        for (column, value) in key {
            row.insert(column.clone(), ColumnValue::Value(value.clone()));
        }
    }

    for attr in &entity.attributes {
        let value = object.value(&attr.name);
        if table.is_pk_column(&attr.column) {
            if !value.is_null() {
                row.entry(attr.column.clone())
                    .or_insert_with(|| ColumnValue::Value(value.clone()));
            }
        } else {
            row.insert(attr.column.clone(), ColumnValue::Value(value.clone()));
        }
    }

    let mut propagated: HashSet<String> = HashSet::new();
    for rel in entity.relationships.iter().filter(|r| !r.to_many) {
        let Some(db_rel) = resolver.fk_relationship(entity, rel) else {
            continue;
        };
        for column in db_rel.source_columns().filter(|c| table.is_pk_column(c)) {
            propagated.insert(column.to_string());
        }
        let Some(values) = ctx.fk_values(object, rel, db_rel)? else {
            continue;
        };
        for (column, value) in values {
            if table.is_pk_column(&column) {
                if !value.is_null() {
                    row.entry(column).or_insert(value);
                }
            } else {
                row.insert(column, value);
            }
        }
    }

    for (master, db_rel) in masters.get(&r).into_iter().flatten() {
        for join in &db_rel.joins {
            propagated.insert(join.target.clone());
            if !row.contains_key(&join.target) {
                let value = ctx.key_value(*master, &join.source)?;
                row.insert(join.target.clone(), value);
            }
        }
    }

    for attr in table.primary_key() {
        if row.contains_key(&attr.name) || attr.generated {
            continue;
        }
        if propagated.contains(&attr.name) {
            return Err(CoreError::pk_propagation(
                &entity.name,
                format!("{} is taken from a master object, but none is set", attr.name),
            ));
        }
        let node = ctx.domain.node_for_table(&table.name);
        let value = node
            .generate_pk(&table.name, &attr.name)
            .map_err(|source| CoreError::CommitFailed { source })?;
        row.insert(attr.name.clone(), ColumnValue::Value(value));
    }

    Ok((table.name.clone(), row))
}

fn planned_row(r: ObjectRef, id: Identity, row: BTreeMap<String, ColumnValue>) -> (Vec<String>, PlannedRow) {
    let columns: Vec<String> = row.keys().cloned().collect();
    let planned = PlannedRow {
        owner: Some((r, id)),
        values: row.into_values().collect(),
        qualifier: Vec::new(),
    };
    (columns, planned)
}

/// One batch per distinct column list, in order of first appearance.
fn grouped_batches(ctx: &PlanContext<'_>, table: &str, rows: Vec<InsertRow>) -> Vec<PlannedBatch> {
    let mut groups: Vec<(Vec<String>, Vec<PlannedRow>)> = Vec::new();
    for (r, id, row) in rows {
        let (columns, planned) = planned_row(r, id, row);
        match groups.iter_mut().find(|(c, _)| *c == columns) {
            Some((_, rows)) => rows.push(planned),
            None => groups.push((columns, vec![planned])),
        }
    }
    let node = ctx.node_index(table);
    groups
        .into_iter()
        .map(|(columns, rows)| PlannedBatch::insert(table, node, columns, rows))
        .collect()
}

/// Orders the rows of a table that references itself so parents are
/// inserted first, starting a new batch whenever a row refers to a
/// parent in the batch being built.
fn reflexive_batches(ctx: &PlanContext<'_>, table: &str, rows: Vec<InsertRow>) -> CoreResult<Vec<PlannedBatch>> {
    let members: HashSet<ObjectRef> = rows.iter().map(|(r, _, _)| *r).collect();
    let dependencies: Vec<(ObjectRef, Vec<ObjectRef>)> = rows
        .iter()
        .map(|(r, _, row)| {
            let parents = row
                .values()
                .filter_map(ColumnValue::deferred_object)
                .filter(|p| p != r && members.contains(p))
                .collect();
            (*r, parents)
        })
        .collect();
    let order = ctx.sorter.sort_rows(table, &dependencies)?;

    let mut slots: Vec<Option<InsertRow>> = rows.into_iter().map(Some).collect();
    let node = ctx.node_index(table);
    let mut batches = Vec::new();
    let mut current: Option<(Vec<String>, HashSet<ObjectRef>, Vec<PlannedRow>)> = None;

    for index in order {
        let Some((r, id, row)) = slots.get_mut(index).and_then(Option::take) else {
            continue;
        };
        let parents = &dependencies[index].1;
        let (columns, planned) = planned_row(r, id, row);
        let fits = current.as_ref().is_some_and(|(c, in_batch, _)| {
            *c == columns && !parents.iter().any(|p| in_batch.contains(p))
        });
        if !fits {
            if let Some((columns, _, rows)) = current.take() {
                batches.push(PlannedBatch::insert(table, node, columns, rows));
            }
            current = Some((columns, HashSet::new(), Vec::new()));
        }
        if let Some((_, in_batch, rows)) = current.as_mut() {
            in_batch.insert(r);
            rows.push(planned);
        }
    }
    if let Some((columns, _, rows)) = current {
        batches.push(PlannedBatch::insert(table, node, columns, rows));
    }
    Ok(batches)
}
