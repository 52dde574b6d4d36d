//! The commit pipeline.
//!
//! A flush turns the pending changes of one object store into batches:
//!
//! 1. inserts of NEW objects, masters before dependents;
//! 2. join rows added to flattened relationships;
//! 3. updates of the columns MODIFIED objects changed;
//! 4. join rows removed from flattened relationships;
//! 5. deletes of DELETED objects, dependents before masters.
//!
//! Batches are then grouped by data node, keeping that order within a
//! node, and executed in one transaction. Values that depend on keys the
//! database generates are materialized right before their batch runs.
//! After execution the written rows are stored in the snapshot cache and
//! broadcast to peer contexts.

mod delete;
mod flattened;
mod insert;
mod plan;
mod update;

use crate::channel::{CommitResult, DataChannel};
use crate::diff::{CompoundDiff, GraphDiff};
use crate::domain::DataDomain;
use crate::error::{CoreError, CoreResult};
use crate::event::SubscriberId;
use crate::identity::Identity;
use crate::object::{ObjectRef, PersistenceState};
use crate::object_store::ObjectStore;
use crate::transaction::Transaction;
use ormgraph_storage::{DataRow, DbEntity, KeyMap, StatementKind, DEFAULT_VERSION};
use plan::{PlanContext, PlannedBatch};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

/// Writes the pending changes of `store` through `domain`.
///
/// The store is only read; the caller reconciles object states with the
/// returned result.
pub(crate) fn commit(
    domain: &DataDomain,
    source: Option<SubscriberId>,
    store: &ObjectStore,
) -> CoreResult<CommitResult> {
    let started = Instant::now();
    let ctx = PlanContext {
        domain,
        store,
        sorter: domain.sorter()?,
    };
    let plan = FlushPlan::build(&ctx)?;

    let mut keys: HashMap<ObjectRef, KeyMap> = HashMap::new();
    if !plan.batches.is_empty() {
        Transaction::perform(|tx| plan.execute(&ctx, tx, &mut keys))?;
    }

    let id_changes = plan.id_changes(&ctx, &keys)?;
    let updated = plan.committed_rows(&ctx, &keys, &id_changes)?;
    let indirect = plan.indirectly_modified(&ctx, &id_changes);
    let versions = domain.snapshot_cache().process_snapshot_changes(
        source,
        updated,
        plan.deleted.clone(),
        Vec::new(),
        indirect,
    );

    let mut diff = CompoundDiff::new();
    diff.add_all(
        id_changes
            .into_iter()
            .map(|(node_id, new_id)| GraphDiff::NodeIdChange { node_id, new_id }),
    );
    tracing::info!(
        domain = domain.name(),
        inserted = plan.inserted.len(),
        updated = plan.updated.len(),
        deleted = plan.deleted.len(),
        batches = plan.batches.len(),
        elapsed_us = started.elapsed().as_micros() as u64,
        "commit finished"
    );
    Ok(CommitResult { diff, versions })
}

struct FlushPlan {
    batches: Vec<PlannedBatch>,
    inserted: Vec<ObjectRef>,
    updated: Vec<ObjectRef>,
    deleted: Vec<Identity>,
    endpoints: Vec<Identity>,
}

impl FlushPlan {
    fn build(ctx: &PlanContext<'_>) -> CoreResult<Self> {
        let inserts = insert::plan_inserts(ctx)?;
        let flattened = flattened::plan_flattened(ctx)?;
        let updates = update::plan_updates(ctx)?;
        let deletes = delete::plan_deletes(ctx)?;

        let inserted = update::updated_objects(&inserts);
        let updated = update::updated_objects(&updates);
        let deleted = ctx
            .store
            .diffs()
            .filter(|d| {
                ctx.store
                    .object(d.object())
                    .is_ok_and(|o| o.state() == PersistenceState::Deleted)
            })
            .map(|d| d.node_id().clone())
            .collect();

        let mut ordered: Vec<PlannedBatch> = inserts
            .into_iter()
            .chain(flattened.inserts)
            .chain(updates)
            .chain(flattened.deletes)
            .chain(deletes)
            .collect();
        // Nodes run in the order of their first batch. Dependency order
        // holds within a node; a dependent table on another node than its
        // master may still be written first.
        let mut first_use: HashMap<usize, usize> = HashMap::new();
        for (position, batch) in ordered.iter().enumerate() {
            first_use.entry(batch.node).or_insert(position);
        }
        ordered.sort_by_key(|b| first_use.get(&b.node).copied().unwrap_or(usize::MAX));

        let max = ctx.domain.config().max_batch_size;
        let batches: Vec<PlannedBatch> = ordered.into_iter().flat_map(|b| b.split(max)).collect();
        tracing::debug!(
            inserts = inserted.len(),
            updates = updated.len(),
            batches = batches.len(),
            "flush planned"
        );

        Ok(Self {
            batches,
            inserted,
            updated,
            deleted,
            endpoints: flattened.endpoints,
        })
    }

    fn execute(
        &self,
        ctx: &PlanContext<'_>,
        tx: &mut Transaction,
        keys: &mut HashMap<ObjectRef, KeyMap>,
    ) -> CoreResult<()> {
        let schema = ctx.resolver().schema();
        for batch in &self.batches {
            let node = ctx.domain.nodes().get(batch.node).ok_or_else(|| {
                CoreError::invalid_operation(format!("no data node serves table {}", batch.table))
            })?;
            let node_tx = tx.node_tx(node)?;
            let query = batch.materialize(keys)?;
            tracing::debug!(
                node = node.name(),
                kind = %batch.kind,
                table = %batch.table,
                rows = batch.rows.len(),
                "executing batch"
            );
            let result = node
                .execute(node_tx, &query)
                .map_err(|source| CoreError::CommitFailed { source })?;
            batch.verify_counts(&result)?;
            if batch.kind == StatementKind::Insert {
                let key_columns = schema
                    .entity(&batch.table)
                    .map(DbEntity::primary_key_names)
                    .unwrap_or_default();
                batch.capture_keys(&query, &result, &key_columns, keys);
            }
        }
        Ok(())
    }

    /// Temporary identities of inserted objects and their replacements.
    fn id_changes(
        &self,
        ctx: &PlanContext<'_>,
        keys: &HashMap<ObjectRef, KeyMap>,
    ) -> CoreResult<Vec<(Identity, Identity)>> {
        let mut changes = Vec::new();
        for &r in &self.inserted {
            let current = ctx.store.identity_of(r)?;
            if !current.is_temporary() {
                continue;
            }
            let permanent = ctx.final_identity(r, keys).ok_or_else(|| {
                CoreError::pk_propagation(current.entity_name(), "inserted row has no complete primary key")
            })?;
            changes.push((current, permanent));
        }
        Ok(changes)
    }

    /// Full committed row state of every inserted and updated object.
    fn committed_rows(
        &self,
        ctx: &PlanContext<'_>,
        keys: &HashMap<ObjectRef, KeyMap>,
        id_changes: &[(Identity, Identity)],
    ) -> CoreResult<Vec<(Identity, DataRow)>> {
        let resolver = ctx.resolver();
        let replacements: HashMap<&Identity, &Identity> = id_changes.iter().map(|(o, n)| (o, n)).collect();
        let mut rows = Vec::with_capacity(self.inserted.len() + self.updated.len());

        for &r in self.inserted.iter().chain(&self.updated) {
            let object = ctx.store.object(r)?;
            let entity = resolver.entity(object.entity_name())?;
            let table = resolver.db_entity(entity)?;
            let current = ctx.store.identity_of(r)?;
            let id = replacements.get(&current).map_or(current.clone(), |n| (*n).clone());

            let mut values = BTreeMap::new();
            for attr in &entity.attributes {
                values.insert(attr.column.clone(), object.value(&attr.name).clone());
            }
            for rel in entity.relationships.iter().filter(|r| !r.to_many) {
                let Some(db_rel) = resolver.fk_relationship(entity, rel) else {
                    continue;
                };
                for (column, value) in ctx.fk_values(object, rel, db_rel)?.unwrap_or_default() {
                    values.insert(column, value.resolve(keys)?);
                }
            }
            if let Some(key) = id.key() {
                values.extend(key.iter().map(|(c, v)| (c.clone(), v.clone())));
            }
            for attr in &table.attributes {
                values.entry(attr.name.clone()).or_insert(ormgraph_codec::Value::Null);
            }

            let replaces = match object.state() {
                PersistenceState::New => DEFAULT_VERSION,
                _ => ctx
                    .store
                    .diff_of(r)
                    .map_or(object.snapshot_version(), |d| d.snapshot_version()),
            };
            rows.push((id, DataRow::new(values).replacing(replaces)));
        }
        Ok(rows)
    }

    /// Objects whose to-many relationships may be stale after the commit:
    /// ends of changed join rows and old and new targets of changed
    /// foreign keys.
    fn indirectly_modified(&self, ctx: &PlanContext<'_>, id_changes: &[(Identity, Identity)]) -> Vec<Identity> {
        let resolver = ctx.resolver();
        let arena = ctx.store.arena();
        let mut ids: Vec<Identity> = self.endpoints.clone();

        for diff in ctx.store.diffs() {
            let Ok(object) = ctx.store.object(diff.object()) else {
                continue;
            };
            let Ok(entity) = resolver.entity(object.entity_name()) else {
                continue;
            };
            let deleted = object.state() == PersistenceState::Deleted;
            for rel in entity.relationships.iter().filter(|r| !r.to_many) {
                if resolver.fk_relationship(entity, rel).is_none() {
                    continue;
                }
                let old = diff.arc_snapshot(&rel.name).cloned().flatten();
                let new = if deleted {
                    None
                } else {
                    arena.to_one_identity(object, &rel.name).flatten()
                };
                if old != new {
                    ids.extend(old);
                    ids.extend(new);
                }
            }
        }

        let replacements: HashMap<&Identity, &Identity> = id_changes.iter().map(|(o, n)| (o, n)).collect();
        let mut seen = HashSet::new();
        ids.into_iter()
            .map(|id| replacements.get(&id).map_or(id.clone(), |n| (*n).clone()))
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }
}
