//! Identity map and change registry of one context.
//!
//! The store owns every object of its context, maps identities to object
//! handles and accumulates an [`ObjectDiff`] per changed object. It is the
//! [`GraphChangeHandler`] that graph operations report changes to, and it
//! drives the persistence state machine:
//!
//! ```text
//! TRANSIENT -> NEW -> COMMITTED -> MODIFIED -> COMMITTED
//!                     COMMITTED -> DELETED  -> TRANSIENT
//!                     COMMITTED -> HOLLOW   -> COMMITTED
//! ```
//!
//! The owning context serializes all access through one mutex, so the
//! store itself is not synchronized.

use crate::delegate::ContextDelegate;
use crate::diff::{CompoundDiff, GraphChangeHandler, GraphDiff};
use crate::error::{CoreError, CoreResult};
use crate::event::SnapshotEvent;
use crate::identity::Identity;
use crate::map::{EntityResolver, Property};
use crate::object::{DataObject, Fault, ObjectArena, ObjectRef, PersistenceState, PropertyValue, Relationship};
use crate::object_diff::{ArcOp, FlattenedArcKey, ObjectDiff};
use crate::config::ObjectRetention;
use lru::LruCache;
use ormgraph_codec::Value;
use ormgraph_storage::DataRow;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Registry of the objects and pending changes of one context.
pub struct ObjectStore {
    resolver: Arc<EntityResolver>,
    arena: ObjectArena,
    by_id: HashMap<Identity, ObjectRef>,
    diffs: BTreeMap<ObjectRef, ObjectDiff>,
    current_diff_id: u64,
    clean: Option<LruCache<ObjectRef, ()>>,
}

impl ObjectStore {
    /// Creates an empty store.
    pub fn new(resolver: Arc<EntityResolver>, retention: ObjectRetention) -> Self {
        let clean = match retention {
            ObjectRetention::Strong => None,
            ObjectRetention::Bounded { max_clean } => Some(LruCache::new(
                NonZeroUsize::new(max_clean).unwrap_or(NonZeroUsize::MIN),
            )),
        };
        Self {
            resolver,
            arena: ObjectArena::default(),
            by_id: HashMap::new(),
            diffs: BTreeMap::new(),
            current_diff_id: 0,
            clean,
        }
    }

    /// Entity mapping.
    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    pub(crate) fn arena(&self) -> &ObjectArena {
        &self.arena
    }

    /// Returns an object by handle.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotRegistered` for a handle of another context.
    pub fn object(&self, r: ObjectRef) -> CoreResult<&DataObject> {
        self.arena.get(r).ok_or(CoreError::ObjectNotRegistered)
    }

    pub(crate) fn object_mut(&mut self, r: ObjectRef) -> CoreResult<&mut DataObject> {
        self.arena.get_mut(r).ok_or(CoreError::ObjectNotRegistered)
    }

    /// Looks up the object registered under an identity.
    pub fn lookup(&self, id: &Identity) -> Option<ObjectRef> {
        self.by_id.get(id).copied()
    }

    /// Number of registered objects.
    pub fn registered_count(&self) -> usize {
        self.by_id.len()
    }

    /// Identity of a registered object.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotRegistered` if the object has no identity.
    pub fn identity_of(&self, r: ObjectRef) -> CoreResult<Identity> {
        self.object(r)?
            .identity()
            .cloned()
            .ok_or(CoreError::ObjectNotRegistered)
    }

    /// Adds an object to the identity map without recording a change.
    ///
    /// The object must carry an identity.
    pub(crate) fn register_node(&mut self, object: DataObject) -> CoreResult<ObjectRef> {
        let id = object
            .identity()
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation("cannot register an object without identity"))?;
        if self.by_id.contains_key(&id) {
            return Err(CoreError::invalid_operation(format!("{id} is already registered")));
        }
        let clean = object.state() == PersistenceState::Committed;
        let r = self.arena.insert(object);
        self.by_id.insert(id, r);
        if clean {
            self.touch(r);
        }
        Ok(r)
    }

    /// Removes an object from the identity map and drops its changes.
    /// The object becomes TRANSIENT; its handle stays valid.
    pub(crate) fn unregister(&mut self, r: ObjectRef) {
        if let Some(object) = self.arena.get_mut(r) {
            object.set_state(PersistenceState::Transient);
            if let Some(id) = object.identity() {
                if self.by_id.get(id) == Some(&r) {
                    self.by_id.remove(id);
                }
            }
        }
        self.diffs.remove(&r);
        if let Some(clean) = self.clean.as_mut() {
            clean.pop(&r);
        }
    }

    /// Marks a clean object as recently used.
    ///
    /// Under bounded retention the least recently used clean object
    /// beyond the bound is turned HOLLOW.
    pub(crate) fn touch(&mut self, r: ObjectRef) {
        let Some(clean) = self.clean.as_mut() else {
            return;
        };
        let state = self.arena.get(r).map(DataObject::state);
        if state != Some(PersistenceState::Committed) {
            clean.pop(&r);
            return;
        }
        if let Some((evicted, ())) = clean.push(r, ()) {
            if evicted != r {
                if let Some(object) = self.arena.get_mut(evicted) {
                    if object.state() == PersistenceState::Committed {
                        tracing::trace!(object = %evicted, "evicting clean object");
                        object.make_hollow();
                    }
                }
            }
        }
    }

    /// Returns true if any object has pending changes.
    pub fn has_changes(&self) -> bool {
        !self.diffs.is_empty()
    }

    /// Pending per-object changes, ordered by handle.
    pub fn diffs(&self) -> impl Iterator<Item = &ObjectDiff> {
        self.diffs.values()
    }

    /// Pending changes of one object.
    pub fn diff_of(&self, r: ObjectRef) -> Option<&ObjectDiff> {
        self.diffs.get(&r)
    }

    /// All pending changes in recording order.
    ///
    /// The result is a copy, stable while the store keeps changing.
    pub fn get_changes(&self) -> CompoundDiff {
        let mut ops: Vec<(u64, &GraphDiff)> = self
            .diffs
            .values()
            .flat_map(ObjectDiff::changes)
            .collect();
        ops.sort_by_key(|(id, _)| *id);
        CompoundDiff::from(ops.into_iter().map(|(_, d)| d.clone()).collect::<Vec<_>>())
    }

    /// Objects currently in a persistence state.
    pub fn objects_in_state(&self, state: PersistenceState) -> Vec<ObjectRef> {
        self.arena
            .iter()
            .filter(|(_, o)| o.state() == state)
            .map(|(r, _)| r)
            .collect()
    }

    /// Returns true if the pending changes would not alter a single row:
    /// every changed object is MODIFIED and its values equal its snapshot.
    pub fn is_phantom(&self) -> bool {
        self.has_changes()
            && self.diffs.iter().all(|(r, diff)| {
                let Some(object) = self.arena.get(*r) else {
                    return false;
                };
                let Ok(entity) = self.resolver.entity(object.entity_name()) else {
                    return false;
                };
                diff.is_noop(object, entity, &self.arena, |rel| {
                    entity.relationship_named(rel).is_some_and(|r| r.is_flattened())
                })
            })
    }

    /// Join table rows to insert or delete, in recording order.
    ///
    /// Both sides of a mirrored relationship record the same change; the
    /// direction-independent key merges them. Each side's creates and
    /// deletes of a row are summed, so opposite changes cancel no matter
    /// which side recorded them.
    pub fn pending_flattened(&self) -> Vec<(FlattenedArcKey, ArcOp)> {
        let mut pending: HashMap<FlattenedArcKey, (u64, Vec<(Identity, i64)>)> = HashMap::new();
        let mut ops: Vec<(u64, &GraphDiff)> = self
            .diffs
            .values()
            .flat_map(ObjectDiff::changes)
            .collect();
        ops.sort_by_key(|(id, _)| *id);

        for (diff_id, diff) in ops {
            let (source, target, arc, op) = match diff {
                GraphDiff::ArcCreate { node_id, target_id, arc } => (node_id, target_id, arc, ArcOp::Create),
                GraphDiff::ArcDelete { node_id, target_id, arc } => (node_id, target_id, arc, ArcOp::Delete),
                _ => continue,
            };
            let flattened = self
                .resolver
                .entity(source.entity_name())
                .ok()
                .and_then(|e| e.relationship_named(arc))
                .is_some_and(|r| r.is_flattened());
            if !flattened {
                continue;
            }
            let reverse = self
                .resolver
                .reverse_relationship(source.entity_name(), arc)
                .map(|r| r.name.clone());
            let key = FlattenedArcKey::new(source.clone(), arc.clone(), target.clone(), reverse);
            let delta = if op == ArcOp::Create { 1 } else { -1 };
            let (_, sides) = pending.entry(key).or_insert_with(|| (diff_id, Vec::new()));
            match sides.iter_mut().find(|(side, _)| side == source) {
                Some((_, net)) => *net += delta,
                None => sides.push((source.clone(), delta)),
            }
        }

        let mut result: Vec<(FlattenedArcKey, u64, ArcOp)> = pending
            .into_iter()
            .filter_map(|(key, (first, sides))| {
                let net = sides.iter().map(|(_, net)| *net).find(|net| *net != 0)?;
                let op = if net > 0 { ArcOp::Create } else { ArcOp::Delete };
                Some((key, first, op))
            })
            .collect();
        result.sort_by_key(|(_, first, _)| *first);
        result.into_iter().map(|(key, _, op)| (key, op)).collect()
    }

    fn next_diff_id(&mut self) -> u64 {
        self.current_diff_id += 1;
        self.current_diff_id
    }

    /// Records a change of a registered object.
    ///
    /// Called before the change is applied to the object, so the first
    /// change of an object captures its committed state as the snapshot.
    fn register_diff(&mut self, node_id: &Identity, diff: GraphDiff) -> CoreResult<()> {
        let r = self.lookup(node_id).ok_or_else(|| CoreError::ObjectNotFound {
            identity: node_id.clone(),
        })?;
        let diff_id = self.next_diff_id();

        if !self.diffs.contains_key(&r) {
            let object_diff = self.snapshot_diff(r, node_id, &diff)?;
            self.diffs.insert(r, object_diff);
            let object = self.object_mut(r)?;
            if object.state() == PersistenceState::Committed {
                object.set_state(PersistenceState::Modified);
            }
            if let Some(clean) = self.clean.as_mut() {
                clean.pop(&r);
            }
        }

        tracing::trace!(%node_id, diff_id, ?diff, "graph change");
        if let Some(object_diff) = self.diffs.get_mut(&r) {
            object_diff.add_diff(diff_id, diff);
        }
        Ok(())
    }

    fn snapshot_diff(&self, r: ObjectRef, node_id: &Identity, first: &GraphDiff) -> CoreResult<ObjectDiff> {
        let object = self.object(r)?;
        let entity = self.resolver.entity(object.entity_name())?;

        let mut snapshot: BTreeMap<String, Value> = entity
            .attributes
            .iter()
            .map(|a| (a.name.clone(), object.value(&a.name).clone()))
            .collect();
        if let GraphDiff::NodePropertyChange { property, old, .. } = first {
            if entity.attribute_named(property).is_some() {
                snapshot.insert(property.clone(), old.clone());
            }
        }

        let mut arc_snapshot = BTreeMap::new();
        for rel in entity.relationships.iter().filter(|r| !r.to_many) {
            if self.resolver.fk_relationship(entity, rel).is_none() {
                continue;
            }
            if let Some(target) = self.arena.to_one_identity(object, &rel.name) {
                arc_snapshot.insert(rel.name.clone(), target);
            }
        }

        Ok(ObjectDiff::new(
            r,
            node_id.clone(),
            object.snapshot_version(),
            snapshot,
            arc_snapshot,
        ))
    }

    /// Replaces a temporary identity everywhere in the store.
    fn process_id_change(&mut self, old: &Identity, new: &Identity) -> CoreResult<()> {
        let Some(r) = self.by_id.remove(old) else {
            return Ok(());
        };
        self.by_id.insert(new.clone(), r);
        self.object_mut(r)?.set_identity(Some(new.clone()));
        if let Some(diff) = self.diffs.get_mut(&r) {
            diff.set_node_id(new.clone());
        }
        tracing::trace!(%old, %new, "identity replaced");
        Ok(())
    }

    /// Reverts every changed object after a rollback.
    ///
    /// NEW objects are detached; MODIFIED and DELETED objects become
    /// HOLLOW and refetch on next access.
    pub(crate) fn objects_rolled_back(&mut self) {
        let changed: Vec<ObjectRef> = self.diffs.keys().copied().collect();
        for r in changed {
            let state = self.arena.get(r).map(DataObject::state);
            match state {
                Some(PersistenceState::New) => self.unregister(r),
                Some(PersistenceState::Modified | PersistenceState::Deleted) => {
                    if let Some(object) = self.arena.get_mut(r) {
                        object.make_hollow();
                    }
                }
                _ => {}
            }
        }
        self.diffs.clear();
    }

    /// Reconciles object states after a successful commit.
    ///
    /// Applies the identity replacements of `result`, detaches deleted
    /// objects, marks inserted and updated objects COMMITTED and copies
    /// generated keys into attributes mapped to key columns.
    pub(crate) fn postprocess_after_commit(&mut self, result: &CompoundDiff) -> CoreResult<()> {
        result.apply(self)?;

        let changed: Vec<ObjectRef> = self.diffs.keys().copied().collect();
        for r in changed {
            let state = self.object(r)?.state();
            match state {
                PersistenceState::Deleted => {
                    self.unregister(r);
                    continue;
                }
                PersistenceState::New => self.copy_key_attributes(r)?,
                PersistenceState::Modified => {}
                _ => continue,
            }
            self.object_mut(r)?.set_state(PersistenceState::Committed);
        }
        let committed: Vec<ObjectRef> = self.diffs.keys().copied().collect();
        self.diffs.clear();
        for r in committed {
            self.touch(r);
        }
        Ok(())
    }

    fn copy_key_attributes(&mut self, r: ObjectRef) -> CoreResult<()> {
        let object = self.object(r)?;
        let entity = self.resolver.entity(object.entity_name())?;
        let Some(key) = object.identity().and_then(Identity::key) else {
            return Ok(());
        };
        let updates: Vec<(String, Value)> = key
            .iter()
            .filter_map(|(column, value)| {
                entity
                    .attribute_for_column(column)
                    .map(|a| (a.name.clone(), value.clone()))
            })
            .collect();
        let object = self.object_mut(r)?;
        for (name, value) in updates {
            object.set_property(name, PropertyValue::Attribute(value));
        }
        Ok(())
    }

    /// Resets state after a commit that turned out to change nothing.
    pub(crate) fn postprocess_after_phantom_commit(&mut self) {
        let changed: Vec<ObjectRef> = self.diffs.keys().copied().collect();
        self.diffs.clear();
        for r in changed {
            if let Some(object) = self.arena.get_mut(r) {
                if object.state() == PersistenceState::Modified {
                    object.set_state(PersistenceState::Committed);
                }
            }
            self.touch(r);
        }
    }

    /// Records the cache versions of rows written by a commit.
    pub(crate) fn update_snapshot_versions(&mut self, versions: &[(Identity, u64)]) {
        for (id, version) in versions {
            if let Some(r) = self.lookup(id) {
                if let Some(object) = self.arena.get_mut(r) {
                    object.set_snapshot_version(*version);
                }
            }
        }
    }

    /// Loads a row into a registered object and marks it COMMITTED.
    pub(crate) fn refresh_from_row(&mut self, r: ObjectRef, row: &DataRow) -> CoreResult<()> {
        let resolver = Arc::clone(&self.resolver);
        let object = self.object_mut(r)?;
        let entity = resolver.entity(object.entity_name())?;
        object.populate(entity, &resolver, row);
        object.set_state(PersistenceState::Committed);
        self.touch(r);
        Ok(())
    }

    /// Applies a peer's snapshot event to the objects of this store.
    ///
    /// - Updated rows refresh COMMITTED objects. MODIFIED objects merge
    ///   the columns and foreign keys they have not changed locally.
    /// - Deleted rows detach COMMITTED and HOLLOW objects; a MODIFIED
    ///   object becomes NEW so its local state is inserted again.
    /// - Invalidated rows turn COMMITTED objects HOLLOW.
    /// - Indirectly modified objects get their to-many relationships reset
    ///   to faults.
    ///
    /// Every merge and delete is subject to the delegate.
    pub(crate) fn process_snapshot_event(
        &mut self,
        event: &SnapshotEvent,
        delegate: &dyn ContextDelegate,
    ) -> CoreResult<()> {
        for (id, row) in &event.updated {
            self.process_updated(id, row, delegate)?;
        }
        for id in &event.deleted {
            self.process_deleted(id, delegate)?;
        }
        for id in &event.invalidated {
            if let Some(r) = self.lookup(id) {
                let object = self.object_mut(r)?;
                if object.state() == PersistenceState::Committed {
                    object.make_hollow();
                }
            }
        }
        for id in &event.indirectly_modified {
            if let Some(r) = self.lookup(id) {
                let object = self.object_mut(r)?;
                if object.state() == PersistenceState::Committed {
                    reset_to_many(object);
                }
            }
        }
        Ok(())
    }

    fn process_updated(&mut self, id: &Identity, row: &DataRow, delegate: &dyn ContextDelegate) -> CoreResult<()> {
        let Some(r) = self.lookup(id) else {
            return Ok(());
        };
        let object = self.object(r)?;
        match object.state() {
            PersistenceState::Committed => {
                if object.snapshot_version() != row.version() && delegate.should_merge_changes(object, Some(row)) {
                    self.refresh_from_row(r, row)?;
                }
            }
            PersistenceState::Modified => {
                if delegate.should_merge_changes(object, Some(row)) {
                    self.merge_into_modified(r, row)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Merges remote column changes into a locally modified object.
    ///
    /// Locally changed attributes keep their value and their snapshot, so
    /// an optimistic update still detects the conflict.
    fn merge_into_modified(&mut self, r: ObjectRef, row: &DataRow) -> CoreResult<()> {
        let resolver = Arc::clone(&self.resolver);
        let entity = resolver.entity(self.object(r)?.entity_name())?;
        let Some(diff) = self.diffs.get(&r) else {
            return Ok(());
        };

        let mut attributes = Vec::new();
        let mut to_ones = Vec::new();
        for property in entity.properties() {
            match property {
                Property::Attribute(attr) => {
                    if !diff.has_property_change(&attr.name) {
                        if let Some(value) = row.get(&attr.column) {
                            attributes.push((attr.name.clone(), value.clone()));
                        }
                    }
                }
                Property::ToOne(rel) => {
                    if diff.arc_changes(&rel.name).next().is_some() {
                        continue;
                    }
                    if let Some(db_rel) = resolver.fk_relationship(entity, rel) {
                        to_ones.push((rel.name.clone(), resolver.target_identity(rel, db_rel, row)));
                    }
                }
                Property::ToMany(_) => {}
            }
        }

        let object = self.object_mut(r)?;
        for (name, value) in &attributes {
            object.set_property(name.clone(), PropertyValue::Attribute(value.clone()));
        }
        for (name, target) in &to_ones {
            let value = match target {
                Some(target) => Relationship::Fault(Fault::ToOne(Some(target.clone()))),
                None => Relationship::Resolved(None),
            };
            object.set_property(name.clone(), PropertyValue::ToOne(value));
        }
        object.set_snapshot_version(row.version());

        if let Some(diff) = self.diffs.get_mut(&r) {
            for (name, value) in attributes {
                diff.merge_snapshot_value(&name, value);
            }
            for (name, target) in to_ones {
                diff.merge_arc_snapshot(&name, target);
            }
            diff.set_snapshot_version(row.version());
        }
        Ok(())
    }

    fn process_deleted(&mut self, id: &Identity, delegate: &dyn ContextDelegate) -> CoreResult<()> {
        let Some(r) = self.lookup(id) else {
            return Ok(());
        };
        let object = self.object(r)?;
        match object.state() {
            PersistenceState::Committed | PersistenceState::Hollow | PersistenceState::Deleted => {
                if delegate.should_process_delete(object) {
                    self.unregister(r);
                }
            }
            PersistenceState::Modified => {
                if delegate.should_process_delete(object) {
                    self.diffs.remove(&r);
                    self.object_mut(r)?.set_state(PersistenceState::New);
                    self.node_created(id)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn reset_to_many(object: &mut DataObject) {
    let to_many: Vec<String> = object
        .properties()
        .filter(|(_, v)| matches!(v, PropertyValue::ToMany(Relationship::Resolved(_))))
        .map(|(name, _)| name.to_string())
        .collect();
    for name in to_many {
        object.set_property(name, PropertyValue::ToMany(Relationship::Fault(Fault::ToMany)));
    }
}

impl GraphChangeHandler for ObjectStore {
    fn node_id_changed(&mut self, node_id: &Identity, new_id: &Identity) -> CoreResult<()> {
        self.process_id_change(node_id, new_id)
    }

    fn node_created(&mut self, node_id: &Identity) -> CoreResult<()> {
        self.register_diff(node_id, GraphDiff::NodeCreate { node_id: node_id.clone() })
    }

    fn node_removed(&mut self, node_id: &Identity) -> CoreResult<()> {
        self.register_diff(node_id, GraphDiff::NodeDelete { node_id: node_id.clone() })
    }

    fn node_property_changed(
        &mut self,
        node_id: &Identity,
        property: &str,
        old: &Value,
        new: &Value,
    ) -> CoreResult<()> {
        self.register_diff(
            node_id,
            GraphDiff::NodePropertyChange {
                node_id: node_id.clone(),
                property: property.to_string(),
                old: old.clone(),
                new: new.clone(),
            },
        )
    }

    fn arc_created(&mut self, node_id: &Identity, target_id: &Identity, arc: &str) -> CoreResult<()> {
        self.register_diff(
            node_id,
            GraphDiff::ArcCreate {
                node_id: node_id.clone(),
                target_id: target_id.clone(),
                arc: arc.to_string(),
            },
        )
    }

    fn arc_deleted(&mut self, node_id: &Identity, target_id: &Identity, arc: &str) -> CoreResult<()> {
        self.register_diff(
            node_id,
            GraphDiff::ArcDelete {
                node_id: node_id.clone(),
                target_id: target_id.clone(),
                arc: arc.to_string(),
            },
        )
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("registered", &self.by_id.len())
            .field("changed", &self.diffs.len())
            .finish_non_exhaustive()
    }
}
