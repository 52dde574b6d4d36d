//! Tracked access to the object graph of one context.
//!
//! Every read resolves HOLLOW objects and relationship faults through the
//! context's channel. Every write reports the change to the store before
//! applying it, so the first change of an object snapshots its committed
//! state. Relationship writes keep the mirrored relationship on the other
//! side in step.

use crate::channel::DataChannel;
use crate::delegate::ContextDelegate;
use crate::diff::GraphChangeHandler;
use crate::error::{CoreError, CoreResult};
use crate::event::SubscriberId;
use crate::identity::Identity;
use crate::map::{EntityResolver, ObjEntity, ObjRelationship};
use crate::object::{DataObject, Fault, ObjectRef, PersistenceState, PropertyValue, Relationship};
use crate::object_diff::ArcOp;
use crate::query::{DbQuery, SelectQuery};
use crate::object_store::ObjectStore;
use ormgraph_codec::Value;
use ormgraph_storage::{DataRow, KeyMap};
use std::sync::Arc;

/// A locked store together with the channel it reads through.
pub(crate) struct Graph<'a> {
    pub(crate) store: &'a mut ObjectStore,
    channel: &'a dyn DataChannel,
    source: Option<SubscriberId>,
    delegate: &'a dyn ContextDelegate,
}

impl<'a> Graph<'a> {
    pub(crate) fn new(
        store: &'a mut ObjectStore,
        channel: &'a dyn DataChannel,
        source: Option<SubscriberId>,
        delegate: &'a dyn ContextDelegate,
    ) -> Self {
        Self {
            store,
            channel,
            source,
            delegate,
        }
    }

    pub(crate) fn resolver(&self) -> Arc<EntityResolver> {
        Arc::clone(self.store.resolver())
    }

    /// Loads the values of a HOLLOW object.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotFound` if the row no longer exists.
    pub(crate) fn ensure_resolved(&mut self, r: ObjectRef) -> CoreResult<()> {
        match self.store.object(r)?.state() {
            PersistenceState::Hollow => {}
            PersistenceState::Committed => {
                self.store.touch(r);
                return Ok(());
            }
            _ => return Ok(()),
        }
        let id = self.store.identity_of(r)?;
        tracing::trace!(%id, "resolving hollow object");
        let row = self
            .channel
            .snapshot(self.source, &id)?
            .ok_or(CoreError::ObjectNotFound { identity: id })?;
        self.store.refresh_from_row(r, &row)
    }

    /// Prepares an object for a change and returns the identity changes
    /// are recorded under, or `None` for an object outside the graph.
    ///
    /// A COMMITTED object older than the cached snapshot is refreshed
    /// first if the delegate allows it.
    pub(crate) fn will_change(&mut self, r: ObjectRef) -> CoreResult<Option<Identity>> {
        self.ensure_resolved(r)?;
        let object = self.store.object(r)?;
        match object.state() {
            PersistenceState::Transient => return Ok(None),
            PersistenceState::Committed if self.store.diff_of(r).is_none() => self.merge_if_stale(r)?,
            _ => {}
        }
        Ok(self.store.object(r)?.identity().cloned())
    }

    fn merge_if_stale(&mut self, r: ObjectRef) -> CoreResult<()> {
        let object = self.store.object(r)?;
        let Some(id) = object.identity() else {
            return Ok(());
        };
        let Some(row) = self.channel.snapshot_cache().cached_snapshot(id) else {
            return Ok(());
        };
        if row.version() == object.snapshot_version() {
            return Ok(());
        }
        if self.delegate.should_merge_changes(object, Some(&row)) {
            tracing::debug!(
                %id,
                local = object.snapshot_version(),
                cached = row.version(),
                "refreshing stale object before change"
            );
            self.store.refresh_from_row(r, &row)?;
        }
        Ok(())
    }

    /// Registers a fetched row, reusing the object already registered
    /// under its identity. Dirty objects keep their local state.
    pub(crate) fn object_from_row(&mut self, entity: &str, row: &DataRow) -> CoreResult<ObjectRef> {
        let resolver = self.resolver();
        let entity = resolver.entity(entity)?;
        let id = resolver.identity_for_row(entity, row).ok_or_else(|| {
            CoreError::invalid_operation(format!("fetched {} row has no primary key", entity.name))
        })?;
        if let Some(r) = self.store.lookup(&id) {
            let object = self.store.object(r)?;
            match object.state() {
                PersistenceState::Hollow => self.store.refresh_from_row(r, row)?,
                PersistenceState::Committed if object.snapshot_version() != row.version() => {
                    self.store.refresh_from_row(r, row)?;
                }
                PersistenceState::Committed => self.store.touch(r),
                _ => {}
            }
            return Ok(r);
        }
        let mut object = DataObject::new(&entity.name);
        object.populate(entity, &resolver, row);
        object.set_identity(Some(id));
        object.set_state(PersistenceState::Committed);
        self.store.register_node(object)
    }

    /// The object registered under an identity, or a new HOLLOW object
    /// that loads on first access.
    pub(crate) fn local_object(&mut self, id: &Identity) -> CoreResult<ObjectRef> {
        if let Some(r) = self.store.lookup(id) {
            return Ok(r);
        }
        if id.is_temporary() {
            return Err(CoreError::ObjectNotFound { identity: id.clone() });
        }
        self.store.resolver().entity(id.entity_name())?;
        let mut object = DataObject::new(id.entity_name());
        object.set_identity(Some(id.clone()));
        object.set_state(PersistenceState::Hollow);
        self.store.register_node(object)
    }

    /// Fetches objects of a query.
    pub(crate) fn select(&mut self, query: &SelectQuery) -> CoreResult<Vec<ObjectRef>> {
        let db_query = query.to_db_query(self.store.resolver())?;
        let rows = self.channel.select(self.source, &db_query)?;
        rows.iter()
            .map(|row| self.object_from_row(query.entity_name(), row))
            .collect()
    }

    fn entity_of<'r>(&self, resolver: &'r EntityResolver, r: ObjectRef) -> CoreResult<&'r ObjEntity> {
        resolver.entity(self.store.object(r)?.entity_name())
    }

    pub(crate) fn read_property(&mut self, r: ObjectRef, name: &str) -> CoreResult<Value> {
        let resolver = self.resolver();
        let entity = self.entity_of(&resolver, r)?;
        if entity.attribute_named(name).is_none() {
            return Err(CoreError::property_not_mapped(&entity.name, name));
        }
        self.ensure_resolved(r)?;
        Ok(self.store.object(r)?.value(name).clone())
    }

    pub(crate) fn write_property(&mut self, r: ObjectRef, name: &str, value: Value) -> CoreResult<()> {
        let resolver = self.resolver();
        let entity = self.entity_of(&resolver, r)?;
        if entity.attribute_named(name).is_none() {
            return Err(CoreError::property_not_mapped(&entity.name, name));
        }
        if self.store.object(r)?.state() == PersistenceState::Deleted {
            return Err(CoreError::invalid_operation(format!(
                "cannot modify deleted object {}",
                self.store.identity_of(r)?
            )));
        }
        let id = self.will_change(r)?;
        let old = self.store.object(r)?.value(name).clone();
        if let Some(id) = id {
            self.store.node_property_changed(&id, name, &old, &value)?;
        }
        self.store
            .object_mut(r)?
            .set_property(name, PropertyValue::Attribute(value));
        Ok(())
    }

    fn relationship<'r>(
        &self,
        resolver: &'r EntityResolver,
        r: ObjectRef,
        name: &str,
        to_many: bool,
    ) -> CoreResult<&'r ObjRelationship> {
        let entity = self.entity_of(resolver, r)?;
        let rel = resolver.relationship(entity, name)?;
        if rel.to_many != to_many {
            let kind = if rel.to_many { "to-many" } else { "to-one" };
            return Err(CoreError::invalid_operation(format!(
                "{}.{name} is a {kind} relationship",
                entity.name
            )));
        }
        Ok(rel)
    }

    /// Resolves a to-one relationship.
    pub(crate) fn read_to_one(&mut self, r: ObjectRef, name: &str) -> CoreResult<Option<ObjectRef>> {
        let resolver = self.resolver();
        let rel = self.relationship(&resolver, r, name, false)?;
        self.ensure_resolved(r)?;
        let current = self.store.object(r)?.property(name).cloned();
        let target = match current {
            Some(PropertyValue::ToOne(Relationship::Resolved(target))) => return Ok(target),
            Some(PropertyValue::ToOne(Relationship::Fault(Fault::ToOne(Some(id))))) => Some(self.local_object(&id)?),
            _ => self.fetch_to_one(&resolver, r, rel)?,
        };
        self.store
            .object_mut(r)?
            .set_property(name, PropertyValue::ToOne(Relationship::Resolved(target)));
        Ok(target)
    }

    /// Fetches the target of a to-one whose key lives in the target row.
    fn fetch_to_one(
        &mut self,
        resolver: &EntityResolver,
        r: ObjectRef,
        rel: &ObjRelationship,
    ) -> CoreResult<Option<ObjectRef>> {
        let source = self.store.identity_of(r)?;
        if source.is_temporary() {
            return Ok(None);
        }
        let entity = self.entity_of(resolver, r)?;
        let reverse = reverse_fk(resolver, entity, rel)?;
        let query = SelectQuery::new(&rel.target).and_related(&reverse.name, Some(&source));
        tracing::trace!(%source, relationship = %rel.name, "resolving to-one fault");
        Ok(self.select(&query)?.into_iter().next())
    }

    /// Resolves a to-many relationship.
    pub(crate) fn read_to_many(&mut self, r: ObjectRef, name: &str) -> CoreResult<Vec<ObjectRef>> {
        let resolver = self.resolver();
        let rel = self.relationship(&resolver, r, name, true)?;
        self.ensure_resolved(r)?;
        if let Some(PropertyValue::ToMany(Relationship::Resolved(list))) = self.store.object(r)?.property(name) {
            return Ok(list.clone());
        }
        let source = self.store.identity_of(r)?;
        let list = if source.is_temporary() {
            Vec::new()
        } else if rel.is_flattened() {
            self.fetch_flattened(&resolver, r, rel, &source)?
        } else {
            self.fetch_to_many(&resolver, r, rel, &source)?
        };
        tracing::trace!(%source, relationship = name, objects = list.len(), "resolved to-many fault");
        self.store
            .object_mut(r)?
            .set_property(name, PropertyValue::ToMany(Relationship::Resolved(list.clone())));
        Ok(list)
    }

    /// Fetches the targets of a to-many whose key lives in the target
    /// rows. Local changes win: fetched objects now pointing elsewhere are
    /// dropped and dirty objects pointing here are added.
    fn fetch_to_many(
        &mut self,
        resolver: &EntityResolver,
        r: ObjectRef,
        rel: &ObjRelationship,
        source: &Identity,
    ) -> CoreResult<Vec<ObjectRef>> {
        let entity = self.entity_of(resolver, r)?;
        let reverse = reverse_fk(resolver, entity, rel)?;
        let query = SelectQuery::new(&rel.target).and_related(&reverse.name, Some(source));
        let mut list = self.select(&query)?;

        let arena = self.store.arena();
        let points_here = |object: &DataObject| {
            arena.to_one_identity(object, &reverse.name) == Some(Some(source.clone()))
        };
        list.retain(|t| {
            arena.get(*t).is_some_and(|o| {
                !matches!(o.state(), PersistenceState::Deleted | PersistenceState::Transient)
                    && (arena.to_one_identity(o, &reverse.name).is_none() || points_here(o))
            })
        });
        let local: Vec<ObjectRef> = arena
            .iter()
            .filter(|(t, o)| {
                o.entity_name() == rel.target
                    && matches!(o.state(), PersistenceState::New | PersistenceState::Modified)
                    && !list.contains(t)
                    && points_here(*o)
            })
            .map(|(t, _)| t)
            .collect();
        list.extend(local);
        Ok(list)
    }

    /// Fetches the targets of a flattened relationship from its join
    /// table, then applies the join rows changed locally.
    fn fetch_flattened(
        &mut self,
        resolver: &EntityResolver,
        r: ObjectRef,
        rel: &ObjRelationship,
        source: &Identity,
    ) -> CoreResult<Vec<ObjectRef>> {
        let entity = self.entity_of(resolver, r)?;
        let path = resolver.db_relationships(entity, rel)?;
        let [to_join, from_join] = path.as_slice() else {
            return Err(CoreError::invalid_operation(format!(
                "{}.{} is not a two-step flattened relationship",
                entity.name, rel.name
            )));
        };
        let mut qualifier = Vec::with_capacity(to_join.joins.len());
        for join in &to_join.joins {
            let value = source.value(&join.source).cloned().ok_or_else(|| {
                CoreError::invalid_operation(format!("{source} has no key column {}", join.source))
            })?;
            qualifier.push((join.target.clone(), value));
        }
        let rows = self
            .channel
            .select(self.source, &DbQuery::new(&to_join.target, qualifier))?;

        let mut list = Vec::with_capacity(rows.len());
        for row in rows {
            let mut key = KeyMap::new();
            for join in &from_join.joins {
                let value = row.get(&join.source).cloned().unwrap_or(Value::Null);
                key.insert(join.target.clone(), value);
            }
            let target = self.local_object(&Identity::permanent(&rel.target, key))?;
            if !list.contains(&target) {
                list.push(target);
            }
        }

        for (key, op) in self.store.pending_flattened() {
            let other = if key.source == *source && key.relationship == rel.name {
                &key.target
            } else if key.target == *source && key.reverse.as_deref() == Some(rel.name.as_str()) {
                &key.source
            } else {
                continue;
            };
            let Some(other) = self.store.lookup(other) else {
                continue;
            };
            match op {
                ArcOp::Create if !list.contains(&other) => list.push(other),
                ArcOp::Delete => list.retain(|t| *t != other),
                ArcOp::Create => {}
            }
        }
        let arena = self.store.arena();
        list.retain(|t| {
            arena
                .get(*t)
                .is_some_and(|o| !matches!(o.state(), PersistenceState::Deleted | PersistenceState::Transient))
        });
        Ok(list)
    }

    fn check_target(&self, rel: &ObjRelationship, target: ObjectRef) -> CoreResult<()> {
        let object = self.store.object(target)?;
        if object.entity_name() != rel.target {
            return Err(CoreError::invalid_operation(format!(
                "{} expects {}, got {}",
                rel.name,
                rel.target,
                object.entity_name()
            )));
        }
        if object.state() == PersistenceState::Transient {
            return Err(CoreError::ObjectNotRegistered);
        }
        Ok(())
    }

    /// Points a to-one at `target`. With `set_reverse`, the mirrored
    /// relationship of the old and new target follows.
    pub(crate) fn set_to_one(
        &mut self,
        r: ObjectRef,
        name: &str,
        target: Option<ObjectRef>,
        set_reverse: bool,
    ) -> CoreResult<()> {
        let resolver = self.resolver();
        let rel = self.relationship(&resolver, r, name, false)?;
        if let Some(target) = target {
            self.check_target(rel, target)?;
        }
        let id = self.will_change(r)?;
        let old = self.read_to_one(r, name)?;
        if old == target {
            return Ok(());
        }
        if let Some(id) = &id {
            if let Some(old) = old {
                let old_id = self.store.identity_of(old)?;
                self.store.arc_deleted(id, &old_id, name)?;
            }
            if let Some(target) = target {
                let target_id = self.store.identity_of(target)?;
                self.store.arc_created(id, &target_id, name)?;
            }
        }
        self.store
            .object_mut(r)?
            .set_property(name, PropertyValue::ToOne(Relationship::Resolved(target)));

        if !set_reverse {
            return Ok(());
        }
        let entity = self.entity_of(&resolver, r)?;
        if let Some(reverse) = resolver.reverse_relationship(&entity.name, name) {
            if let Some(old) = old {
                self.unlink_reverse(old, reverse, r)?;
            }
            if let Some(target) = target {
                self.link_reverse(target, reverse, r)?;
            }
        }
        Ok(())
    }

    /// Adds `target` to a to-many. With `set_reverse`, the mirrored
    /// relationship follows.
    pub(crate) fn add_to_many(
        &mut self,
        r: ObjectRef,
        name: &str,
        target: ObjectRef,
        set_reverse: bool,
    ) -> CoreResult<()> {
        let resolver = self.resolver();
        let rel = self.relationship(&resolver, r, name, true)?;
        self.check_target(rel, target)?;
        let id = self.will_change(r)?;
        if self.read_to_many(r, name)?.contains(&target) {
            return Ok(());
        }
        if let Some(id) = &id {
            let target_id = self.store.identity_of(target)?;
            self.store.arc_created(id, &target_id, name)?;
        }
        if let Some(PropertyValue::ToMany(Relationship::Resolved(list))) = self.store.object_mut(r)?.property_mut(name) {
            list.push(target);
        }

        if !set_reverse {
            return Ok(());
        }
        let entity = self.entity_of(&resolver, r)?;
        let Some(reverse) = resolver.reverse_relationship(&entity.name, name) else {
            return Ok(());
        };
        if reverse.to_many {
            return self.link_many(target, &reverse.name, r);
        }
        let previous = self.read_to_one(target, &reverse.name)?;
        if previous == Some(r) {
            return Ok(());
        }
        if let Some(previous) = previous {
            self.unlink_many(previous, name, target)?;
        }
        self.set_to_one(target, &reverse.name, Some(r), false)
    }

    /// Removes `target` from a to-many. With `set_reverse`, the mirrored
    /// relationship follows.
    pub(crate) fn remove_to_many(
        &mut self,
        r: ObjectRef,
        name: &str,
        target: ObjectRef,
        set_reverse: bool,
    ) -> CoreResult<()> {
        let resolver = self.resolver();
        self.relationship(&resolver, r, name, true)?;
        let id = self.will_change(r)?;
        if !self.read_to_many(r, name)?.contains(&target) {
            return Ok(());
        }
        if let Some(id) = &id {
            let target_id = self.store.identity_of(target)?;
            self.store.arc_deleted(id, &target_id, name)?;
        }
        if let Some(PropertyValue::ToMany(Relationship::Resolved(list))) = self.store.object_mut(r)?.property_mut(name) {
            list.retain(|t| *t != target);
        }

        if !set_reverse {
            return Ok(());
        }
        let entity = self.entity_of(&resolver, r)?;
        let Some(reverse) = resolver.reverse_relationship(&entity.name, name) else {
            return Ok(());
        };
        self.unlink_reverse(target, reverse, r)
    }

    fn link_reverse(&mut self, target: ObjectRef, reverse: &ObjRelationship, r: ObjectRef) -> CoreResult<()> {
        if reverse.to_many {
            self.link_many(target, &reverse.name, r)
        } else {
            self.set_to_one(target, &reverse.name, Some(r), false)
        }
    }

    fn unlink_reverse(&mut self, target: ObjectRef, reverse: &ObjRelationship, r: ObjectRef) -> CoreResult<()> {
        if reverse.to_many {
            self.unlink_many(target, &reverse.name, r)
        } else if self.read_to_one(target, &reverse.name)? == Some(r) {
            self.set_to_one(target, &reverse.name, None, false)
        } else {
            Ok(())
        }
    }

    /// Records `member` joining a to-many of `owner`. An unresolved
    /// collection stays a fault; the recorded change is applied when it
    /// is fetched.
    fn link_many(&mut self, owner: ObjectRef, name: &str, member: ObjectRef) -> CoreResult<()> {
        let id = self.will_change(owner)?;
        let object = self.store.object(owner)?;
        if let Some(PropertyValue::ToMany(Relationship::Resolved(list))) = object.property(name) {
            if list.contains(&member) {
                return Ok(());
            }
        }
        if let Some(id) = id {
            let member_id = self.store.identity_of(member)?;
            self.store.arc_created(&id, &member_id, name)?;
        }
        if let Some(PropertyValue::ToMany(Relationship::Resolved(list))) = self.store.object_mut(owner)?.property_mut(name) {
            list.push(member);
        }
        Ok(())
    }

    fn unlink_many(&mut self, owner: ObjectRef, name: &str, member: ObjectRef) -> CoreResult<()> {
        let id = self.will_change(owner)?;
        let object = self.store.object(owner)?;
        if let Some(PropertyValue::ToMany(Relationship::Resolved(list))) = object.property(name) {
            if !list.contains(&member) {
                return Ok(());
            }
        }
        if let Some(id) = id {
            let member_id = self.store.identity_of(member)?;
            self.store.arc_deleted(&id, &member_id, name)?;
        }
        if let Some(PropertyValue::ToMany(Relationship::Resolved(list))) = self.store.object_mut(owner)?.property_mut(name) {
            list.retain(|t| *t != member);
        }
        Ok(())
    }
}

/// The mirrored to-one of `rel` whose foreign key lives in the target row.
fn reverse_fk<'r>(
    resolver: &'r EntityResolver,
    entity: &ObjEntity,
    rel: &ObjRelationship,
) -> CoreResult<&'r ObjRelationship> {
    let target = resolver.entity(&rel.target)?;
    resolver
        .reverse_relationship(&entity.name, &rel.name)
        .filter(|reverse| resolver.fk_relationship(target, reverse).is_some())
        .ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "{}.{} has no mirrored foreign key to resolve it through",
                entity.name, rel.name
            ))
        })
}
