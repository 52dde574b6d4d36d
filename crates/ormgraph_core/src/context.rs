//! Object contexts.
//!
//! An [`ObjectContext`] is one session over an object graph: it owns the
//! graph's objects, tracks their changes and commits them through its
//! [`DataChannel`]. All operations of one context are serialized by a
//! single lock, which is also held for the whole duration of a commit.
//! Contexts attached to the same domain observe each other's commits
//! through snapshot events, applied under that lock before every
//! operation.

use crate::channel::DataChannel;
use crate::delegate::{ContextDelegate, DefaultDelegate};
use crate::delete;
use crate::diff::{CompoundDiff, GraphChangeHandler};
use crate::domain::DataDomain;
use crate::error::{CoreError, CoreResult};
use crate::event::{SnapshotEvent, SubscriberId};
use crate::graph::Graph;
use crate::identity::Identity;
use crate::iterator::ResultIterator;
use crate::object::{DataObject, ObjectRef, PersistenceState};
use crate::object_store::ObjectStore;
use crate::query::SelectQuery;
use ormgraph_codec::Value;
use parking_lot::{Mutex, MutexGuard};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

struct ContextState {
    store: ObjectStore,
    events: Receiver<Arc<SnapshotEvent>>,
}

/// A session over an object graph.
///
/// Objects are addressed by [`ObjectRef`] handles that stay valid for
/// the lifetime of the context. Handles of one context are meaningless
/// in another.
pub struct ObjectContext {
    channel: Arc<dyn DataChannel>,
    subscriber: SubscriberId,
    delegate: Arc<dyn ContextDelegate>,
    state: Mutex<ContextState>,
}

impl DataDomain {
    /// Creates a context backed by this domain.
    pub fn create_context(self: &Arc<Self>) -> ObjectContext {
        ObjectContext::new(Arc::clone(self) as Arc<dyn DataChannel>)
    }
}

impl ObjectContext {
    /// Creates a context that accepts every peer change.
    pub fn new(channel: Arc<dyn DataChannel>) -> Self {
        Self::with_delegate(channel, Arc::new(DefaultDelegate))
    }

    /// Creates a context whose reaction to peer changes is decided by
    /// `delegate`.
    pub fn with_delegate(channel: Arc<dyn DataChannel>, delegate: Arc<dyn ContextDelegate>) -> Self {
        let (subscriber, events) = channel.snapshot_cache().subscribe();
        let store = ObjectStore::new(Arc::clone(channel.resolver()), channel.config().object_retention);
        tracing::debug!(context = %subscriber, cache = channel.snapshot_cache().name(), "context created");
        Self {
            channel,
            subscriber,
            delegate,
            state: Mutex::new(ContextState { store, events }),
        }
    }

    /// The id this context is known by to the snapshot cache.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber
    }

    /// The channel the context reads and commits through.
    pub fn channel(&self) -> &Arc<dyn DataChannel> {
        &self.channel
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        let mut state = self.state.lock();
        self.drain(&mut state);
        state
    }

    fn drain(&self, state: &mut ContextState) -> usize {
        let mut applied = 0;
        while let Ok(event) = state.events.try_recv() {
            if let Err(err) = state.store.process_snapshot_event(&event, self.delegate.as_ref()) {
                tracing::warn!(context = %self.subscriber, %err, "failed to apply snapshot event");
            }
            applied += 1;
        }
        if applied > 0 {
            tracing::trace!(context = %self.subscriber, events = applied, "applied peer events");
        }
        applied
    }

    fn with_graph<T>(&self, f: impl FnOnce(&mut Graph<'_>) -> CoreResult<T>) -> CoreResult<T> {
        let mut state = self.lock();
        let mut graph = Graph::new(
            &mut state.store,
            self.channel.as_ref(),
            Some(self.subscriber),
            self.delegate.as_ref(),
        );
        f(&mut graph)
    }

    /// Applies the snapshot events of peer commits received so far.
    ///
    /// Every other operation does this implicitly. Returns the number of
    /// events applied.
    pub fn process_pending_events(&self) -> usize {
        let mut state = self.state.lock();
        self.drain(&mut state)
    }

    /// Creates and registers a NEW object of an entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotMapped` for an unknown entity.
    pub fn new_object(&self, entity: &str) -> CoreResult<ObjectRef> {
        self.register_new_object(DataObject::new(entity))
    }

    /// Registers a detached object as NEW, keeping the attribute values
    /// it was built with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an object that was registered
    /// before, and mapping errors for unknown entities or properties.
    pub fn register_new_object(&self, mut object: DataObject) -> CoreResult<ObjectRef> {
        if object.state() != PersistenceState::Transient || object.identity().is_some() {
            return Err(CoreError::invalid_operation(
                "only detached objects can be registered as new",
            ));
        }
        let mut state = self.lock();
        let resolver = Arc::clone(state.store.resolver());
        let entity = resolver.entity(object.entity_name())?;
        if let Some((name, _)) = object.properties().find(|(name, _)| entity.property(name).is_none()) {
            return Err(CoreError::property_not_mapped(&entity.name, name));
        }
        let id = Identity::temporary(&entity.name);
        object.init_relationships(entity);
        object.set_identity(Some(id.clone()));
        object.set_state(PersistenceState::New);
        let r = state.store.register_node(object)?;
        state.store.node_created(&id)?;
        Ok(r)
    }

    /// Reads an attribute, loading the object if it is HOLLOW.
    ///
    /// # Errors
    ///
    /// Returns `PropertyNotMapped` for an unknown attribute and
    /// `ObjectNotFound` if a HOLLOW object's row is gone.
    pub fn read_property(&self, r: ObjectRef, name: &str) -> CoreResult<Value> {
        self.with_graph(|graph| graph.read_property(r, name))
    }

    /// Writes an attribute.
    ///
    /// # Errors
    ///
    /// Returns `PropertyNotMapped` for an unknown attribute and
    /// `InvalidOperation` for a deleted object.
    pub fn write_property(&self, r: ObjectRef, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.with_graph(|graph| graph.write_property(r, name, value))
    }

    /// Resolves a to-one relationship.
    ///
    /// # Errors
    ///
    /// Returns a mapping error or the error of the fetch.
    pub fn read_to_one(&self, r: ObjectRef, name: &str) -> CoreResult<Option<ObjectRef>> {
        self.with_graph(|graph| graph.read_to_one(r, name))
    }

    /// Resolves a to-many relationship.
    ///
    /// # Errors
    ///
    /// Returns a mapping error or the error of the fetch.
    pub fn read_to_many(&self, r: ObjectRef, name: &str) -> CoreResult<Vec<ObjectRef>> {
        self.with_graph(|graph| graph.read_to_many(r, name))
    }

    /// Points a to-one relationship at `target`, updating the mirrored
    /// relationship of the old and new target.
    ///
    /// # Errors
    ///
    /// Returns a mapping error, or `InvalidOperation` for a target of the
    /// wrong entity.
    pub fn set_to_one(&self, r: ObjectRef, name: &str, target: Option<ObjectRef>) -> CoreResult<()> {
        self.with_graph(|graph| graph.set_to_one(r, name, target, true))
    }

    /// Adds `target` to a to-many relationship and updates the mirrored
    /// relationship.
    ///
    /// # Errors
    ///
    /// Returns a mapping error, or `InvalidOperation` for a target of the
    /// wrong entity.
    pub fn add_to_many(&self, r: ObjectRef, name: &str, target: ObjectRef) -> CoreResult<()> {
        self.with_graph(|graph| graph.add_to_many(r, name, target, true))
    }

    /// Removes `target` from a to-many relationship and updates the
    /// mirrored relationship.
    ///
    /// # Errors
    ///
    /// Returns a mapping error or the error of resolving the relationship.
    pub fn remove_to_many(&self, r: ObjectRef, name: &str, target: ObjectRef) -> CoreResult<()> {
        self.with_graph(|graph| graph.remove_to_many(r, name, target, true))
    }

    /// Marks an object for deletion.
    ///
    /// # Errors
    ///
    /// Returns `DeleteDenied` if a Deny rule refuses the delete; no object
    /// changes state in that case.
    pub fn delete_object(&self, r: ObjectRef) -> CoreResult<()> {
        self.delete_objects(&[r])
    }

    /// Marks objects for deletion, applying delete rules.
    ///
    /// # Errors
    ///
    /// Returns `DeleteDenied` if a Deny rule refuses the delete; no object
    /// changes state in that case.
    pub fn delete_objects(&self, objects: &[ObjectRef]) -> CoreResult<()> {
        self.with_graph(|graph| delete::delete_objects(graph, objects))
    }

    /// Commits all pending changes.
    ///
    /// Changes that would not alter a row are reset without touching the
    /// database when `validate_before_commit` is set. On failure the
    /// pending changes are kept, so the caller can fix them and retry, or
    /// roll back.
    ///
    /// # Errors
    ///
    /// Returns `OptimisticLock` when a row changed underneath, and
    /// `CommitFailed`, `PkPropagation` or `DependencyCycle` otherwise.
    pub fn commit_changes(&self) -> CoreResult<()> {
        let mut state = self.lock();
        let store = &mut state.store;
        if !store.has_changes() {
            tracing::debug!(context = %self.subscriber, "nothing to commit");
            return Ok(());
        }
        if self.channel.config().validate_before_commit && store.is_phantom() {
            tracing::debug!(context = %self.subscriber, "phantom modification, skipping flush");
            store.postprocess_after_phantom_commit();
            return Ok(());
        }
        let result = match self.channel.commit(Some(self.subscriber), store) {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(context = %self.subscriber, %err, "commit failed");
                return Err(err);
            }
        };
        store.postprocess_after_commit(&result.diff)?;
        store.update_snapshot_versions(&result.versions);
        Ok(())
    }

    /// Discards all pending changes.
    ///
    /// NEW objects are detached; MODIFIED and DELETED objects become
    /// HOLLOW and reload on next access.
    pub fn rollback_changes(&self) {
        self.lock().store.objects_rolled_back();
    }

    /// The object with an identity, registered as HOLLOW if it is not in
    /// the context yet. No query is run.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotFound` for an unregistered temporary identity.
    pub fn local_object(&self, id: &Identity) -> CoreResult<ObjectRef> {
        self.with_graph(|graph| graph.local_object(id))
    }

    /// Finds the object with an identity, fetching its row if needed.
    ///
    /// # Errors
    ///
    /// Returns a mapping error or the error of the fetch.
    pub fn find(&self, id: &Identity) -> CoreResult<Option<ObjectRef>> {
        self.with_graph(|graph| {
            if let Some(r) = graph.store.lookup(id) {
                return Ok(Some(r));
            }
            if id.is_temporary() {
                return Ok(None);
            }
            match self.channel.snapshot(Some(self.subscriber), id)? {
                Some(row) => graph.object_from_row(id.entity_name(), &row).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Fetches the objects matching a query.
    ///
    /// # Errors
    ///
    /// Returns a mapping error or the error of the fetch.
    pub fn select(&self, query: &SelectQuery) -> CoreResult<Vec<ObjectRef>> {
        self.with_graph(|graph| graph.select(query))
    }

    /// Opens a cursor over the raw rows of a query.
    ///
    /// # Errors
    ///
    /// Returns a mapping error or the error of the fetch.
    pub fn iterate(&self, query: &SelectQuery) -> CoreResult<ResultIterator> {
        let db_query = query.to_db_query(self.channel.resolver())?;
        self.channel.iterate(&db_query)
    }

    /// Drops the cached state of objects, here and in the shared cache.
    ///
    /// COMMITTED objects become HOLLOW. Dirty objects keep their local
    /// state.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotRegistered` for a handle of another context.
    pub fn invalidate_objects(&self, objects: &[ObjectRef]) -> CoreResult<()> {
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(objects.len());
        for &r in objects {
            let object = state.store.object_mut(r)?;
            let Some(id) = object.identity().cloned() else {
                continue;
            };
            match object.state() {
                PersistenceState::Committed => {
                    object.make_hollow();
                    ids.push(id);
                }
                PersistenceState::Hollow | PersistenceState::Modified | PersistenceState::Deleted => ids.push(id),
                PersistenceState::New | PersistenceState::Transient => {}
            }
        }
        tracing::debug!(context = %self.subscriber, objects = ids.len(), "invalidating objects");
        self.channel.invalidate(Some(self.subscriber), &ids);
        Ok(())
    }

    /// Persistence state of an object.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotRegistered` for a handle of another context.
    pub fn persistence_state(&self, r: ObjectRef) -> CoreResult<PersistenceState> {
        Ok(self.lock().store.object(r)?.state())
    }

    /// Current identity of an object.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotRegistered` for a handle of another context.
    pub fn identity(&self, r: ObjectRef) -> CoreResult<Option<Identity>> {
        Ok(self.lock().store.object(r)?.identity().cloned())
    }

    /// A copy of an object's current state, without loading it.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotRegistered` for a handle of another context.
    pub fn object(&self, r: ObjectRef) -> CoreResult<DataObject> {
        Ok(self.lock().store.object(r)?.clone())
    }

    /// Returns true if there are uncommitted changes.
    pub fn has_changes(&self) -> bool {
        self.lock().store.has_changes()
    }

    /// Objects currently in a persistence state.
    pub fn objects_in_state(&self, state: PersistenceState) -> Vec<ObjectRef> {
        self.lock().store.objects_in_state(state)
    }

    /// Number of objects registered with the context.
    pub fn registered_count(&self) -> usize {
        self.lock().store.registered_count()
    }

    /// All uncommitted changes in recording order.
    pub fn get_changes(&self) -> CompoundDiff {
        self.lock().store.get_changes()
    }
}

impl Drop for ObjectContext {
    fn drop(&mut self) {
        self.channel.snapshot_cache().unsubscribe(self.subscriber);
    }
}

impl std::fmt::Debug for ObjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectContext")
            .field("subscriber", &self.subscriber)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::map::{DeleteRule, EntityResolver, ObjEntity, ObjRelationship};
    use ormgraph_storage::{DataRow, DbEntity, DbRelationship, MemoryDataNode, Schema, StatementKind};

    fn domain() -> (Arc<MemoryDataNode>, Arc<DataDomain>) {
        let schema = Arc::new(
            Schema::new()
                .with_entity(
                    DbEntity::new("ARTIST")
                        .generated_pk("ARTIST_ID")
                        .column("ARTIST_NAME", true)
                        .relationship(DbRelationship::to_many("paintingArray", "PAINTING", "ARTIST_ID", "ARTIST_ID")),
                )
                .with_entity(
                    DbEntity::new("PAINTING")
                        .pk("PAINTING_ID")
                        .column("PAINTING_TITLE", true)
                        .column("ARTIST_ID", false)
                        .relationship(DbRelationship::to_one("toArtist", "ARTIST", "ARTIST_ID", "ARTIST_ID")),
                ),
        );
        let resolver = EntityResolver::new(
            Arc::clone(&schema),
            [
                ObjEntity::new("Artist", "ARTIST")
                    .attribute("name", "ARTIST_NAME")
                    .relationship(
                        ObjRelationship::to_many("paintingArray", "Painting", "paintingArray")
                            .delete_rule(DeleteRule::Deny),
                    ),
                ObjEntity::new("Painting", "PAINTING")
                    .attribute("title", "PAINTING_TITLE")
                    .relationship(
                        ObjRelationship::to_one("toArtist", "Artist", "toArtist").delete_rule(DeleteRule::Nullify),
                    ),
            ],
        )
        .unwrap();
        let node = Arc::new(MemoryDataNode::new("node", schema));
        let domain = DataDomain::new("test", Arc::new(resolver), node.clone(), Config::default());
        (node, Arc::new(domain))
    }

    #[test]
    fn new_objects_get_permanent_ids_on_commit() {
        let (node, domain) = domain();
        let context = domain.create_context();
        let artist = context.new_object("Artist").unwrap();
        let painting = context.new_object("Painting").unwrap();
        context.write_property(artist, "name", "Monet").unwrap();
        context.write_property(painting, "title", "Water Lilies").unwrap();
        context.add_to_many(artist, "paintingArray", painting).unwrap();
        assert_eq!(context.read_to_one(painting, "toArtist").unwrap(), Some(artist));

        context.commit_changes().unwrap();

        let id = context.identity(artist).unwrap().unwrap();
        assert!(!id.is_temporary());
        assert_eq!(context.persistence_state(painting).unwrap(), PersistenceState::Committed);
        assert_eq!(context.find(&id).unwrap(), Some(artist));
        assert_eq!(node.row_count("PAINTING"), 1);
        assert!(!context.has_changes());
    }

    #[test]
    fn phantom_change_issues_no_statements() {
        let (node, domain) = domain();
        node.seed(
            "ARTIST",
            DataRow::from_pairs([("ARTIST_ID", Value::Integer(1)), ("ARTIST_NAME", Value::from("Monet"))]),
        )
        .unwrap();
        let context = domain.create_context();
        let artist = context.select(&SelectQuery::new("Artist")).unwrap()[0];

        context.write_property(artist, "name", "Monet").unwrap();
        assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Modified);
        context.commit_changes().unwrap();

        assert!(node.statement_log().is_empty());
        assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Committed);
    }

    #[test]
    fn deny_leaves_states_unchanged() {
        let (node, domain) = domain();
        node.seed(
            "ARTIST",
            DataRow::from_pairs([("ARTIST_ID", Value::Integer(1)), ("ARTIST_NAME", Value::from("Monet"))]),
        )
        .unwrap();
        node.seed(
            "PAINTING",
            DataRow::from_pairs([
                ("PAINTING_ID", Value::Integer(10)),
                ("PAINTING_TITLE", Value::from("Irises")),
                ("ARTIST_ID", Value::Integer(1)),
            ]),
        )
        .unwrap();
        let context = domain.create_context();
        let artist = context.select(&SelectQuery::new("Artist")).unwrap()[0];

        let err = context.delete_object(artist).unwrap_err();
        assert!(matches!(err, CoreError::DeleteDenied { ref relationship, .. } if relationship == "paintingArray"));
        assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Committed);
        assert!(!context.has_changes());
    }

    #[test]
    fn deleting_new_object_detaches_it() {
        let (node, domain) = domain();
        let context = domain.create_context();
        let painting = context.new_object("Painting").unwrap();
        context.delete_object(painting).unwrap();

        assert_eq!(context.persistence_state(painting).unwrap(), PersistenceState::Transient);
        assert!(!context.has_changes());
        context.commit_changes().unwrap();
        assert!(node.statement_log().is_empty());
    }

    #[test]
    fn nullify_updates_instead_of_deleting() {
        let (node, domain) = domain();
        node.seed(
            "ARTIST",
            DataRow::from_pairs([("ARTIST_ID", Value::Integer(1)), ("ARTIST_NAME", Value::from("Monet"))]),
        )
        .unwrap();
        node.seed(
            "PAINTING",
            DataRow::from_pairs([
                ("PAINTING_ID", Value::Integer(10)),
                ("PAINTING_TITLE", Value::from("Irises")),
                ("ARTIST_ID", Value::Integer(1)),
            ]),
        )
        .unwrap();
        let context = domain.create_context();
        let painting = context.select(&SelectQuery::new("Painting")).unwrap()[0];
        let artist = context.read_to_one(painting, "toArtist").unwrap().unwrap();
        assert_eq!(context.read_to_many(artist, "paintingArray").unwrap(), vec![painting]);

        context.delete_object(painting).unwrap();
        assert!(context.read_to_many(artist, "paintingArray").unwrap().is_empty());
        context.commit_changes().unwrap();

        let kinds: Vec<StatementKind> = node.statement_log().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StatementKind::Delete]);
        assert_eq!(node.row_count("PAINTING"), 0);
        assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Committed);
    }

    #[test]
    fn rollback_restores_committed_values() {
        let (node, domain) = domain();
        node.seed(
            "ARTIST",
            DataRow::from_pairs([("ARTIST_ID", Value::Integer(1)), ("ARTIST_NAME", Value::from("Monet"))]),
        )
        .unwrap();
        let context = domain.create_context();
        let artist = context.select(&SelectQuery::new("Artist")).unwrap()[0];
        context.write_property(artist, "name", "Manet").unwrap();
        let fresh = context.new_object("Artist").unwrap();

        context.rollback_changes();

        assert_eq!(context.persistence_state(fresh).unwrap(), PersistenceState::Transient);
        assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Hollow);
        assert_eq!(context.read_property(artist, "name").unwrap(), Value::from("Monet"));
        assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Committed);
    }

    #[test]
    fn dropping_a_context_unsubscribes_it() {
        let (_node, domain) = domain();
        let context = domain.create_context();
        assert_eq!(domain.snapshot_cache().subscriber_count(), 1);
        drop(context);
        assert_eq!(domain.snapshot_cache().subscriber_count(), 0);
    }
}
