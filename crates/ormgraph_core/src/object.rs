//! Persistent objects and the arena that owns them.

use crate::identity::Identity;
use crate::map::{EntityResolver, ObjEntity, Property};
use ormgraph_codec::Value;
use ormgraph_storage::{DataRow, DEFAULT_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Handle of an object owned by a context.
///
/// Handles stay valid for the lifetime of the context, across identity
/// replacement, invalidation and detachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef(usize);

impl ObjectRef {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the object in its context's arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Lifecycle state of a persistent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistenceState {
    /// Not registered with any context.
    Transient,
    /// Registered and not yet inserted.
    New,
    /// In sync with the last known committed row.
    Committed,
    /// Changed since the last commit.
    Modified,
    /// Marked for deletion.
    Deleted,
    /// Identity known, values not loaded.
    Hollow,
}

impl PersistenceState {
    /// Returns true for states that participate in a commit.
    pub fn is_dirty(self) -> bool {
        matches!(
            self,
            PersistenceState::New | PersistenceState::Modified | PersistenceState::Deleted
        )
    }
}

impl fmt::Display for PersistenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PersistenceState::Transient => "TRANSIENT",
            PersistenceState::New => "NEW",
            PersistenceState::Committed => "COMMITTED",
            PersistenceState::Modified => "MODIFIED",
            PersistenceState::Deleted => "DELETED",
            PersistenceState::Hollow => "HOLLOW",
        };
        f.write_str(name)
    }
}

/// Placeholder for a relationship value that has not been fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Unresolved to-one. Holds the target identity when the foreign key
    /// is known from the source row; `None` means the target must be
    /// queried.
    ToOne(Option<Identity>),
    /// Unresolved to-many.
    ToMany,
}

/// A relationship value: either resolved or a fault that resolves on
/// first access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relationship<T> {
    /// The value is loaded.
    Resolved(T),
    /// The value will be fetched on first access.
    Fault(Fault),
}

impl<T> Relationship<T> {
    /// Returns true if the value is not loaded.
    pub fn is_fault(&self) -> bool {
        matches!(self, Relationship::Fault(_))
    }

    /// The loaded value, if any.
    pub fn resolved(&self) -> Option<&T> {
        match self {
            Relationship::Resolved(value) => Some(value),
            Relationship::Fault(_) => None,
        }
    }
}

/// Value of one property of an object.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Scalar attribute.
    Attribute(Value),
    /// To-one relationship.
    ToOne(Relationship<Option<ObjectRef>>),
    /// To-many relationship.
    ToMany(Relationship<Vec<ObjectRef>>),
}

/// A persistent object.
///
/// Objects are created detached (TRANSIENT) or by a context. Once
/// registered, a context owns the object and hands out [`ObjectRef`]
/// handles; property access then goes through the context so changes
/// are tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct DataObject {
    entity: String,
    identity: Option<Identity>,
    state: PersistenceState,
    values: BTreeMap<String, PropertyValue>,
    snapshot_version: u64,
}

impl DataObject {
    /// Creates a detached object of an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            identity: None,
            state: PersistenceState::Transient,
            values: BTreeMap::new(),
            snapshot_version: DEFAULT_VERSION,
        }
    }

    /// Sets an attribute value on a detached object.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values
            .insert(name.into(), PropertyValue::Attribute(value.into()));
        self
    }

    /// Entity name.
    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    /// Identity, once registered.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Persistence state.
    pub fn state(&self) -> PersistenceState {
        self.state
    }

    /// Version of the snapshot the values were loaded from.
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    /// Raw value of a property.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    /// Attribute value, or `Null` if unset or not an attribute.
    pub fn value(&self, name: &str) -> &Value {
        match self.values.get(name) {
            Some(PropertyValue::Attribute(v)) => v,
            _ => &Value::Null,
        }
    }

    /// All loaded properties, ordered by name.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn set_property(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.values.insert(name.into(), value);
    }

    pub(crate) fn property_mut(&mut self, name: &str) -> Option<&mut PropertyValue> {
        self.values.get_mut(name)
    }

    pub(crate) fn set_identity(&mut self, identity: Option<Identity>) {
        self.identity = identity;
    }

    pub(crate) fn set_state(&mut self, state: PersistenceState) {
        self.state = state;
    }

    pub(crate) fn set_snapshot_version(&mut self, version: u64) {
        self.snapshot_version = version;
    }

    /// Drops loaded values; the next access refetches them.
    pub(crate) fn make_hollow(&mut self) {
        self.values.clear();
        self.state = PersistenceState::Hollow;
    }

    /// Initializes empty relationships of a new object.
    pub(crate) fn init_relationships(&mut self, entity: &ObjEntity) {
        for property in entity.properties() {
            match property {
                Property::Attribute(_) => {}
                Property::ToOne(rel) => {
                    self.values
                        .entry(rel.name.clone())
                        .or_insert(PropertyValue::ToOne(Relationship::Resolved(None)));
                }
                Property::ToMany(rel) => {
                    self.values
                        .entry(rel.name.clone())
                        .or_insert(PropertyValue::ToMany(Relationship::Resolved(Vec::new())));
                }
            }
        }
    }

    /// Loads attribute values and to-one faults from a row.
    ///
    /// Resolved to-many relationships are kept; missing ones become faults.
    pub(crate) fn populate(&mut self, entity: &ObjEntity, resolver: &EntityResolver, row: &DataRow) {
        for property in entity.properties() {
            match property {
                Property::Attribute(attr) => {
                    let value = row.get(&attr.column).cloned().unwrap_or(Value::Null);
                    self.values
                        .insert(attr.name.clone(), PropertyValue::Attribute(value));
                }
                Property::ToOne(rel) => {
                    let value = match resolver.fk_relationship(entity, rel) {
                        Some(db_rel) => match resolver.target_identity(rel, db_rel, row) {
                            Some(target) => Relationship::Fault(Fault::ToOne(Some(target))),
                            None => Relationship::Resolved(None),
                        },
                        None => Relationship::Fault(Fault::ToOne(None)),
                    };
                    self.values
                        .insert(rel.name.clone(), PropertyValue::ToOne(value));
                }
                Property::ToMany(rel) => {
                    self.values
                        .entry(rel.name.clone())
                        .or_insert(PropertyValue::ToMany(Relationship::Fault(Fault::ToMany)));
                }
            }
        }
        self.snapshot_version = row.version();
    }
}

/// Owns the objects of one context.
#[derive(Debug, Default)]
pub(crate) struct ObjectArena {
    objects: Vec<DataObject>,
}

impl ObjectArena {
    pub(crate) fn insert(&mut self, object: DataObject) -> ObjectRef {
        self.objects.push(object);
        ObjectRef::new(self.objects.len() - 1)
    }

    pub(crate) fn get(&self, r: ObjectRef) -> Option<&DataObject> {
        self.objects.get(r.0)
    }

    pub(crate) fn get_mut(&mut self, r: ObjectRef) -> Option<&mut DataObject> {
        self.objects.get_mut(r.0)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ObjectRef, &DataObject)> {
        self.objects.iter().enumerate().map(|(i, o)| (ObjectRef::new(i), o))
    }

    /// Identity of the target of a to-one property.
    ///
    /// Returns `None` when the target is unknown without a query.
    pub(crate) fn to_one_identity(&self, object: &DataObject, rel: &str) -> Option<Option<Identity>> {
        match object.property(rel)? {
            PropertyValue::ToOne(Relationship::Resolved(Some(target))) => {
                Some(self.get(*target).and_then(|t| t.identity().cloned()))
            }
            PropertyValue::ToOne(Relationship::Resolved(None)) => Some(None),
            PropertyValue::ToOne(Relationship::Fault(Fault::ToOne(Some(id)))) => Some(Some(id.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::ObjRelationship;
    use ormgraph_storage::{DbEntity, DbRelationship, Schema};
    use std::sync::Arc;

    fn resolver() -> EntityResolver {
        let schema = Schema::new()
            .with_entity(
                DbEntity::new("ARTIST")
                    .pk("ARTIST_ID")
                    .column("ARTIST_NAME", true)
                    .relationship(DbRelationship::to_many("paintingArray", "PAINTING", "ARTIST_ID", "ARTIST_ID")),
            )
            .with_entity(
                DbEntity::new("PAINTING")
                    .pk("PAINTING_ID")
                    .column("PAINTING_TITLE", true)
                    .column("ARTIST_ID", false)
                    .relationship(DbRelationship::to_one("toArtist", "ARTIST", "ARTIST_ID", "ARTIST_ID")),
            );
        EntityResolver::new(
            Arc::new(schema),
            [
                ObjEntity::new("Artist", "ARTIST")
                    .attribute("name", "ARTIST_NAME")
                    .relationship(ObjRelationship::to_many("paintingArray", "Painting", "paintingArray")),
                ObjEntity::new("Painting", "PAINTING")
                    .attribute("title", "PAINTING_TITLE")
                    .relationship(ObjRelationship::to_one("toArtist", "Artist", "toArtist")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn populate_creates_faults() {
        let resolver = resolver();
        let painting = resolver.entity("Painting").unwrap();
        let row = DataRow::from_pairs([
            ("PAINTING_ID", Value::Integer(1)),
            ("PAINTING_TITLE", Value::from("Irises")),
            ("ARTIST_ID", Value::Integer(4)),
        ])
        .with_version(7);

        let mut object = DataObject::new("Painting");
        object.populate(painting, &resolver, &row);

        assert_eq!(object.value("title"), &Value::from("Irises"));
        assert_eq!(object.snapshot_version(), 7);
        assert_eq!(
            object.property("toArtist"),
            Some(&PropertyValue::ToOne(Relationship::Fault(Fault::ToOne(Some(
                Identity::single("Artist", "ARTIST_ID", 4i64)
            )))))
        );
    }

    #[test]
    fn null_foreign_key_resolves_to_none() {
        let resolver = resolver();
        let painting = resolver.entity("Painting").unwrap();
        let row = DataRow::from_pairs([
            ("PAINTING_ID", Value::Integer(1)),
            ("PAINTING_TITLE", Value::from("Irises")),
            ("ARTIST_ID", Value::Null),
        ]);
        let mut object = DataObject::new("Painting");
        object.populate(painting, &resolver, &row);

        let arena = ObjectArena::default();
        assert_eq!(arena.to_one_identity(&object, "toArtist"), Some(None));
    }

    #[test]
    fn to_many_starts_as_fault() {
        let resolver = resolver();
        let artist = resolver.entity("Artist").unwrap();
        let row = DataRow::from_pairs([("ARTIST_ID", Value::Integer(4)), ("ARTIST_NAME", Value::from("A"))]);
        let mut object = DataObject::new("Artist");
        object.populate(artist, &resolver, &row);
        assert!(matches!(
            object.property("paintingArray"),
            Some(PropertyValue::ToMany(Relationship::Fault(Fault::ToMany)))
        ));
    }

    #[test]
    fn dirty_states() {
        assert!(PersistenceState::New.is_dirty());
        assert!(PersistenceState::Modified.is_dirty());
        assert!(PersistenceState::Deleted.is_dirty());
        assert!(!PersistenceState::Committed.is_dirty());
        assert!(!PersistenceState::Hollow.is_dirty());
        assert!(!PersistenceState::Transient.is_dirty());
    }
}
