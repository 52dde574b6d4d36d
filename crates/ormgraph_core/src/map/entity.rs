//! Object entities and their properties.

use serde::{Deserialize, Serialize};

/// What happens to related objects when an object is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeleteRule {
    /// Leave related objects alone.
    #[default]
    NoAction,
    /// Clear the relationship on both sides.
    Nullify,
    /// Refuse the delete while related objects exist.
    Deny,
    /// Delete related objects first.
    Cascade,
}

/// Locking strategy of an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockType {
    /// Updates and deletes are qualified by primary key only.
    #[default]
    None,
    /// Updates and deletes also match the last committed values of locked
    /// attributes.
    Optimistic,
}

/// A scalar property mapped to a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjAttribute {
    /// Property name.
    pub name: String,
    /// Column name.
    pub column: String,
    /// Whether the attribute participates in optimistic locking.
    pub used_for_locking: bool,
}

/// A relationship property.
///
/// `db_path` names the table relationships the property follows: one for
/// a plain relationship, two for a flattened many-to-many relationship
/// realized through a join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjRelationship {
    /// Property name.
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Whether the property holds a collection.
    pub to_many: bool,
    /// Table relationship names, in traversal order.
    pub db_path: Vec<String>,
    /// Delete rule applied when the source object is deleted.
    pub delete_rule: DeleteRule,
    /// Runtime-only relationships never cross the client boundary.
    pub runtime: bool,
}

impl ObjRelationship {
    /// Creates a to-one relationship over one table relationship.
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        db_relationship: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            to_many: false,
            db_path: vec![db_relationship.into()],
            delete_rule: DeleteRule::NoAction,
            runtime: false,
        }
    }

    /// Creates a to-many relationship over one table relationship.
    pub fn to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        db_relationship: impl Into<String>,
    ) -> Self {
        Self {
            to_many: true,
            ..Self::to_one(name, target, db_relationship)
        }
    }

    /// Creates a to-many relationship flattened across a join table.
    pub fn flattened(
        name: impl Into<String>,
        target: impl Into<String>,
        to_join: impl Into<String>,
        from_join: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            to_many: true,
            db_path: vec![to_join.into(), from_join.into()],
            delete_rule: DeleteRule::NoAction,
            runtime: false,
        }
    }

    /// Sets the delete rule.
    #[must_use]
    pub fn delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = rule;
        self
    }

    /// Marks the relationship runtime-only.
    #[must_use]
    pub fn runtime(mut self) -> Self {
        self.runtime = true;
        self
    }

    /// Returns true if the relationship goes through a join table.
    pub fn is_flattened(&self) -> bool {
        self.db_path.len() > 1
    }
}

/// A property of an entity.
///
/// Properties form a closed set; code that treats them differently
/// matches on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property<'a> {
    /// A scalar attribute.
    Attribute(&'a ObjAttribute),
    /// A to-one relationship.
    ToOne(&'a ObjRelationship),
    /// A to-many relationship.
    ToMany(&'a ObjRelationship),
}

impl<'a> Property<'a> {
    /// Property name.
    pub fn name(&self) -> &'a str {
        match self {
            Property::Attribute(a) => &a.name,
            Property::ToOne(r) | Property::ToMany(r) => &r.name,
        }
    }

    /// The relationship, if the property is one.
    pub fn relationship(&self) -> Option<&'a ObjRelationship> {
        match self {
            Property::Attribute(_) => None,
            Property::ToOne(r) | Property::ToMany(r) => Some(r),
        }
    }
}

/// A persistent class mapped onto a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjEntity {
    /// Entity name.
    pub name: String,
    /// Table name.
    pub table: String,
    /// Attributes, in declaration order.
    pub attributes: Vec<ObjAttribute>,
    /// Relationships, in declaration order.
    pub relationships: Vec<ObjRelationship>,
    /// Locking strategy.
    pub lock_type: LockType,
    /// Whether changes of this entity may cross the client boundary.
    pub client_exposed: bool,
}

impl ObjEntity {
    /// Creates an entity with no properties.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            lock_type: LockType::None,
            client_exposed: true,
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.attributes.push(ObjAttribute {
            name: name.into(),
            column: column.into(),
            used_for_locking: false,
        });
        self
    }

    /// Adds an attribute used for optimistic locking.
    #[must_use]
    pub fn locked_attribute(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.attributes.push(ObjAttribute {
            name: name.into(),
            column: column.into(),
            used_for_locking: true,
        });
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn relationship(mut self, relationship: ObjRelationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Enables optimistic locking.
    #[must_use]
    pub fn optimistic(mut self) -> Self {
        self.lock_type = LockType::Optimistic;
        self
    }

    /// Keeps the entity's changes on the server side of a client boundary.
    #[must_use]
    pub fn server_only(mut self) -> Self {
        self.client_exposed = false;
        self
    }

    /// Looks up an attribute by property name.
    pub fn attribute_named(&self, name: &str) -> Option<&ObjAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Looks up an attribute by column name.
    pub fn attribute_for_column(&self, column: &str) -> Option<&ObjAttribute> {
        self.attributes.iter().find(|a| a.column == column)
    }

    /// Looks up a relationship by name.
    pub fn relationship_named(&self, name: &str) -> Option<&ObjRelationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Looks up any property by name.
    pub fn property(&self, name: &str) -> Option<Property<'_>> {
        self.properties().find(|p| p.name() == name)
    }

    /// All properties: attributes first, then relationships.
    pub fn properties(&self) -> impl Iterator<Item = Property<'_>> {
        self.attributes.iter().map(Property::Attribute).chain(
            self.relationships.iter().map(|r| {
                if r.to_many {
                    Property::ToMany(r)
                } else {
                    Property::ToOne(r)
                }
            }),
        )
    }

    /// Attributes whose committed values qualify updates and deletes.
    pub fn locked_attributes(&self) -> impl Iterator<Item = &ObjAttribute> {
        let optimistic = self.lock_type == LockType::Optimistic;
        self.attributes
            .iter()
            .filter(move |a| optimistic && a.used_for_locking)
    }
}
