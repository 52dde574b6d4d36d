//! Relational schema: tables, columns and the joins between them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbAttribute {
    /// Column name.
    pub name: String,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
    /// Whether NULL is rejected.
    pub mandatory: bool,
    /// Whether the database assigns the value on insert (auto-increment).
    pub generated: bool,
}

/// One column pair of a relationship join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbJoin {
    /// Column on the source table.
    pub source: String,
    /// Column on the target table.
    pub target: String,
}

/// A relationship between two tables, expressed as column joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbRelationship {
    /// Relationship name, unique within the source table.
    pub name: String,
    /// Target table.
    pub target: String,
    /// Join column pairs.
    pub joins: Vec<DbJoin>,
    /// Whether more than one target row can match.
    pub to_many: bool,
    /// Whether the target's primary key is propagated from the source's.
    pub to_dependent_pk: bool,
}

impl DbRelationship {
    /// Creates a to-one relationship with a single join.
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        source_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            joins: vec![DbJoin {
                source: source_column.into(),
                target: target_column.into(),
            }],
            to_many: false,
            to_dependent_pk: false,
        }
    }

    /// Creates a to-many relationship with a single join.
    pub fn to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        source_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            to_many: true,
            ..Self::to_one(name, target, source_column, target_column)
        }
    }

    /// Marks the target's primary key as propagated from the source.
    #[must_use]
    pub fn dependent_pk(mut self) -> Self {
        self.to_dependent_pk = true;
        self
    }

    /// Source column names, in join order.
    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.joins.iter().map(|j| j.source.as_str())
    }

    /// Target column names, in join order.
    pub fn target_columns(&self) -> impl Iterator<Item = &str> {
        self.joins.iter().map(|j| j.target.as_str())
    }
}

/// A table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbEntity {
    /// Table name.
    pub name: String,
    /// Columns, in declaration order.
    pub attributes: Vec<DbAttribute>,
    /// Outgoing relationships.
    pub relationships: Vec<DbRelationship>,
}

impl DbEntity {
    /// Creates an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Adds a primary key column whose values are assigned by the
    /// key generator or propagated from a master row.
    #[must_use]
    pub fn pk(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(DbAttribute {
            name: name.into(),
            primary_key: true,
            mandatory: true,
            generated: false,
        });
        self
    }

    /// Adds a primary key column assigned by the database on insert.
    #[must_use]
    pub fn generated_pk(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(DbAttribute {
            name: name.into(),
            primary_key: true,
            mandatory: true,
            generated: true,
        });
        self
    }

    /// Adds a regular column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, mandatory: bool) -> Self {
        self.attributes.push(DbAttribute {
            name: name.into(),
            primary_key: false,
            mandatory,
            generated: false,
        });
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn relationship(mut self, relationship: DbRelationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Looks up a column by name.
    pub fn attribute(&self, name: &str) -> Option<&DbAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Looks up a relationship by name.
    pub fn relationship_named(&self, name: &str) -> Option<&DbRelationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Primary key columns, in declaration order.
    pub fn primary_key(&self) -> impl Iterator<Item = &DbAttribute> {
        self.attributes.iter().filter(|a| a.primary_key)
    }

    /// Names of the primary key columns.
    pub fn primary_key_names(&self) -> Vec<String> {
        self.primary_key().map(|a| a.name.clone()).collect()
    }

    /// Returns true if `column` is a primary key column.
    pub fn is_pk_column(&self, column: &str) -> bool {
        self.attribute(column).is_some_and(|a| a.primary_key)
    }
}

/// A set of tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    entities: BTreeMap<String, DbEntity>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, replacing any table with the same name.
    #[must_use]
    pub fn with_entity(mut self, entity: DbEntity) -> Self {
        self.add_entity(entity);
        self
    }

    /// Adds a table, replacing any table with the same name.
    pub fn add_entity(&mut self, entity: DbEntity) {
        self.entities.insert(entity.name.clone(), entity);
    }

    /// Looks up a table.
    pub fn entity(&self, name: &str) -> Option<&DbEntity> {
        self.entities.get(name)
    }

    /// All tables, ordered by name.
    pub fn entities(&self) -> impl Iterator<Item = &DbEntity> {
        self.entities.values()
    }

    /// Returns true if every target column of `rel` is part of the
    /// target table's primary key.
    pub fn is_to_pk(&self, rel: &DbRelationship) -> bool {
        self.entity(&rel.target)
            .is_some_and(|t| rel.joins.iter().all(|j| t.is_pk_column(&j.target)))
    }

    /// Returns true if a row of `source` holds a foreign key that points
    /// at a row of the relationship target, i.e. the target row must exist
    /// before the source row is inserted.
    pub fn is_dependency(&self, rel: &DbRelationship) -> bool {
        !rel.to_many && !rel.to_dependent_pk && self.is_to_pk(rel)
    }

    /// Relationships through which `table` depends on other tables.
    pub fn dependencies<'a>(
        &'a self,
        table: &'a DbEntity,
    ) -> impl Iterator<Item = &'a DbRelationship> + 'a {
        table.relationships.iter().filter(|r| self.is_dependency(r))
    }

    /// Finds the relationship on the target table that mirrors `rel`.
    pub fn reverse_relationship(&self, source: &str, rel: &DbRelationship) -> Option<&DbRelationship> {
        let target = self.entity(&rel.target)?;
        target.relationships.iter().find(|candidate| {
            candidate.target == source
                && candidate.joins.len() == rel.joins.len()
                && rel.joins.iter().all(|j| {
                    candidate
                        .joins
                        .iter()
                        .any(|c| c.source == j.target && c.target == j.source)
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new()
            .with_entity(
                DbEntity::new("ARTIST")
                    .pk("ARTIST_ID")
                    .column("ARTIST_NAME", true)
                    .relationship(DbRelationship::to_many(
                        "paintingArray",
                        "PAINTING",
                        "ARTIST_ID",
                        "ARTIST_ID",
                    )),
            )
            .with_entity(
                DbEntity::new("PAINTING")
                    .pk("PAINTING_ID")
                    .column("ARTIST_ID", false)
                    .relationship(DbRelationship::to_one(
                        "toArtist",
                        "ARTIST",
                        "ARTIST_ID",
                        "ARTIST_ID",
                    ))
                    .relationship(
                        DbRelationship::to_one("toInfo", "PAINTING_INFO", "PAINTING_ID", "PAINTING_ID")
                            .dependent_pk(),
                    ),
            )
            .with_entity(
                DbEntity::new("PAINTING_INFO")
                    .pk("PAINTING_ID")
                    .relationship(DbRelationship::to_one(
                        "painting",
                        "PAINTING",
                        "PAINTING_ID",
                        "PAINTING_ID",
                    )),
            )
    }

    #[test]
    fn fk_side_is_a_dependency() {
        let schema = schema();
        let painting = schema.entity("PAINTING").unwrap();
        let deps: Vec<_> = schema.dependencies(painting).map(|r| r.name.as_str()).collect();
        assert_eq!(deps, vec!["toArtist"]);
    }

    #[test]
    fn to_many_is_not_a_dependency() {
        let schema = schema();
        let artist = schema.entity("ARTIST").unwrap();
        assert_eq!(schema.dependencies(artist).count(), 0);
    }

    #[test]
    fn dependent_pk_points_from_dependent_to_master() {
        let schema = schema();
        let info = schema.entity("PAINTING_INFO").unwrap();
        let deps: Vec<_> = schema.dependencies(info).map(|r| r.target.as_str()).collect();
        assert_eq!(deps, vec!["PAINTING"]);
    }

    #[test]
    fn reverse_relationship_lookup() {
        let schema = schema();
        let painting = schema.entity("PAINTING").unwrap();
        let to_artist = painting.relationship_named("toArtist").unwrap();
        let reverse = schema.reverse_relationship("PAINTING", to_artist).unwrap();
        assert_eq!(reverse.name, "paintingArray");
    }

    #[test]
    fn primary_key_names() {
        let schema = schema();
        assert_eq!(
            schema.entity("ARTIST").unwrap().primary_key_names(),
            vec!["ARTIST_ID".to_string()]
        );
    }
}
