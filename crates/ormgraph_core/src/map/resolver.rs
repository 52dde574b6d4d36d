//! Lookup of object entities and their table mapping.

use super::entity::{ObjEntity, ObjRelationship};
use crate::error::{CoreError, CoreResult};
use crate::identity::Identity;
use ormgraph_storage::{DataRow, DbEntity, DbRelationship, KeyMap, Schema};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Resolves object entities, their tables and relationship paths.
///
/// Construction validates the mapping against the schema, so lookups of
/// tables and table relationships named by a mapped entity cannot fail
/// afterwards for structural reasons.
#[derive(Debug, Clone)]
pub struct EntityResolver {
    schema: Arc<Schema>,
    entities: BTreeMap<String, ObjEntity>,
    by_table: HashMap<String, String>,
    reverse: HashMap<(String, String), String>,
}

impl EntityResolver {
    /// Creates a resolver over `schema` for the given entities.
    ///
    /// # Errors
    ///
    /// Returns an error if an entity references a missing table, column,
    /// relationship or target entity, or if a relationship path does not
    /// end at its target entity's table.
    pub fn new(
        schema: Arc<Schema>,
        entities: impl IntoIterator<Item = ObjEntity>,
    ) -> CoreResult<Self> {
        let entities: BTreeMap<String, ObjEntity> = entities
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();

        let mut by_table = HashMap::new();
        for entity in entities.values() {
            let table = schema.entity(&entity.table).ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "{} is mapped to missing table {}",
                    entity.name, entity.table
                ))
            })?;
            for attr in &entity.attributes {
                if table.attribute(&attr.column).is_none() {
                    return Err(CoreError::invalid_operation(format!(
                        "{}.{} is mapped to missing column {}.{}",
                        entity.name, attr.name, entity.table, attr.column
                    )));
                }
            }
            by_table
                .entry(entity.table.clone())
                .or_insert_with(|| entity.name.clone());
        }

        let mut resolver = Self {
            schema,
            entities,
            by_table,
            reverse: HashMap::new(),
        };

        let mut reverse = HashMap::new();
        for entity in resolver.entities.values() {
            for rel in &entity.relationships {
                let target = resolver.entity(&rel.target)?;
                let path = resolver.db_relationships(entity, rel)?;
                let end = path.last().map(|r| r.target.as_str());
                if end != Some(target.table.as_str()) {
                    return Err(CoreError::invalid_operation(format!(
                        "{}.{} does not lead to table {}",
                        entity.name, rel.name, target.table
                    )));
                }
                if let Some(name) = resolver.find_reverse(entity, rel, &path) {
                    reverse.insert((entity.name.clone(), rel.name.clone()), name);
                }
            }
        }
        resolver.reverse = reverse;
        Ok(resolver)
    }

    fn find_reverse(
        &self,
        entity: &ObjEntity,
        rel: &ObjRelationship,
        path: &[&DbRelationship],
    ) -> Option<String> {
        let mut table = entity.table.as_str();
        let mut reversed = Vec::with_capacity(path.len());
        for db_rel in path {
            reversed.push(self.schema.reverse_relationship(table, db_rel)?.name.clone());
            table = db_rel.target.as_str();
        }
        reversed.reverse();

        let target = self.entities.get(&rel.target)?;
        target
            .relationships
            .iter()
            .find(|r| r.target == entity.name && r.db_path == reversed)
            .map(|r| r.name.clone())
    }

    /// The relational schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Looks up an entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotMapped` if no such entity exists.
    pub fn entity(&self, name: &str) -> CoreResult<&ObjEntity> {
        self.entities
            .get(name)
            .ok_or_else(|| CoreError::entity_not_mapped(name))
    }

    /// All entities, ordered by name.
    pub fn entities(&self) -> impl Iterator<Item = &ObjEntity> {
        self.entities.values()
    }

    /// The entity mapped to a table, if any.
    pub fn entity_for_table(&self, table: &str) -> Option<&ObjEntity> {
        self.by_table.get(table).and_then(|n| self.entities.get(n))
    }

    /// The table of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is missing from the schema.
    pub fn db_entity(&self, entity: &ObjEntity) -> CoreResult<&DbEntity> {
        self.schema
            .entity(&entity.table)
            .ok_or_else(|| CoreError::entity_not_mapped(&entity.table))
    }

    /// Looks up a relationship of an entity.
    ///
    /// # Errors
    ///
    /// Returns `PropertyNotMapped` if the entity has no such relationship.
    pub fn relationship<'a>(
        &self,
        entity: &'a ObjEntity,
        name: &str,
    ) -> CoreResult<&'a ObjRelationship> {
        entity
            .relationship_named(name)
            .ok_or_else(|| CoreError::property_not_mapped(&entity.name, name))
    }

    /// Table relationships a relationship follows, in traversal order.
    ///
    /// # Errors
    ///
    /// Returns an error if a table relationship in the path is missing.
    pub fn db_relationships(
        &self,
        entity: &ObjEntity,
        rel: &ObjRelationship,
    ) -> CoreResult<Vec<&DbRelationship>> {
        let mut table = entity.table.as_str();
        let mut path = Vec::with_capacity(rel.db_path.len());
        for name in &rel.db_path {
            let db_rel = self
                .schema
                .entity(table)
                .and_then(|t| t.relationship_named(name))
                .ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "{}.{} follows missing table relationship {table}.{name}",
                        entity.name, rel.name
                    ))
                })?;
            table = db_rel.target.as_str();
            path.push(db_rel);
        }
        Ok(path)
    }

    /// The relationship on the target entity that mirrors `rel`, if mapped.
    pub fn reverse_relationship(&self, entity: &str, rel: &str) -> Option<&ObjRelationship> {
        let name = self.reverse.get(&(entity.to_string(), rel.to_string()))?;
        let target = &self.entities.get(entity)?.relationship_named(rel)?.target;
        self.entities.get(target)?.relationship_named(name)
    }

    /// Returns the table relationship when `rel` is a to-one whose foreign
    /// key lives in the source row.
    pub fn fk_relationship(
        &self,
        entity: &ObjEntity,
        rel: &ObjRelationship,
    ) -> Option<&DbRelationship> {
        if rel.to_many || rel.is_flattened() {
            return None;
        }
        let path = self.db_relationships(entity, rel).ok()?;
        let db_rel = path.into_iter().next()?;
        self.schema.is_dependency(db_rel).then_some(db_rel)
    }

    /// Computes the identity of the row of an entity.
    ///
    /// Returns `None` if a primary key column is missing or NULL.
    pub fn identity_for_row(&self, entity: &ObjEntity, row: &DataRow) -> Option<Identity> {
        let table = self.schema.entity(&entity.table)?;
        let key = row.key(table.primary_key().map(|a| a.name.as_str()))?;
        Some(Identity::permanent(&entity.name, key))
    }

    /// Identity of the target of a foreign-key to-one, read from the
    /// source row. `None` if the foreign key is NULL.
    pub fn target_identity(
        &self,
        rel: &ObjRelationship,
        db_rel: &DbRelationship,
        row: &DataRow,
    ) -> Option<Identity> {
        let mut key = KeyMap::new();
        for join in &db_rel.joins {
            match row.get(&join.source) {
                Some(v) if !v.is_null() => {
                    key.insert(join.target.clone(), v.clone());
                }
                _ => return None,
            }
        }
        Some(Identity::permanent(&rel.target, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::entity::DeleteRule;
    use ormgraph_codec::Value;
    use ormgraph_storage::DbRelationship;

    fn resolver() -> EntityResolver {
        let schema = Schema::new()
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
                    .column("PAINTING_TITLE", true)
                    .column("ARTIST_ID", false)
                    .relationship(DbRelationship::to_one(
                        "toArtist",
                        "ARTIST",
                        "ARTIST_ID",
                        "ARTIST_ID",
                    )),
            );
        EntityResolver::new(
            Arc::new(schema),
            [
                ObjEntity::new("Artist", "ARTIST")
                    .attribute("name", "ARTIST_NAME")
                    .relationship(
                        ObjRelationship::to_many("paintingArray", "Painting", "paintingArray")
                            .delete_rule(DeleteRule::Deny),
                    ),
                ObjEntity::new("Painting", "PAINTING")
                    .attribute("title", "PAINTING_TITLE")
                    .relationship(ObjRelationship::to_one("toArtist", "Artist", "toArtist")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn reverse_is_inferred_from_joins() {
        let resolver = resolver();
        let reverse = resolver.reverse_relationship("Painting", "toArtist").unwrap();
        assert_eq!(reverse.name, "paintingArray");
        let back = resolver.reverse_relationship("Artist", "paintingArray").unwrap();
        assert_eq!(back.name, "toArtist");
    }

    #[test]
    fn fk_side_detection() {
        let resolver = resolver();
        let painting = resolver.entity("Painting").unwrap();
        let artist = resolver.entity("Artist").unwrap();
        let to_artist = painting.relationship_named("toArtist").unwrap();
        let paintings = artist.relationship_named("paintingArray").unwrap();
        assert!(resolver.fk_relationship(painting, to_artist).is_some());
        assert!(resolver.fk_relationship(artist, paintings).is_none());
    }

    #[test]
    fn identities_from_rows() {
        let resolver = resolver();
        let painting = resolver.entity("Painting").unwrap();
        let to_artist = painting.relationship_named("toArtist").unwrap();
        let db_rel = resolver.fk_relationship(painting, to_artist).unwrap();
        let row = DataRow::from_pairs([
            ("PAINTING_ID", Value::Integer(3)),
            ("ARTIST_ID", Value::Integer(9)),
        ]);

        assert_eq!(
            resolver.identity_for_row(painting, &row),
            Some(Identity::single("Painting", "PAINTING_ID", 3i64))
        );
        assert_eq!(
            resolver.target_identity(to_artist, db_rel, &row),
            Some(Identity::single("Artist", "ARTIST_ID", 9i64))
        );
    }

    #[test]
    fn missing_column_is_rejected() {
        let schema = Arc::new(Schema::new().with_entity(DbEntity::new("ARTIST").pk("ARTIST_ID")));
        let result = EntityResolver::new(
            schema,
            [ObjEntity::new("Artist", "ARTIST").attribute("name", "ARTIST_NAME")],
        );
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn unknown_entity() {
        let resolver = resolver();
        assert!(matches!(
            resolver.entity("Gallery"),
            Err(CoreError::EntityNotMapped { .. })
        ));
    }
}
