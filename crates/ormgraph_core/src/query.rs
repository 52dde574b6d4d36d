//! Object queries and their translation to table queries.

use crate::error::{CoreError, CoreResult};
use crate::identity::Identity;
use crate::map::EntityResolver;
use ormgraph_codec::Value;

/// Selects objects of one entity by equality on attributes, foreign-key
/// relationships or raw columns.
///
/// ```rust
/// use ormgraph_core::SelectQuery;
///
/// let query = SelectQuery::new("Painting").and("title", "Irises");
/// assert_eq!(query.entity_name(), "Painting");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    entity: String,
    terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Attribute(String, Value),
    Related(String, Option<Identity>),
    Column(String, Value),
}

impl SelectQuery {
    /// Selects every object of an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            terms: Vec::new(),
        }
    }

    /// Selects the object with a permanent identity.
    pub fn by_id(id: &Identity) -> Self {
        let mut query = Self::new(id.entity_name());
        if let Some(key) = id.key() {
            for (column, value) in key {
                query = query.and_column(column.clone(), value.clone());
            }
        }
        query
    }

    /// Requires an attribute to equal a value.
    #[must_use]
    pub fn and(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push(Term::Attribute(attribute.into(), value.into()));
        self
    }

    /// Requires a foreign-key to-one to point at `target` (`None` for NULL).
    #[must_use]
    pub fn and_related(mut self, relationship: impl Into<String>, target: Option<&Identity>) -> Self {
        self.terms.push(Term::Related(relationship.into(), target.cloned()));
        self
    }

    /// Requires a column to equal a value.
    #[must_use]
    pub fn and_column(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push(Term::Column(column.into(), value.into()));
        self
    }

    /// Entity name.
    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    /// Translates the query to table terms.
    ///
    /// # Errors
    ///
    /// Returns a mapping error for unknown entities or properties, and
    /// `InvalidOperation` for a relationship whose key is not stored in
    /// the entity's own row or a target with a temporary identity.
    pub fn to_db_query(&self, resolver: &EntityResolver) -> CoreResult<DbQuery> {
        let entity = resolver.entity(&self.entity)?;
        let mut qualifier = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            match term {
                Term::Attribute(name, value) => {
                    let attr = entity
                        .attribute_named(name)
                        .ok_or_else(|| CoreError::property_not_mapped(&entity.name, name))?;
                    qualifier.push((attr.column.clone(), value.clone()));
                }
                Term::Related(name, target) => {
                    let rel = resolver.relationship(entity, name)?;
                    let db_rel = resolver.fk_relationship(entity, rel).ok_or_else(|| {
                        CoreError::invalid_operation(format!(
                            "{}.{name} cannot be used as a query term",
                            entity.name
                        ))
                    })?;
                    for join in &db_rel.joins {
                        let value = match target {
                            None => Value::Null,
                            Some(target) => target.value(&join.target).cloned().ok_or_else(|| {
                                CoreError::invalid_operation(format!(
                                    "{target} has no committed key to query by"
                                ))
                            })?,
                        };
                        qualifier.push((join.source.clone(), value));
                    }
                }
                Term::Column(column, value) => qualifier.push((column.clone(), value.clone())),
            }
        }
        Ok(DbQuery {
            table: entity.table.clone(),
            qualifier,
        })
    }
}

/// A table query: rows whose columns equal the given values (`Null`
/// matches NULL).
#[derive(Debug, Clone, PartialEq)]
pub struct DbQuery {
    /// Table name.
    pub table: String,
    /// Column equality terms.
    pub qualifier: Vec<(String, Value)>,
}

impl DbQuery {
    /// Creates a query over a table.
    pub fn new(table: impl Into<String>, qualifier: Vec<(String, Value)>) -> Self {
        Self {
            table: table.into(),
            qualifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{ObjEntity, ObjRelationship};
    use ormgraph_storage::{DbEntity, DbRelationship, Schema};
    use std::sync::Arc;

    fn resolver() -> EntityResolver {
        let schema = Schema::new()
            .with_entity(
                DbEntity::new("ARTIST")
                    .pk("ARTIST_ID")
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
                    .relationship(ObjRelationship::to_many("paintingArray", "Painting", "paintingArray")),
                ObjEntity::new("Painting", "PAINTING")
                    .attribute("title", "PAINTING_TITLE")
                    .relationship(ObjRelationship::to_one("toArtist", "Artist", "toArtist")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn attributes_translate_to_columns() {
        let query = SelectQuery::new("Painting").and("title", "Irises");
        let db = query.to_db_query(&resolver()).unwrap();
        assert_eq!(db.table, "PAINTING");
        assert_eq!(db.qualifier, vec![("PAINTING_TITLE".to_string(), Value::from("Irises"))]);
    }

    #[test]
    fn related_targets_translate_to_foreign_keys() {
        let artist = Identity::single("Artist", "ARTIST_ID", 7i64);
        let db = SelectQuery::new("Painting")
            .and_related("toArtist", Some(&artist))
            .to_db_query(&resolver())
            .unwrap();
        assert_eq!(db.qualifier, vec![("ARTIST_ID".to_string(), Value::Integer(7))]);

        let err = SelectQuery::new("Artist")
            .and_related("paintingArray", None)
            .to_db_query(&resolver())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn by_id_uses_key_columns() {
        let id = Identity::single("Painting", "PAINTING_ID", 3i64);
        let db = SelectQuery::by_id(&id).to_db_query(&resolver()).unwrap();
        assert_eq!(db.qualifier, vec![("PAINTING_ID".to_string(), Value::Integer(3))]);
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let err = SelectQuery::new("Painting").and("price", 1i64).to_db_query(&resolver()).unwrap_err();
        assert!(matches!(err, CoreError::PropertyNotMapped { .. }));
    }
}
