//! The gallery fixture and an in-memory test stack.
//!
//! Tables:
//!
//! | Table | Key | Notes |
//! |-------|-----|-------|
//! | `ARTIST` | generated `ARTIST_ID` | |
//! | `GALLERY` | generated `GALLERY_ID` | |
//! | `PAINTING` | `PAINTING_ID` from the key generator | required `ARTIST_ID`, optional `GALLERY_ID` |
//! | `PAINTING_INFO` | `PAINTING_ID` propagated from its painting | |
//! | `ARTGROUP` | generated `GROUP_ID` | optional self reference `PARENT_GROUP_ID` |
//! | `ARTIST_GROUP` | `(ARTIST_ID, GROUP_ID)` | join table of `Artist.groupArray` |
//!
//! Delete rules: an artist with paintings cannot be deleted, deleting a
//! gallery or artist group nullifies its paintings or parent link,
//! deleting a painting cascades to its review and deleting a group
//! cascades to its child groups. `Painting` is locked optimistically on
//! its title.

use ormgraph_codec::Value;
use ormgraph_core::{
    Config, DataDomain, DeleteRule, EntityResolver, Identity, ObjEntity, ObjRelationship, ObjectContext,
};
use ormgraph_storage::{DataRow, DbEntity, DbRelationship, ExecutedStatement, MemoryDataNode, Schema, StatementKind};
use std::sync::Arc;

/// Returns the relational schema of the fixture.
pub fn schema() -> Schema {
    Schema::new()
        .with_entity(
            DbEntity::new("ARTIST")
                .generated_pk("ARTIST_ID")
                .column("ARTIST_NAME", true)
                .relationship(DbRelationship::to_many("paintingArray", "PAINTING", "ARTIST_ID", "ARTIST_ID"))
                .relationship(DbRelationship::to_many(
                    "artistGroupArray",
                    "ARTIST_GROUP",
                    "ARTIST_ID",
                    "ARTIST_ID",
                )),
        )
        .with_entity(
            DbEntity::new("GALLERY")
                .generated_pk("GALLERY_ID")
                .column("GALLERY_NAME", true)
                .relationship(DbRelationship::to_many("paintingArray", "PAINTING", "GALLERY_ID", "GALLERY_ID")),
        )
        .with_entity(
            DbEntity::new("PAINTING")
                .pk("PAINTING_ID")
                .column("PAINTING_TITLE", true)
                .column("ESTIMATED_PRICE", false)
                .column("ARTIST_ID", true)
                .column("GALLERY_ID", false)
                .relationship(DbRelationship::to_one("toArtist", "ARTIST", "ARTIST_ID", "ARTIST_ID"))
                .relationship(DbRelationship::to_one("toGallery", "GALLERY", "GALLERY_ID", "GALLERY_ID"))
                .relationship(
                    DbRelationship::to_one("toPaintingInfo", "PAINTING_INFO", "PAINTING_ID", "PAINTING_ID")
                        .dependent_pk(),
                ),
        )
        .with_entity(
            DbEntity::new("PAINTING_INFO")
                .pk("PAINTING_ID")
                .column("TEXT_REVIEW", false)
                .relationship(DbRelationship::to_one("painting", "PAINTING", "PAINTING_ID", "PAINTING_ID")),
        )
        .with_entity(
            DbEntity::new("ARTGROUP")
                .generated_pk("GROUP_ID")
                .column("NAME", true)
                .column("PARENT_GROUP_ID", false)
                .relationship(DbRelationship::to_one("toParentGroup", "ARTGROUP", "PARENT_GROUP_ID", "GROUP_ID"))
                .relationship(DbRelationship::to_many("childGroups", "ARTGROUP", "GROUP_ID", "PARENT_GROUP_ID"))
                .relationship(DbRelationship::to_many(
                    "artistGroupArray",
                    "ARTIST_GROUP",
                    "GROUP_ID",
                    "GROUP_ID",
                )),
        )
        .with_entity(
            DbEntity::new("ARTIST_GROUP")
                .pk("ARTIST_ID")
                .pk("GROUP_ID")
                .relationship(DbRelationship::to_one("toArtist", "ARTIST", "ARTIST_ID", "ARTIST_ID"))
                .relationship(DbRelationship::to_one("toGroup", "ARTGROUP", "GROUP_ID", "GROUP_ID")),
        )
}

/// Returns the object entities of the fixture.
pub fn entities() -> Vec<ObjEntity> {
    vec![
        ObjEntity::new("Artist", "ARTIST")
            .attribute("name", "ARTIST_NAME")
            .relationship(
                ObjRelationship::to_many("paintingArray", "Painting", "paintingArray").delete_rule(DeleteRule::Deny),
            )
            .relationship(ObjRelationship::flattened("groupArray", "ArtGroup", "artistGroupArray", "toGroup")),
        ObjEntity::new("Gallery", "GALLERY")
            .attribute("name", "GALLERY_NAME")
            .relationship(
                ObjRelationship::to_many("paintingArray", "Painting", "paintingArray")
                    .delete_rule(DeleteRule::Nullify),
            ),
        ObjEntity::new("Painting", "PAINTING")
            .locked_attribute("title", "PAINTING_TITLE")
            .attribute("estimatedPrice", "ESTIMATED_PRICE")
            .relationship(ObjRelationship::to_one("toArtist", "Artist", "toArtist").delete_rule(DeleteRule::Nullify))
            .relationship(
                ObjRelationship::to_one("toGallery", "Gallery", "toGallery").delete_rule(DeleteRule::Nullify),
            )
            .relationship(
                ObjRelationship::to_one("toPaintingInfo", "PaintingInfo", "toPaintingInfo")
                    .delete_rule(DeleteRule::Cascade),
            )
            .optimistic(),
        ObjEntity::new("PaintingInfo", "PAINTING_INFO")
            .attribute("textReview", "TEXT_REVIEW")
            .relationship(ObjRelationship::to_one("painting", "Painting", "painting")),
        ObjEntity::new("ArtGroup", "ARTGROUP")
            .attribute("name", "NAME")
            .relationship(
                ObjRelationship::to_one("toParentGroup", "ArtGroup", "toParentGroup")
                    .delete_rule(DeleteRule::Nullify),
            )
            .relationship(
                ObjRelationship::to_many("childGroups", "ArtGroup", "childGroups").delete_rule(DeleteRule::Cascade),
            )
            .relationship(ObjRelationship::flattened("artistArray", "Artist", "artistGroupArray", "toArtist")),
    ]
}

/// Returns a resolver over the fixture schema and entities.
pub fn resolver() -> Arc<EntityResolver> {
    Arc::new(EntityResolver::new(Arc::new(schema()), entities()).expect("fixture mapping is valid"))
}

/// Identity of an `Artist` row.
pub fn artist_id(id: i64) -> Identity {
    Identity::single("Artist", "ARTIST_ID", id)
}

/// Identity of a `Gallery` row.
pub fn gallery_id(id: i64) -> Identity {
    Identity::single("Gallery", "GALLERY_ID", id)
}

/// Identity of a `Painting` row.
pub fn painting_id(id: i64) -> Identity {
    Identity::single("Painting", "PAINTING_ID", id)
}

/// Identity of an `ArtGroup` row.
pub fn group_id(id: i64) -> Identity {
    Identity::single("ArtGroup", "GROUP_ID", id)
}

/// An in-memory node and a data domain over the fixture.
pub struct TestStack {
    /// The node holding the tables.
    pub node: Arc<MemoryDataNode>,
    /// The domain contexts are created from.
    pub domain: Arc<DataDomain>,
}

impl TestStack {
    /// Creates a stack with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a stack with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let resolver = resolver();
        let node = Arc::new(MemoryDataNode::new("gallery", Arc::clone(resolver.schema())));
        let domain = DataDomain::new("gallery", resolver, node.clone(), config);
        Self {
            node,
            domain: Arc::new(domain),
        }
    }

    /// Creates a new context over the domain.
    pub fn context(&self) -> ObjectContext {
        self.domain.create_context()
    }

    /// Statements executed since the last [`clear_statements`](Self::clear_statements).
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.node.statement_log()
    }

    /// Kinds of the statements executed against one table, in order.
    pub fn statements_for(&self, table: &str) -> Vec<StatementKind> {
        self.statements()
            .into_iter()
            .filter(|s| s.table == table)
            .map(|s| s.kind)
            .collect()
    }

    /// Tables and kinds of all executed statements, in order.
    pub fn statement_summary(&self) -> Vec<(StatementKind, String)> {
        self.statements().into_iter().map(|s| (s.kind, s.table)).collect()
    }

    /// Clears the statement log.
    pub fn clear_statements(&self) {
        self.node.clear_statement_log();
    }

    fn seed(&self, table: &str, pairs: Vec<(&str, Value)>) {
        self.node
            .seed(table, DataRow::from_pairs(pairs))
            .unwrap_or_else(|err| panic!("failed to seed {table}: {err}"));
    }

    /// Seeds an artist row.
    pub fn seed_artist(&self, id: i64, name: &str) -> Identity {
        self.seed("ARTIST", vec![("ARTIST_ID", Value::from(id)), ("ARTIST_NAME", Value::from(name))]);
        artist_id(id)
    }

    /// Seeds a gallery row.
    pub fn seed_gallery(&self, id: i64, name: &str) -> Identity {
        self.seed("GALLERY", vec![("GALLERY_ID", Value::from(id)), ("GALLERY_NAME", Value::from(name))]);
        gallery_id(id)
    }

    /// Seeds a painting row.
    pub fn seed_painting(&self, id: i64, title: &str, artist: i64, gallery: Option<i64>) -> Identity {
        self.seed(
            "PAINTING",
            vec![
                ("PAINTING_ID", Value::from(id)),
                ("PAINTING_TITLE", Value::from(title)),
                ("ARTIST_ID", Value::from(artist)),
                ("GALLERY_ID", gallery.map_or(Value::Null, Value::from)),
            ],
        );
        painting_id(id)
    }

    /// Seeds an artist group row.
    pub fn seed_group(&self, id: i64, name: &str, parent: Option<i64>) -> Identity {
        self.seed(
            "ARTGROUP",
            vec![
                ("GROUP_ID", Value::from(id)),
                ("NAME", Value::from(name)),
                ("PARENT_GROUP_ID", parent.map_or(Value::Null, Value::from)),
            ],
        );
        group_id(id)
    }

    /// Seeds a membership of an artist in a group.
    pub fn seed_membership(&self, artist: i64, group: i64) {
        self.seed(
            "ARTIST_GROUP",
            vec![("ARTIST_ID", Value::from(artist)), ("GROUP_ID", Value::from(group))],
        );
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a context over a fresh stack.
///
/// # Example
///
/// ```rust
/// use ormgraph_testkit::with_context;
///
/// with_context(|stack, context| {
///     let artist = context.new_object("Artist").unwrap();
///     context.write_property(artist, "name", "Monet").unwrap();
///     context.commit_changes().unwrap();
///     assert_eq!(stack.node.row_count("ARTIST"), 1);
/// });
/// ```
pub fn with_context<F, R>(f: F) -> R
where
    F: FnOnce(&TestStack, &ObjectContext) -> R,
{
    let stack = TestStack::new();
    let context = stack.context();
    f(&stack, &context)
}
