//! End-to-end scenarios over the gallery fixture.

use ormgraph_testkit::prelude::*;

#[test]
fn new_artist_with_painting_round_trips() {
    let stack = TestStack::new();
    let context = stack.context();
    let artist = context.new_object("Artist").unwrap();
    context.write_property(artist, "name", "Monet").unwrap();
    let painting = context.new_object("Painting").unwrap();
    context.write_property(painting, "title", "Impression, Sunrise").unwrap();
    context.add_to_many(artist, "paintingArray", painting).unwrap();

    assert_eq!(context.read_to_one(painting, "toArtist").unwrap(), Some(artist));
    assert!(context.read_to_many(artist, "paintingArray").unwrap().contains(&painting));

    context.commit_changes().unwrap();

    let painting_key = context.identity(painting).unwrap().unwrap();
    assert!(!painting_key.is_temporary());

    let fresh = stack.context();
    let fetched = fresh.find(&painting_key).unwrap().unwrap();
    let fetched_artist = fresh.read_to_one(fetched, "toArtist").unwrap().unwrap();
    assert_eq!(fresh.persistence_state(fetched_artist).unwrap(), PersistenceState::Hollow);
    assert_eq!(fresh.read_property(fetched_artist, "name").unwrap(), Value::from("Monet"));
}

#[test]
fn temporary_ids_are_replaced_everywhere() {
    let stack = TestStack::new();
    let context = stack.context();
    let artist = context.new_object("Artist").unwrap();
    context.write_property(artist, "name", "Renoir").unwrap();
    let painting = context.new_object("Painting").unwrap();
    context.write_property(painting, "title", "Luncheon").unwrap();
    context.set_to_one(painting, "toArtist", Some(artist)).unwrap();
    let temporary = context.identity(artist).unwrap().unwrap();
    assert!(temporary.is_temporary());

    context.commit_changes().unwrap();

    let permanent = context.identity(artist).unwrap().unwrap();
    assert!(!permanent.is_temporary());
    assert_eq!(context.local_object(&permanent).unwrap(), artist);
    assert!(context.find(&temporary).unwrap().is_none());

    let referenced = context.read_to_one(painting, "toArtist").unwrap().unwrap();
    assert_eq!(context.identity(referenced).unwrap(), Some(permanent.clone()));

    let other = stack.context();
    let found = other.select(&SelectQuery::by_id(&permanent)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(other.read_property(found[0], "name").unwrap(), Value::from("Renoir"));
}

#[test]
fn writing_current_values_issues_no_statements() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Degas");
    let context = stack.context();
    let artist = context.find(&artist_id(1)).unwrap().unwrap();

    context.write_property(artist, "name", "Degas").unwrap();
    context.commit_changes().unwrap();
    assert!(stack.statements().is_empty());
    assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Committed);

    context.write_property(artist, "name", "Manet").unwrap();
    context.write_property(artist, "name", "Degas").unwrap();
    assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Modified);
    context.commit_changes().unwrap();
    assert!(stack.statements().is_empty());
    assert!(!context.has_changes());
}

#[test]
fn deleting_gallery_nullifies_its_paintings() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Monet");
    stack.seed_gallery(1, "Orsay");
    stack.seed_painting(10, "Poppies", 1, Some(1));
    stack.seed_painting(11, "Haystacks", 1, Some(1));
    stack.seed_painting(12, "Water Lilies", 1, None);
    let context = stack.context();
    let gallery = context.find(&gallery_id(1)).unwrap().unwrap();
    let paintings = context.read_to_many(gallery, "paintingArray").unwrap();
    assert_eq!(paintings.len(), 2);

    context.delete_object(gallery).unwrap();
    for &painting in &paintings {
        assert_eq!(context.read_to_one(painting, "toGallery").unwrap(), None);
        assert_eq!(context.persistence_state(painting).unwrap(), PersistenceState::Modified);
    }
    context.commit_changes().unwrap();

    let updates: Vec<_> = stack.statements().into_iter().filter(|s| s.table == "PAINTING").collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].kind, StatementKind::Update);
    assert_eq!(updates[0].rows, 2);
    assert_eq!(stack.statements_for("GALLERY"), vec![StatementKind::Delete]);
    assert_eq!(stack.node.row_count("PAINTING"), 3);
    assert!(stack
        .node
        .rows("PAINTING")
        .iter()
        .all(|row| row.get("GALLERY_ID") == Some(&Value::Null)));

    for &painting in &paintings {
        assert_eq!(context.persistence_state(painting).unwrap(), PersistenceState::Committed);
        assert_eq!(context.read_to_one(painting, "toGallery").unwrap(), None);
    }
    let fresh = stack.context();
    let painting = fresh.find(&painting_id(10)).unwrap().unwrap();
    assert_eq!(fresh.read_to_one(painting, "toGallery").unwrap(), None);
}

#[test]
fn rollback_restores_the_committed_graph() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Monet");
    stack.seed_painting(10, "Poppies", 1, None);
    let context = stack.context();
    let artist = context.find(&artist_id(1)).unwrap().unwrap();
    let painting = context.find(&painting_id(10)).unwrap().unwrap();

    context.write_property(artist, "name", "Claude Monet").unwrap();
    context.delete_object(painting).unwrap();
    let fresh = context.new_object("Artist").unwrap();
    assert_eq!(context.objects_in_state(PersistenceState::Deleted), vec![painting]);

    context.rollback_changes();

    assert!(!context.has_changes());
    assert_eq!(context.persistence_state(fresh).unwrap(), PersistenceState::Transient);
    assert_eq!(context.persistence_state(painting).unwrap(), PersistenceState::Hollow);
    assert_eq!(context.read_property(artist, "name").unwrap(), Value::from("Monet"));
    assert_eq!(context.read_to_one(painting, "toArtist").unwrap(), Some(artist));
    assert!(stack.statements().is_empty());
}

#[test]
fn detached_objects_register_with_their_values() {
    let stack = TestStack::new();
    let context = stack.context();
    let artist = context
        .register_new_object(ormgraph_core::DataObject::new("Artist").with_value("name", "Sisley"))
        .unwrap();
    assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::New);
    context.commit_changes().unwrap();
    assert_eq!(stack.node.rows("ARTIST")[0].get("ARTIST_NAME"), Some(&Value::from("Sisley")));

    let unknown = ormgraph_core::DataObject::new("Artist").with_value("nickname", "x");
    assert!(matches!(
        context.register_new_object(unknown),
        Err(CoreError::PropertyNotMapped { .. })
    ));
}

#[test]
fn iterator_streams_rows_until_closed() {
    let stack = TestStack::new();
    for id in 1..=3 {
        stack.seed_artist(id, &format!("artist {id}"));
    }
    let context = stack.context();
    let mut rows = context.iterate(&SelectQuery::new("Artist")).unwrap();
    assert_eq!(stack.node.open_transactions(), 1);
    assert_eq!(rows.next_rows(2).unwrap().len(), 2);
    assert!(rows.has_next());
    rows.close().unwrap();
    assert_eq!(stack.node.open_transactions(), 0);
    assert!(matches!(rows.next_row(), Err(CoreError::IteratorClosed)));
}
