//! Delete rules applied on delete and their commit statements.

use ormgraph_core::GraphDiff;
use ormgraph_storage::DataRow;
use ormgraph_testkit::prelude::*;

fn node_deletes(context: &ObjectContext) -> usize {
    context
        .get_changes()
        .diffs()
        .iter()
        .filter(|diff| matches!(diff, GraphDiff::NodeDelete { .. }))
        .count()
}

#[test]
fn deny_refuses_the_whole_delete() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Monet");
    stack.seed_painting(10, "Poppies", 1, None);
    let context = stack.context();
    let artist = context.find(&artist_id(1)).unwrap().unwrap();
    let painting = context.find(&painting_id(10)).unwrap().unwrap();

    let err = context.delete_object(artist).unwrap_err();
    match &err {
        CoreError::DeleteDenied { relationship, identity, .. } => {
            assert_eq!(relationship, "paintingArray");
            assert_eq!(identity, &artist_id(1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_recoverable());
    assert!(!context.has_changes());
    assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Committed);
    assert_eq!(context.persistence_state(painting).unwrap(), PersistenceState::Committed);
    assert_eq!(context.read_to_one(painting, "toArtist").unwrap(), Some(artist));
}

#[test]
fn deleting_dependents_first_allows_deny_master() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Monet");
    stack.seed_painting(10, "Poppies", 1, None);
    let context = stack.context();
    let artist = context.find(&artist_id(1)).unwrap().unwrap();
    let painting = context.find(&painting_id(10)).unwrap().unwrap();

    context.delete_object(painting).unwrap();
    assert!(context.read_to_many(artist, "paintingArray").unwrap().is_empty());
    context.delete_object(artist).unwrap();
    context.commit_changes().unwrap();

    assert_eq!(
        stack.statement_summary(),
        vec![
            (StatementKind::Delete, "PAINTING".to_string()),
            (StatementKind::Delete, "ARTIST".to_string()),
        ]
    );
    assert_eq!(context.registered_count(), 0);
}

#[test]
fn cascade_cycle_deletes_each_object_once() {
    let stack = TestStack::new();
    stack.seed_group(1, "Impressionists", None);
    stack.seed_group(2, "Pointillists", Some(1));
    let context = stack.context();
    let first = context.find(&group_id(1)).unwrap().unwrap();
    let second = context.find(&group_id(2)).unwrap().unwrap();
    context.set_to_one(first, "toParentGroup", Some(second)).unwrap();
    assert_eq!(context.read_to_many(second, "childGroups").unwrap(), vec![first]);
    assert_eq!(context.read_to_many(first, "childGroups").unwrap(), vec![second]);

    context.delete_object(first).unwrap();

    assert_eq!(context.persistence_state(first).unwrap(), PersistenceState::Deleted);
    assert_eq!(context.persistence_state(second).unwrap(), PersistenceState::Deleted);
    assert_eq!(node_deletes(&context), 2);

    context.commit_changes().unwrap();
    assert!(stack
        .statements_for("ARTGROUP")
        .iter()
        .all(|kind| *kind == StatementKind::Delete));
    assert_eq!(stack.node.row_count("ARTGROUP"), 0);
}

#[test]
fn cascade_reaches_dependent_key_rows() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Cezanne");
    stack.seed_painting(10, "Card Players", 1, None);
    stack
        .node
        .seed(
            "PAINTING_INFO",
            DataRow::from_pairs([("PAINTING_ID", Value::from(10)), ("TEXT_REVIEW", Value::from("quiet"))]),
        )
        .unwrap();
    let context = stack.context();
    let painting = context.find(&painting_id(10)).unwrap().unwrap();
    let info = context.read_to_one(painting, "toPaintingInfo").unwrap().unwrap();
    assert_eq!(context.read_property(info, "textReview").unwrap(), Value::from("quiet"));

    context.delete_object(painting).unwrap();
    assert_eq!(context.persistence_state(info).unwrap(), PersistenceState::Deleted);
    context.commit_changes().unwrap();

    assert_eq!(
        stack.statement_summary(),
        vec![
            (StatementKind::Delete, "PAINTING_INFO".to_string()),
            (StatementKind::Delete, "PAINTING".to_string()),
        ]
    );
    assert_eq!(stack.node.row_count("ARTIST"), 1);
}

#[test]
fn deleting_a_deleted_object_is_a_no_op() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Monet");
    let context = stack.context();
    let artist = context.find(&artist_id(1)).unwrap().unwrap();
    context.delete_object(artist).unwrap();
    context.delete_object(artist).unwrap();
    assert_eq!(node_deletes(&context), 1);
    assert!(context.write_property(artist, "name", "x").is_err());
}
