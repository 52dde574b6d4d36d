//! Many-to-many relationships through the ARTIST_GROUP join table.

use ormgraph_testkit::prelude::*;

#[test]
fn adding_then_removing_from_the_other_side_cancels_out() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Seurat");
    stack.seed_group(1, "Pointillists", None);
    let context = stack.context();
    let artist = context.find(&artist_id(1)).unwrap().unwrap();
    let group = context.find(&group_id(1)).unwrap().unwrap();

    context.add_to_many(artist, "groupArray", group).unwrap();
    assert_eq!(context.read_to_many(group, "artistArray").unwrap(), vec![artist]);
    context.remove_to_many(group, "artistArray", artist).unwrap();
    assert!(context.read_to_many(artist, "groupArray").unwrap().is_empty());

    context.commit_changes().unwrap();
    assert!(stack.statements().is_empty());
    assert_eq!(stack.node.row_count("ARTIST_GROUP"), 0);
}

#[test]
fn new_member_is_inserted_before_its_join_row() {
    let stack = TestStack::new();
    stack.seed_group(1, "Nabis", None);
    let context = stack.context();
    let group = context.find(&group_id(1)).unwrap().unwrap();
    let artist = context.new_object("Artist").unwrap();
    context.write_property(artist, "name", "Bonnard").unwrap();
    context.add_to_many(artist, "groupArray", group).unwrap();

    context.commit_changes().unwrap();

    assert_eq!(
        stack.statement_summary(),
        vec![
            (StatementKind::Insert, "ARTIST".to_string()),
            (StatementKind::Insert, "ARTIST_GROUP".to_string()),
        ]
    );
    let artist_key = context.identity(artist).unwrap().unwrap();
    let join = &stack.node.rows("ARTIST_GROUP")[0];
    assert_eq!(join.get("ARTIST_ID"), artist_key.value("ARTIST_ID"));
    assert_eq!(join.get("GROUP_ID"), Some(&Value::from(1)));

    let fresh = stack.context();
    let group = fresh.find(&group_id(1)).unwrap().unwrap();
    let members = fresh.read_to_many(group, "artistArray").unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(fresh.read_property(members[0], "name").unwrap(), Value::from("Bonnard"));
}

#[test]
fn removing_a_membership_deletes_the_join_row() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Signac");
    stack.seed_group(1, "Pointillists", None);
    stack.seed_group(2, "Neo-Impressionists", None);
    stack.seed_membership(1, 1);
    stack.seed_membership(1, 2);
    let context = stack.context();
    let artist = context.find(&artist_id(1)).unwrap().unwrap();
    let groups = context.read_to_many(artist, "groupArray").unwrap();
    assert_eq!(groups.len(), 2);

    let first = context.find(&group_id(1)).unwrap().unwrap();
    context.remove_to_many(artist, "groupArray", first).unwrap();
    context.commit_changes().unwrap();

    assert_eq!(stack.statements_for("ARTIST_GROUP"), vec![StatementKind::Delete]);
    assert!(stack.statements_for("ARTIST").is_empty());
    let remaining = stack.node.rows("ARTIST_GROUP");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get("GROUP_ID"), Some(&Value::from(2)));
}

#[test]
fn deleting_a_member_removes_its_join_rows_first() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Vuillard");
    stack.seed_group(1, "Nabis", None);
    stack.seed_membership(1, 1);
    let context = stack.context();
    let artist = context.find(&artist_id(1)).unwrap().unwrap();
    let group = context.find(&group_id(1)).unwrap().unwrap();

    context.delete_object(artist).unwrap();
    assert!(context.read_to_many(group, "artistArray").unwrap().is_empty());
    context.commit_changes().unwrap();

    assert_eq!(
        stack.statement_summary(),
        vec![
            (StatementKind::Delete, "ARTIST_GROUP".to_string()),
            (StatementKind::Delete, "ARTIST".to_string()),
        ]
    );
    assert_eq!(stack.node.row_count("ARTGROUP"), 1);
}
