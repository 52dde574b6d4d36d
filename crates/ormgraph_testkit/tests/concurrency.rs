//! Contexts used from several threads.

use ormgraph_core::DataObject;
use ormgraph_testkit::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

const THREADS: usize = 4;
const PER_THREAD: usize = 5;

fn artist_keys(stack: &TestStack) -> HashSet<i64> {
    stack
        .node
        .rows("ARTIST")
        .iter()
        .filter_map(|row| match row.get("ARTIST_ID") {
            Some(Value::Integer(id)) => Some(*id),
            _ => None,
        })
        .collect()
}

#[test]
fn separate_contexts_commit_in_parallel() {
    let stack = TestStack::new();
    thread::scope(|scope| {
        for t in 0..THREADS {
            let stack = &stack;
            scope.spawn(move || {
                let context = stack.context();
                for i in 0..PER_THREAD {
                    let artist = context.new_object("Artist").unwrap();
                    context.write_property(artist, "name", format!("artist {t}-{i}")).unwrap();
                }
                context.commit_changes().unwrap();
                assert!(!context.has_changes());
            });
        }
    });

    assert_eq!(stack.node.row_count("ARTIST"), THREADS * PER_THREAD);
    assert_eq!(artist_keys(&stack).len(), THREADS * PER_THREAD);
    assert_eq!(stack.node.open_transactions(), 0);
}

#[test]
fn shared_context_serializes_access() {
    let stack = TestStack::new();
    let context = Arc::new(stack.context());
    thread::scope(|scope| {
        for t in 0..THREADS {
            let context = Arc::clone(&context);
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    let artist = DataObject::new("Artist").with_value("name", format!("artist {t}-{i}"));
                    context.register_new_object(artist).unwrap();
                }
                context.commit_changes().unwrap();
            });
        }
    });

    assert!(!context.has_changes());
    assert_eq!(context.registered_count(), THREADS * PER_THREAD);
    assert_eq!(context.objects_in_state(PersistenceState::Committed).len(), THREADS * PER_THREAD);
    assert_eq!(artist_keys(&stack).len(), THREADS * PER_THREAD);
}

#[test]
fn readers_see_a_writer_commit() {
    let stack = TestStack::new();
    stack.seed_artist(1, "Monet");
    let reader = stack.context();
    let artist = reader.find(&artist_id(1)).unwrap().unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            let writer = stack.context();
            let mine = writer.find(&artist_id(1)).unwrap().unwrap();
            writer.write_property(mine, "name", "Claude Monet").unwrap();
            writer.commit_changes().unwrap();
        });
    });

    assert_eq!(reader.read_property(artist, "name").unwrap(), Value::from("Claude Monet"));
}
