//! Deleting objects and applying delete rules.

use crate::diff::GraphChangeHandler;
use crate::error::{CoreError, CoreResult};
use crate::graph::Graph;
use crate::map::{DeleteRule, EntityResolver, ObjRelationship};
use crate::object::{ObjectRef, PersistenceState};
use std::collections::HashSet;

/// Marks objects for deletion, applying the delete rules of their
/// relationships.
///
/// The objects reachable through Cascade relationships are collected
/// first and checked against Deny rules; a refused delete changes no
/// object state. Relationships with a Nullify rule, and every flattened
/// relationship, are then cleared on both sides. NEW objects are
/// detached, all others become DELETED.
pub(crate) fn delete_objects(graph: &mut Graph<'_>, roots: &[ObjectRef]) -> CoreResult<()> {
    let resolver = graph.resolver();
    let closure = cascade_closure(graph, &resolver, roots)?;
    check_deny(graph, &resolver, &closure)?;

    let members: HashSet<ObjectRef> = closure.iter().copied().collect();
    for &r in &closure {
        unlink(graph, &resolver, r, &members)?;
    }
    // cascaded objects first
    for &r in closure.iter().rev() {
        mark_deleted(graph, r)?;
    }
    tracing::debug!(roots = roots.len(), deleted = closure.len(), "objects deleted");
    Ok(())
}

fn related(graph: &mut Graph<'_>, r: ObjectRef, rel: &ObjRelationship) -> CoreResult<Vec<ObjectRef>> {
    if rel.to_many {
        graph.read_to_many(r, &rel.name)
    } else {
        Ok(graph.read_to_one(r, &rel.name)?.into_iter().collect())
    }
}

fn is_live(graph: &Graph<'_>, r: ObjectRef) -> CoreResult<bool> {
    Ok(!matches!(
        graph.store.object(r)?.state(),
        PersistenceState::Transient | PersistenceState::Deleted
    ))
}

/// Objects to delete, in discovery order. Each object appears once even
/// when cascade relationships form cycles.
fn cascade_closure(
    graph: &mut Graph<'_>,
    resolver: &EntityResolver,
    roots: &[ObjectRef],
) -> CoreResult<Vec<ObjectRef>> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut pending: Vec<ObjectRef> = roots.iter().rev().copied().collect();

    while let Some(r) = pending.pop() {
        if !is_live(graph, r)? || !visited.insert(r) {
            continue;
        }
        order.push(r);
        let entity = resolver.entity(graph.store.object(r)?.entity_name())?;
        for rel in entity
            .relationships
            .iter()
            .filter(|rel| rel.delete_rule == DeleteRule::Cascade)
        {
            let targets = related(graph, r, rel)?;
            pending.extend(targets.into_iter().rev().filter(|t| !visited.contains(t)));
        }
    }
    Ok(order)
}

fn check_deny(graph: &mut Graph<'_>, resolver: &EntityResolver, closure: &[ObjectRef]) -> CoreResult<()> {
    let members: HashSet<ObjectRef> = closure.iter().copied().collect();
    for &r in closure {
        let entity = resolver.entity(graph.store.object(r)?.entity_name())?;
        for rel in entity
            .relationships
            .iter()
            .filter(|rel| rel.delete_rule == DeleteRule::Deny)
        {
            for target in related(graph, r, rel)? {
                if members.contains(&target) || !is_live(graph, target)? {
                    continue;
                }
                let identity = graph.store.identity_of(r)?;
                tracing::debug!(%identity, relationship = %rel.name, "delete denied");
                return Err(CoreError::DeleteDenied {
                    entity: entity.name.clone(),
                    identity,
                    relationship: rel.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn unlink(
    graph: &mut Graph<'_>,
    resolver: &EntityResolver,
    r: ObjectRef,
    members: &HashSet<ObjectRef>,
) -> CoreResult<()> {
    let entity = resolver.entity(graph.store.object(r)?.entity_name())?;
    for rel in &entity.relationships {
        let flattened = rel.is_flattened();
        if rel.delete_rule != DeleteRule::Nullify && !flattened {
            continue;
        }
        if rel.to_many {
            for target in graph.read_to_many(r, &rel.name)? {
                if !flattened && members.contains(&target) {
                    continue;
                }
                graph.remove_to_many(r, &rel.name, target, true)?;
            }
        } else if graph.read_to_one(r, &rel.name)?.is_some() {
            graph.set_to_one(r, &rel.name, None, true)?;
        }
    }
    Ok(())
}

fn mark_deleted(graph: &mut Graph<'_>, r: ObjectRef) -> CoreResult<()> {
    match graph.store.object(r)?.state() {
        PersistenceState::Transient | PersistenceState::Deleted => Ok(()),
        PersistenceState::New => {
            tracing::trace!(object = %r, "detaching new object");
            graph.store.unregister(r);
            Ok(())
        }
        _ => {
            if let Some(id) = graph.will_change(r)? {
                graph.store.node_removed(&id)?;
            }
            graph.store.object_mut(r)?.set_state(PersistenceState::Deleted);
            Ok(())
        }
    }
}
