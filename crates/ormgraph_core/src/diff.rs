//! Graph diffs: serializable descriptions of object graph changes.

use crate::error::CoreResult;
use crate::identity::Identity;
use crate::map::EntityResolver;
use ormgraph_codec::Value;
use serde::{Deserialize, Serialize};

/// Receives graph changes, one callback per change kind.
pub trait GraphChangeHandler {
    /// A temporary identity was replaced by a permanent one.
    fn node_id_changed(&mut self, node_id: &Identity, new_id: &Identity) -> CoreResult<()>;

    /// A node was created.
    fn node_created(&mut self, node_id: &Identity) -> CoreResult<()>;

    /// A node was removed.
    fn node_removed(&mut self, node_id: &Identity) -> CoreResult<()>;

    /// A scalar property changed.
    fn node_property_changed(
        &mut self,
        node_id: &Identity,
        property: &str,
        old: &Value,
        new: &Value,
    ) -> CoreResult<()>;

    /// A relationship arc was added.
    fn arc_created(&mut self, node_id: &Identity, target_id: &Identity, arc: &str) -> CoreResult<()>;

    /// A relationship arc was removed.
    fn arc_deleted(&mut self, node_id: &Identity, target_id: &Identity, arc: &str) -> CoreResult<()>;
}

/// One change to an object graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphDiff {
    /// Node creation.
    NodeCreate {
        /// Created node.
        node_id: Identity,
    },
    /// Node deletion.
    NodeDelete {
        /// Deleted node.
        node_id: Identity,
    },
    /// Identity replacement.
    NodeIdChange {
        /// Old identity.
        node_id: Identity,
        /// New identity.
        new_id: Identity,
    },
    /// Scalar property change.
    NodePropertyChange {
        /// Changed node.
        node_id: Identity,
        /// Property name.
        property: String,
        /// Value before the change.
        old: Value,
        /// Value after the change.
        new: Value,
    },
    /// Arc creation.
    ArcCreate {
        /// Source node.
        node_id: Identity,
        /// Target node.
        target_id: Identity,
        /// Relationship name.
        arc: String,
    },
    /// Arc deletion.
    ArcDelete {
        /// Source node.
        node_id: Identity,
        /// Target node.
        target_id: Identity,
        /// Relationship name.
        arc: String,
    },
    /// Several diffs applied in order.
    Compound(CompoundDiff),
}

impl GraphDiff {
    /// Replays the change on a handler.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the handler.
    pub fn apply(&self, handler: &mut dyn GraphChangeHandler) -> CoreResult<()> {
        match self {
            GraphDiff::NodeCreate { node_id } => handler.node_created(node_id),
            GraphDiff::NodeDelete { node_id } => handler.node_removed(node_id),
            GraphDiff::NodeIdChange { node_id, new_id } => handler.node_id_changed(node_id, new_id),
            GraphDiff::NodePropertyChange {
                node_id,
                property,
                old,
                new,
            } => handler.node_property_changed(node_id, property, old, new),
            GraphDiff::ArcCreate {
                node_id,
                target_id,
                arc,
            } => handler.arc_created(node_id, target_id, arc),
            GraphDiff::ArcDelete {
                node_id,
                target_id,
                arc,
            } => handler.arc_deleted(node_id, target_id, arc),
            GraphDiff::Compound(compound) => compound.apply(handler),
        }
    }

    /// Replays the inverse change on a handler.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the handler.
    pub fn undo(&self, handler: &mut dyn GraphChangeHandler) -> CoreResult<()> {
        match self {
            GraphDiff::NodeCreate { node_id } => handler.node_removed(node_id),
            GraphDiff::NodeDelete { node_id } => handler.node_created(node_id),
            GraphDiff::NodeIdChange { node_id, new_id } => handler.node_id_changed(new_id, node_id),
            GraphDiff::NodePropertyChange {
                node_id,
                property,
                old,
                new,
            } => handler.node_property_changed(node_id, property, new, old),
            GraphDiff::ArcCreate {
                node_id,
                target_id,
                arc,
            } => handler.arc_deleted(node_id, target_id, arc),
            GraphDiff::ArcDelete {
                node_id,
                target_id,
                arc,
            } => handler.arc_created(node_id, target_id, arc),
            GraphDiff::Compound(compound) => compound.undo(handler),
        }
    }

    /// Returns true if applying the diff changes nothing.
    pub fn is_noop(&self) -> bool {
        match self {
            GraphDiff::NodePropertyChange { old, new, .. } => old == new,
            GraphDiff::NodeIdChange { node_id, new_id } => node_id == new_id,
            GraphDiff::Compound(compound) => compound.is_noop(),
            _ => false,
        }
    }

    /// The node the diff is about (`None` for compounds).
    pub fn node_id(&self) -> Option<&Identity> {
        match self {
            GraphDiff::NodeCreate { node_id }
            | GraphDiff::NodeDelete { node_id }
            | GraphDiff::NodeIdChange { node_id, .. }
            | GraphDiff::NodePropertyChange { node_id, .. }
            | GraphDiff::ArcCreate { node_id, .. }
            | GraphDiff::ArcDelete { node_id, .. } => Some(node_id),
            GraphDiff::Compound(_) => None,
        }
    }

    fn is_client_visible(&self, resolver: &EntityResolver) -> bool {
        let exposed = |id: &Identity| {
            resolver
                .entity(id.entity_name())
                .is_ok_and(|e| e.client_exposed)
        };
        match self {
            GraphDiff::ArcCreate {
                node_id,
                target_id,
                arc,
            }
            | GraphDiff::ArcDelete {
                node_id,
                target_id,
                arc,
            } => {
                let runtime = resolver
                    .entity(node_id.entity_name())
                    .ok()
                    .and_then(|e| e.relationship_named(arc))
                    .map_or(true, |r| r.runtime);
                exposed(node_id) && exposed(target_id) && !runtime
            }
            GraphDiff::Compound(_) => true,
            other => other.node_id().is_some_and(exposed),
        }
    }
}

/// An ordered list of diffs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompoundDiff {
    diffs: Vec<GraphDiff>,
}

impl CompoundDiff {
    /// Creates an empty compound diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a diff.
    pub fn add(&mut self, diff: GraphDiff) {
        self.diffs.push(diff);
    }

    /// Appends several diffs.
    pub fn add_all(&mut self, diffs: impl IntoIterator<Item = GraphDiff>) {
        self.diffs.extend(diffs);
    }

    /// The diffs, in order.
    pub fn diffs(&self) -> &[GraphDiff] {
        &self.diffs
    }

    /// Number of top-level diffs.
    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    /// Returns true if there are no diffs.
    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// Returns true if every diff is a no-op.
    pub fn is_noop(&self) -> bool {
        self.diffs.iter().all(GraphDiff::is_noop)
    }

    /// Applies every diff in order.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the handler.
    pub fn apply(&self, handler: &mut dyn GraphChangeHandler) -> CoreResult<()> {
        self.diffs.iter().try_for_each(|d| d.apply(handler))
    }

    /// Undoes every diff in reverse order.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the handler.
    pub fn undo(&self, handler: &mut dyn GraphChangeHandler) -> CoreResult<()> {
        self.diffs.iter().rev().try_for_each(|d| d.undo(handler))
    }

    /// Returns a copy without the diffs that must not reach a client:
    /// diffs touching entities that are not client-exposed and arcs over
    /// runtime-only relationships.
    #[must_use]
    pub fn filter_for_client(&self, resolver: &EntityResolver) -> CompoundDiff {
        let diffs = self
            .diffs
            .iter()
            .filter(|d| d.is_client_visible(resolver))
            .map(|d| match d {
                GraphDiff::Compound(inner) => GraphDiff::Compound(inner.filter_for_client(resolver)),
                other => other.clone(),
            })
            .collect();
        CompoundDiff { diffs }
    }
}

impl From<Vec<GraphDiff>> for CompoundDiff {
    fn from(diffs: Vec<GraphDiff>) -> Self {
        Self { diffs }
    }
}

impl IntoIterator for CompoundDiff {
    type Item = GraphDiff;
    type IntoIter = std::vec::IntoIter<GraphDiff>;

    fn into_iter(self) -> Self::IntoIter {
        self.diffs.into_iter()
    }
}
