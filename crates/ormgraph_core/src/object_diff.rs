//! Per-object change accumulation.

use crate::diff::GraphDiff;
use crate::identity::Identity;
use crate::map::ObjEntity;
use crate::object::{DataObject, ObjectArena, ObjectRef, PersistenceState};
use ormgraph_codec::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Direction of a relationship change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArcOp {
    /// The arc was added.
    Create,
    /// The arc was removed.
    Delete,
}

/// Changes of one object since its last commit.
///
/// Holds the committed values the object had when it was first changed,
/// so the commit can tell real changes from phantom ones and qualify
/// optimistic updates, plus the ordered graph diffs recorded against it.
#[derive(Debug, Clone)]
pub struct ObjectDiff {
    object: ObjectRef,
    node_id: Identity,
    snapshot_version: u64,
    snapshot: BTreeMap<String, Value>,
    arc_snapshot: BTreeMap<String, Option<Identity>>,
    ops: Vec<(u64, GraphDiff)>,
}

impl ObjectDiff {
    pub(crate) fn new(
        object: ObjectRef,
        node_id: Identity,
        snapshot_version: u64,
        snapshot: BTreeMap<String, Value>,
        arc_snapshot: BTreeMap<String, Option<Identity>>,
    ) -> Self {
        Self {
            object,
            node_id,
            snapshot_version,
            snapshot,
            arc_snapshot,
            ops: Vec::new(),
        }
    }

    /// Handle of the changed object.
    pub fn object(&self) -> ObjectRef {
        self.object
    }

    /// Identity of the changed object.
    pub fn node_id(&self) -> &Identity {
        &self.node_id
    }

    /// Cache version of the row the snapshot was taken from.
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    /// Committed value of an attribute (`Null` for new objects).
    pub fn snapshot_value(&self, attribute: &str) -> &Value {
        self.snapshot.get(attribute).unwrap_or(&Value::Null)
    }

    /// Committed target of a foreign-key to-one, if recorded.
    pub fn arc_snapshot(&self, relationship: &str) -> Option<&Option<Identity>> {
        self.arc_snapshot.get(relationship)
    }

    /// Recorded diffs with their ids, in recording order.
    pub fn changes(&self) -> impl Iterator<Item = (u64, &GraphDiff)> {
        self.ops.iter().map(|(id, d)| (*id, d))
    }

    /// Returns true if a property change was recorded for `property`.
    pub fn has_property_change(&self, property: &str) -> bool {
        self.ops.iter().any(|(_, d)| {
            matches!(d, GraphDiff::NodePropertyChange { property: p, .. } if p == property)
        })
    }

    /// Arc changes recorded for a relationship.
    pub fn arc_changes<'a>(
        &'a self,
        relationship: &'a str,
    ) -> impl Iterator<Item = (ArcOp, &'a Identity)> + 'a {
        self.ops.iter().filter_map(move |(_, d)| match d {
            GraphDiff::ArcCreate { target_id, arc, .. } if arc == relationship => {
                Some((ArcOp::Create, target_id))
            }
            GraphDiff::ArcDelete { target_id, arc, .. } if arc == relationship => {
                Some((ArcOp::Delete, target_id))
            }
            _ => None,
        })
    }

    /// Records a diff.
    ///
    /// Repeated changes of one property collapse into one change from the
    /// first old value to the last new value. An arc change cancels a
    /// pending opposite change of the same arc.
    pub(crate) fn add_diff(&mut self, diff_id: u64, diff: GraphDiff) {
        match diff {
            GraphDiff::NodePropertyChange {
                node_id,
                property,
                old,
                new,
            } => {
                let existing = self.ops.iter().position(|(_, d)| {
                    matches!(d, GraphDiff::NodePropertyChange { property: p, .. } if *p == property)
                });
                match existing {
                    Some(index) => {
                        let first_old = match &self.ops[index].1 {
                            GraphDiff::NodePropertyChange { old, .. } => old.clone(),
                            _ => old,
                        };
                        self.ops.remove(index);
                        self.ops.push((
                            diff_id,
                            GraphDiff::NodePropertyChange {
                                node_id,
                                property,
                                old: first_old,
                                new,
                            },
                        ));
                    }
                    None => self.ops.push((
                        diff_id,
                        GraphDiff::NodePropertyChange {
                            node_id,
                            property,
                            old,
                            new,
                        },
                    )),
                }
            }
            GraphDiff::ArcCreate {
                node_id,
                target_id,
                arc,
            } => {
                if !self.cancel_arc(ArcOp::Delete, &target_id, &arc) {
                    self.ops.push((
                        diff_id,
                        GraphDiff::ArcCreate {
                            node_id,
                            target_id,
                            arc,
                        },
                    ));
                }
            }
            GraphDiff::ArcDelete {
                node_id,
                target_id,
                arc,
            } => {
                if !self.cancel_arc(ArcOp::Create, &target_id, &arc) {
                    self.ops.push((
                        diff_id,
                        GraphDiff::ArcDelete {
                            node_id,
                            target_id,
                            arc,
                        },
                    ));
                }
            }
            other => self.ops.push((diff_id, other)),
        }
    }

    fn cancel_arc(&mut self, op: ArcOp, target: &Identity, relationship: &str) -> bool {
        let position = self.ops.iter().position(|(_, d)| match (op, d) {
            (ArcOp::Create, GraphDiff::ArcCreate { target_id, arc, .. })
            | (ArcOp::Delete, GraphDiff::ArcDelete { target_id, arc, .. }) => {
                target_id == target && arc == relationship
            }
            _ => false,
        });
        match position {
            Some(index) => {
                self.ops.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns true if committing the object would change no column and
    /// no join row.
    ///
    /// `flattened` reports whether a relationship goes through a join
    /// table.
    pub(crate) fn is_noop(
        &self,
        object: &DataObject,
        entity: &ObjEntity,
        arena: &ObjectArena,
        flattened: impl Fn(&str) -> bool,
    ) -> bool {
        if object.state() != PersistenceState::Modified {
            return false;
        }
        let flattened_change = self.ops.iter().any(|(_, d)| match d {
            GraphDiff::ArcCreate { arc, .. } | GraphDiff::ArcDelete { arc, .. } => flattened(arc),
            _ => false,
        });
        if flattened_change {
            return false;
        }
        let attribute_change = entity
            .attributes
            .iter()
            .any(|a| object.value(&a.name) != self.snapshot_value(&a.name));
        if attribute_change {
            return false;
        }
        !self.arc_snapshot.iter().any(|(rel, committed)| {
            arena
                .to_one_identity(object, rel)
                .is_some_and(|current| current != *committed)
        })
    }

    /// Replaces the committed value of an attribute.
    pub(crate) fn merge_snapshot_value(&mut self, attribute: &str, value: Value) {
        self.snapshot.insert(attribute.to_string(), value);
    }

    /// Replaces the committed target of a foreign-key to-one.
    pub(crate) fn merge_arc_snapshot(&mut self, relationship: &str, target: Option<Identity>) {
        self.arc_snapshot.insert(relationship.to_string(), target);
    }

    pub(crate) fn set_snapshot_version(&mut self, version: u64) {
        self.snapshot_version = version;
    }

    pub(crate) fn set_node_id(&mut self, node_id: Identity) {
        self.node_id = node_id;
    }
}

/// Identifies one join-table row of a flattened relationship.
///
/// The key is direction independent: the arc `a.rel -> b` and the arc
/// `b.reverse -> a` of the mirrored relationship are the same key.
#[derive(Debug, Clone)]
pub struct FlattenedArcKey {
    /// Source object.
    pub source: Identity,
    /// Relationship on the source entity.
    pub relationship: String,
    /// Target object.
    pub target: Identity,
    /// Mirrored relationship on the target entity, if mapped.
    pub reverse: Option<String>,
}

impl FlattenedArcKey {
    /// Creates a key.
    pub fn new(
        source: Identity,
        relationship: impl Into<String>,
        target: Identity,
        reverse: Option<String>,
    ) -> Self {
        Self {
            source,
            relationship: relationship.into(),
            target,
            reverse,
        }
    }

    fn source_end(&self) -> (&Identity, Option<&str>) {
        (&self.source, Some(self.relationship.as_str()))
    }

    fn target_end(&self) -> (&Identity, Option<&str>) {
        (&self.target, self.reverse.as_deref())
    }
}

impl PartialEq for FlattenedArcKey {
    fn eq(&self, other: &Self) -> bool {
        (self.source_end() == other.source_end() && self.target_end() == other.target_end())
            || (self.source_end() == other.target_end() && self.target_end() == other.source_end())
    }
}

impl Eq for FlattenedArcKey {}

impl Hash for FlattenedArcKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        fn end_hash(end: (&Identity, Option<&str>)) -> u64 {
            let mut hasher = DefaultHasher::new();
            end.hash(&mut hasher);
            hasher.finish()
        }
        // commutative combination keeps the hash direction independent
        let combined = end_hash(self.source_end()).wrapping_add(end_hash(self.target_end()));
        state.write_u64(combined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn artist(id: i64) -> Identity {
        Identity::single("Artist", "ARTIST_ID", id)
    }

    fn group(id: i64) -> Identity {
        Identity::single("ArtGroup", "GROUP_ID", id)
    }

    fn diff() -> ObjectDiff {
        ObjectDiff::new(
            ObjectRef::new(0),
            artist(1),
            0,
            BTreeMap::new(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn property_changes_collapse() {
        let mut diff = diff();
        for (id, (old, new)) in [("a", "b"), ("b", "c")].into_iter().enumerate() {
            diff.add_diff(
                id as u64,
                GraphDiff::NodePropertyChange {
                    node_id: artist(1),
                    property: "name".into(),
                    old: Value::from(old),
                    new: Value::from(new),
                },
            );
        }
        let changes: Vec<_> = diff.changes().collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, 1);
        assert!(matches!(
            changes[0].1,
            GraphDiff::NodePropertyChange { old, new, .. }
                if *old == Value::from("a") && *new == Value::from("c")
        ));
    }

    #[test]
    fn opposite_arc_changes_cancel() {
        let mut diff = diff();
        diff.add_diff(
            1,
            GraphDiff::ArcCreate {
                node_id: artist(1),
                target_id: group(2),
                arc: "groupArray".into(),
            },
        );
        diff.add_diff(
            2,
            GraphDiff::ArcDelete {
                node_id: artist(1),
                target_id: group(2),
                arc: "groupArray".into(),
            },
        );
        assert_eq!(diff.changes().count(), 0);
        assert_eq!(diff.arc_changes("groupArray").count(), 0);
    }

    #[test]
    fn flattened_key_is_direction_independent() {
        let forward = FlattenedArcKey::new(artist(1), "groupArray", group(2), Some("artistArray".into()));
        let backward = FlattenedArcKey::new(group(2), "artistArray", artist(1), Some("groupArray".into()));
        assert_eq!(forward, backward);

        let mut set = HashSet::new();
        set.insert(forward);
        assert!(!set.insert(backward));
    }

    #[test]
    fn flattened_keys_differ_by_target() {
        let a = FlattenedArcKey::new(artist(1), "groupArray", group(2), Some("artistArray".into()));
        let b = FlattenedArcKey::new(artist(1), "groupArray", group(3), Some("artistArray".into()));
        assert_ne!(a, b);
    }
}
