//! Snapshot change events broadcast between contexts.

use crate::identity::Identity;
use ormgraph_storage::DataRow;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one listener of a snapshot cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Row-level changes of one commit (or fetch), broadcast to every
/// context sharing the snapshot cache except the one that caused them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEvent {
    /// The subscriber that caused the changes, if any.
    pub source: Option<SubscriberId>,
    /// New row state, with cache versions assigned.
    pub updated: Vec<(Identity, DataRow)>,
    /// Rows that no longer exist.
    pub deleted: Vec<Identity>,
    /// Rows whose cached state was discarded.
    pub invalidated: Vec<Identity>,
    /// Objects whose to-many relationships may now be stale.
    pub indirectly_modified: Vec<Identity>,
}

impl SnapshotEvent {
    /// Returns true if the event carries no changes.
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
            && self.deleted.is_empty()
            && self.invalidated.is_empty()
            && self.indirectly_modified.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormgraph_codec::Value;

    #[test]
    fn snapshot_event_survives_deep_clone() {
        let artist = Identity::single("Artist", "ARTIST_ID", 7i64);
        let row = DataRow::from_pairs([("ARTIST_ID", Value::Integer(7)), ("ARTIST_NAME", Value::from("Monet"))])
            .with_version(4)
            .replacing(2);
        let event = SnapshotEvent {
            source: Some(SubscriberId(3)),
            updated: vec![(artist.clone(), row)],
            deleted: vec![Identity::single("Painting", "PAINTING_ID", 1i64)],
            invalidated: Vec::new(),
            indirectly_modified: vec![artist],
        };

        let copy = ormgraph_codec::deep_clone(&event).unwrap();
        assert_eq!(copy, event);
        assert_eq!(copy.source.map(|s| s.to_string()).as_deref(), Some("sub:3"));
        assert_eq!(copy.updated[0].1.version(), 4);
        assert_eq!(copy.updated[0].1.replaces_version(), 2);
        assert!(!copy.is_empty());
    }
}
