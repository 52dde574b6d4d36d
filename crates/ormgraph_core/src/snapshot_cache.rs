//! Shared cache of committed row snapshots.
//!
//! Every context attached to a data domain reads committed row state
//! through one [`SnapshotCache`]. Each stored row carries a version
//! counter; a commit that replaces a row states which version it
//! replaces, so a concurrent replacement is detected without comparing
//! row contents.
//!
//! Changes are broadcast as [`SnapshotEvent`]s over `mpsc` channels to
//! every subscriber except the one that caused them. Subscribers drain
//! their channel under their own lock, which keeps the lock order
//! context before cache.

use crate::event::{SnapshotEvent, SubscriberId};
use crate::identity::Identity;
use lru::LruCache;
use ormgraph_storage::{DataRow, DEFAULT_VERSION};
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// A versioned LRU cache of row snapshots keyed by identity.
pub struct SnapshotCache {
    name: String,
    notify_peers: bool,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    rows: LruCache<Identity, DataRow>,
    next_version: u64,
    next_subscriber: u64,
    subscribers: Vec<(SubscriberId, Sender<Arc<SnapshotEvent>>)>,
}

impl CacheInner {
    fn next_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn broadcast(&mut self, event: SnapshotEvent) {
        let event = Arc::new(event);
        let source = event.source;
        self.subscribers.retain(|(id, tx)| {
            if Some(*id) == source {
                return true;
            }
            tx.send(Arc::clone(&event)).is_ok()
        });
    }
}

impl SnapshotCache {
    /// Creates a cache holding at most `capacity` rows.
    pub fn new(name: impl Into<String>, capacity: usize, notify_peers: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            notify_peers,
            inner: Mutex::new(CacheInner {
                rows: LruCache::new(capacity),
                next_version: DEFAULT_VERSION,
                next_subscriber: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a listener.
    ///
    /// The receiver gets every event not caused by this subscriber.
    pub fn subscribe(&self) -> (SubscriberId, Receiver<Arc<SnapshotEvent>>) {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.inner.lock();
        inner.next_subscriber += 1;
        let id = SubscriberId(inner.next_subscriber);
        inner.subscribers.push((id, tx));
        (id, rx)
    }

    /// Removes a listener.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.lock().subscribers.retain(|(s, _)| *s != id);
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Returns the cached row for an identity.
    pub fn cached_snapshot(&self, id: &Identity) -> Option<DataRow> {
        self.inner.lock().rows.get(id).cloned()
    }

    /// Returns the version of the cached row, if cached.
    pub fn version_of(&self, id: &Identity) -> Option<u64> {
        self.inner.lock().rows.peek(id).map(DataRow::version)
    }

    /// Number of cached rows.
    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    /// Returns true if no rows are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached row.
    pub fn clear(&self) {
        self.inner.lock().rows.clear();
    }

    /// Stores rows read from a data node and returns them version-stamped.
    ///
    /// Rows equal to the cached ones keep their cached version. Rows that
    /// differ get a new version and are broadcast as updates.
    pub fn rows_fetched(
        &self,
        source: Option<SubscriberId>,
        rows: Vec<(Identity, DataRow)>,
    ) -> Vec<DataRow> {
        let mut inner = self.inner.lock();
        let mut stamped = Vec::with_capacity(rows.len());
        let mut changed = Vec::new();
        for (id, row) in rows {
            let cached = inner.rows.get(&id).cloned();
            match cached {
                Some(cached) if cached == row => stamped.push(cached),
                previous => {
                    let version = inner.next_version();
                    let row = row.with_version(version);
                    inner.rows.put(id.clone(), row.clone());
                    if previous.is_some() {
                        changed.push((id, row.clone()));
                    }
                    stamped.push(row);
                }
            }
        }
        if self.notify_peers && !changed.is_empty() {
            tracing::debug!(cache = %self.name, rows = changed.len(), "fetched rows differ from cache");
            inner.broadcast(SnapshotEvent {
                source,
                updated: changed,
                ..SnapshotEvent::default()
            });
        }
        stamped
    }

    /// Applies the row changes of a commit and broadcasts them.
    ///
    /// Each updated row states the version it replaces. If the cached row
    /// has a different version, another commit replaced it concurrently:
    /// the entry is forgotten and reported as invalidated instead.
    ///
    /// Returns the versions assigned to the stored rows.
    pub fn process_snapshot_changes(
        &self,
        source: Option<SubscriberId>,
        updated: Vec<(Identity, DataRow)>,
        deleted: Vec<Identity>,
        invalidated: Vec<Identity>,
        indirectly_modified: Vec<Identity>,
    ) -> Vec<(Identity, u64)> {
        let mut inner = self.inner.lock();
        let mut event = SnapshotEvent {
            source,
            updated: Vec::with_capacity(updated.len()),
            deleted,
            invalidated,
            indirectly_modified,
        };
        let mut versions = Vec::with_capacity(updated.len());

        for (id, row) in updated {
            let cached_version = inner.rows.peek(&id).map(DataRow::version);
            if let Some(cached_version) = cached_version {
                if cached_version != row.replaces_version() {
                    tracing::warn!(
                        cache = %self.name,
                        %id,
                        cached_version,
                        replaces = row.replaces_version(),
                        "snapshot replaced concurrently, discarding cached row"
                    );
                    inner.rows.pop(&id);
                    event.invalidated.push(id);
                    continue;
                }
            }
            let version = inner.next_version();
            let row = row.with_version(version);
            inner.rows.put(id.clone(), row.clone());
            versions.push((id.clone(), version));
            event.updated.push((id, row));
        }
        for id in event.deleted.iter().chain(&event.invalidated) {
            inner.rows.pop(id);
        }

        if self.notify_peers && !event.is_empty() {
            tracing::debug!(
                cache = %self.name,
                updated = event.updated.len(),
                deleted = event.deleted.len(),
                invalidated = event.invalidated.len(),
                indirect = event.indirectly_modified.len(),
                "broadcasting snapshot event"
            );
            inner.broadcast(event);
        }
        versions
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("name", &self.name)
            .field("rows", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormgraph_codec::Value;

    fn id(n: i64) -> Identity {
        Identity::single("Artist", "ARTIST_ID", n)
    }

    fn row(name: &str) -> DataRow {
        DataRow::from_pairs([("ARTIST_NAME", Value::from(name))])
    }

    #[test]
    fn fetched_rows_get_versions() {
        let cache = SnapshotCache::new("c", 10, true);
        let stamped = cache.rows_fetched(None, vec![(id(1), row("a"))]);
        assert!(stamped[0].version() > DEFAULT_VERSION);

        let again = cache.rows_fetched(None, vec![(id(1), row("a"))]);
        assert_eq!(again[0].version(), stamped[0].version());

        let changed = cache.rows_fetched(None, vec![(id(1), row("b"))]);
        assert!(changed[0].version() > stamped[0].version());
    }

    #[test]
    fn events_skip_the_originator() {
        let cache = SnapshotCache::new("c", 10, true);
        let (me, my_rx) = cache.subscribe();
        let (_peer, peer_rx) = cache.subscribe();

        cache.process_snapshot_changes(Some(me), vec![(id(1), row("a"))], vec![], vec![], vec![]);

        assert!(my_rx.try_recv().is_err());
        let event = peer_rx.try_recv().unwrap();
        assert_eq!(event.source, Some(me));
        assert_eq!(event.updated.len(), 1);
    }

    #[test]
    fn version_race_invalidates_entry() {
        let cache = SnapshotCache::new("c", 10, true);
        let v1 = cache.rows_fetched(None, vec![(id(1), row("a"))])[0].version();

        // first writer replaces v1
        let assigned =
            cache.process_snapshot_changes(None, vec![(id(1), row("b").replacing(v1))], vec![], vec![], vec![]);
        assert_eq!(assigned.len(), 1);

        // second writer also claims to replace v1
        let (_peer, rx) = cache.subscribe();
        let assigned =
            cache.process_snapshot_changes(None, vec![(id(1), row("c").replacing(v1))], vec![], vec![], vec![]);
        assert!(assigned.is_empty());
        assert!(cache.cached_snapshot(&id(1)).is_none());
        assert_eq!(rx.try_recv().unwrap().invalidated, vec![id(1)]);
    }

    #[test]
    fn deletes_remove_entries() {
        let cache = SnapshotCache::new("c", 10, false);
        cache.rows_fetched(None, vec![(id(1), row("a"))]);
        cache.process_snapshot_changes(None, vec![], vec![id(1)], vec![], vec![]);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_is_bounded() {
        let cache = SnapshotCache::new("c", 2, false);
        cache.rows_fetched(None, (1..=3).map(|n| (id(n), row("x"))).collect());
        assert_eq!(cache.len(), 2);
        assert!(cache.cached_snapshot(&id(1)).is_none());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let cache = SnapshotCache::new("c", 10, true);
        let (_id, rx) = cache.subscribe();
        drop(rx);
        cache.process_snapshot_changes(None, vec![(id(1), row("a"))], vec![], vec![], vec![]);
        assert_eq!(cache.subscriber_count(), 0);
    }
}
