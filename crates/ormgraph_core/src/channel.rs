//! The boundary between a context and the data it is backed by.

use crate::config::Config;
use crate::diff::CompoundDiff;
use crate::error::CoreResult;
use crate::event::SubscriberId;
use crate::identity::Identity;
use crate::iterator::ResultIterator;
use crate::map::EntityResolver;
use crate::object_store::ObjectStore;
use crate::query::{DbQuery, SelectQuery};
use crate::snapshot_cache::SnapshotCache;
use ormgraph_storage::DataRow;
use std::sync::Arc;

/// Outcome of a successful commit.
#[derive(Debug, Clone, Default)]
pub struct CommitResult {
    /// Identity replacements of inserted objects.
    pub diff: CompoundDiff,
    /// Cache versions assigned to the written rows.
    pub versions: Vec<(Identity, u64)>,
}

/// Serves reads and commits for object contexts.
///
/// Implemented by [`DataDomain`](crate::DataDomain). Channels can be
/// stacked: a wrapper that implements this trait and delegates to an
/// inner channel sees every fetch and commit a context performs,
/// including snapshot lookups.
pub trait DataChannel: Send + Sync {
    /// Entity mapping.
    fn resolver(&self) -> &Arc<EntityResolver>;

    /// Shared snapshot cache.
    fn snapshot_cache(&self) -> &Arc<SnapshotCache>;

    /// Configuration.
    fn config(&self) -> &Config;

    /// Fetches rows. Rows of mapped entities come back version-stamped by
    /// the snapshot cache.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the node query fails.
    fn select(&self, source: Option<SubscriberId>, query: &DbQuery) -> CoreResult<Vec<DataRow>>;

    /// Opens a cursor over the rows of a query.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the node query fails.
    fn iterate(&self, query: &DbQuery) -> CoreResult<ResultIterator>;

    /// Writes the pending changes of `store` in one transaction.
    ///
    /// # Errors
    ///
    /// Returns the commit failure; nothing is written in that case.
    fn commit(&self, source: Option<SubscriberId>, store: &ObjectStore) -> CoreResult<CommitResult>;

    /// Drops cached rows and tells peers to forget them.
    fn invalidate(&self, source: Option<SubscriberId>, ids: &[Identity]) {
        self.snapshot_cache()
            .process_snapshot_changes(source, Vec::new(), Vec::new(), ids.to_vec(), Vec::new());
    }

    /// Returns the committed row of an object: the cached snapshot if
    /// present, otherwise fetched through [`select`](Self::select).
    ///
    /// # Errors
    ///
    /// Returns a mapping error for unknown entities, or a storage error.
    fn snapshot(&self, source: Option<SubscriberId>, id: &Identity) -> CoreResult<Option<DataRow>> {
        if let Some(row) = self.snapshot_cache().cached_snapshot(id) {
            return Ok(Some(row));
        }
        if id.is_temporary() {
            return Ok(None);
        }
        let query = SelectQuery::by_id(id).to_db_query(self.resolver())?;
        Ok(self.select(source, &query)?.into_iter().next())
    }
}
