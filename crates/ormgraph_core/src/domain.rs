//! Data domain: the data nodes, mapping and cache shared by contexts.

use crate::channel::{CommitResult, DataChannel};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::event::SubscriberId;
use crate::flush;
use crate::iterator::ResultIterator;
use crate::map::EntityResolver;
use crate::object_store::ObjectStore;
use crate::query::DbQuery;
use crate::snapshot_cache::SnapshotCache;
use crate::sorter::DependencySorter;
use ormgraph_storage::{DataNode, DataRow, TxMode};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// The shared backend of a group of object contexts.
///
/// A domain maps tables to data nodes, orders tables for commits and owns
/// the snapshot cache its contexts share. The first node is the default
/// for tables not assigned elsewhere. The table order is computed on the
/// first commit, so a schema whose required foreign keys form a cycle
/// can still be read.
///
/// # Example
///
/// ```rust
/// use ormgraph_core::{Config, DataDomain, EntityResolver, ObjEntity};
/// use ormgraph_storage::{DbEntity, MemoryDataNode, Schema};
/// use std::sync::Arc;
///
/// let schema = Arc::new(Schema::new().with_entity(
///     DbEntity::new("ARTIST").pk("ARTIST_ID").column("ARTIST_NAME", true),
/// ));
/// let resolver = EntityResolver::new(
///     Arc::clone(&schema),
///     [ObjEntity::new("Artist", "ARTIST").attribute("name", "ARTIST_NAME")],
/// )
/// .unwrap();
/// let node = Arc::new(MemoryDataNode::new("main", schema));
/// let domain = Arc::new(DataDomain::new("domain", Arc::new(resolver), node, Config::default()));
///
/// let context = domain.create_context();
/// let artist = context.new_object("Artist").unwrap();
/// context.write_property(artist, "name", "Monet").unwrap();
/// context.commit_changes().unwrap();
/// ```
pub struct DataDomain {
    name: String,
    resolver: Arc<EntityResolver>,
    nodes: Vec<Arc<dyn DataNode>>,
    node_for_table: HashMap<String, usize>,
    sorter: OnceLock<Result<DependencySorter, Vec<String>>>,
    cache: Arc<SnapshotCache>,
    config: Config,
}

impl DataDomain {
    /// Creates a domain over one default node.
    pub fn new(
        name: impl Into<String>,
        resolver: Arc<EntityResolver>,
        node: Arc<dyn DataNode>,
        config: Config,
    ) -> Self {
        let name = name.into();
        let cache = Arc::new(SnapshotCache::new(
            format!("{name}.snapshots"),
            config.snapshot_cache_size,
            config.notify_peers,
        ));
        tracing::debug!(domain = %name, nodes = 1, "data domain created");
        Self {
            name,
            resolver,
            nodes: vec![node],
            node_for_table: HashMap::new(),
            sorter: OnceLock::new(),
            cache,
            config,
        }
    }

    /// Adds a node serving the given tables.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotMapped` for a table missing from the schema.
    pub fn with_node<I, S>(mut self, node: Arc<dyn DataNode>, tables: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = self.nodes.len();
        self.nodes.push(node);
        for table in tables {
            let table = table.into();
            if self.resolver.schema().entity(&table).is_none() {
                return Err(CoreError::entity_not_mapped(table));
            }
            self.node_for_table.insert(table, index);
        }
        Ok(self)
    }

    /// Domain name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table dependency order, computed on first use.
    ///
    /// # Errors
    ///
    /// Returns `DependencyCycle` if the schema's required foreign keys
    /// form a cycle.
    pub fn sorter(&self) -> CoreResult<&DependencySorter> {
        let sorter = self.sorter.get_or_init(|| {
            let sorted = DependencySorter::new(self.resolver.schema());
            match &sorted {
                Ok(sorter) => tracing::debug!(domain = %self.name, tables = ?sorter.table_order(), "tables sorted"),
                Err(err) => tracing::warn!(domain = %self.name, %err, "tables cannot be sorted"),
            }
            sorted.map_err(|err| match err {
                CoreError::DependencyCycle { entities } => entities,
                other => vec![other.to_string()],
            })
        });
        sorter.as_ref().map_err(|entities| CoreError::DependencyCycle {
            entities: entities.clone(),
        })
    }

    /// All nodes; the first is the default.
    pub fn nodes(&self) -> &[Arc<dyn DataNode>] {
        &self.nodes
    }

    /// Position of the node serving a table.
    pub fn node_index(&self, table: &str) -> usize {
        self.node_for_table.get(table).copied().unwrap_or(0)
    }

    /// The node serving a table.
    pub fn node_for_table(&self, table: &str) -> &Arc<dyn DataNode> {
        &self.nodes[self.node_index(table).min(self.nodes.len() - 1)]
    }

    fn stamp(&self, source: Option<SubscriberId>, table: &str, rows: Vec<DataRow>) -> Vec<DataRow> {
        let Some(entity) = self.resolver.entity_for_table(table) else {
            return rows;
        };
        let mut keyed = Vec::with_capacity(rows.len());
        let mut unkeyed = Vec::new();
        for row in rows {
            match self.resolver.identity_for_row(entity, &row) {
                Some(id) => keyed.push((id, row)),
                None => unkeyed.push(row),
            }
        }
        let mut stamped = self.cache.rows_fetched(source, keyed);
        stamped.extend(unkeyed);
        stamped
    }
}

impl DataChannel for DataDomain {
    fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    fn snapshot_cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn select(&self, source: Option<SubscriberId>, query: &DbQuery) -> CoreResult<Vec<DataRow>> {
        let node = self.node_for_table(&query.table);
        let tx = node.begin(TxMode::ReadOnly)?;
        let rows = match node.select(tx, &query.table, &query.qualifier) {
            Ok(rows) => rows,
            Err(err) => {
                let _ = node.rollback(tx);
                return Err(err.into());
            }
        };
        node.commit(tx)?;
        tracing::trace!(table = %query.table, rows = rows.len(), "selected");
        Ok(self.stamp(source, &query.table, rows))
    }

    fn iterate(&self, query: &DbQuery) -> CoreResult<ResultIterator> {
        let node = self.node_for_table(&query.table);
        let tx = node.begin(TxMode::ReadOnly)?;
        match node.select(tx, &query.table, &query.qualifier) {
            Ok(rows) => Ok(ResultIterator::new(Arc::clone(node), tx, rows)),
            Err(err) => {
                let _ = node.rollback(tx);
                Err(err.into())
            }
        }
    }

    fn commit(&self, source: Option<SubscriberId>, store: &ObjectStore) -> CoreResult<CommitResult> {
        flush::commit(self, source, store)
    }
}

impl std::fmt::Debug for DataDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataDomain")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
