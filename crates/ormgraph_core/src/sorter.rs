//! Dependency ordering of tables and of rows within a reflexive table.
//!
//! A table that holds a foreign key to another table's primary key
//! depends on it: its rows are inserted after and deleted before the
//! target's rows. Required (NOT NULL) foreign keys must form an acyclic
//! graph. A nullable foreign key that would close a cycle is left out of
//! the order. Foreign keys of a table to itself are ordered per row.

use crate::error::{CoreError, CoreResult};
use ormgraph_storage::{DbRelationship, Schema};
use petgraph::algo::{has_path_connecting, kosaraju_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::hash::Hash;

/// Orders tables for inserts and deletes.
#[derive(Debug, Clone)]
pub struct DependencySorter {
    order: Vec<String>,
    rank: HashMap<String, usize>,
    reflexive: HashMap<String, Vec<DbRelationship>>,
}

impl DependencySorter {
    /// Computes the table order of a schema.
    ///
    /// # Errors
    ///
    /// Returns `DependencyCycle` if required foreign keys form a cycle.
    pub fn new(schema: &Schema) -> CoreResult<Self> {
        let mut graph: DiGraph<String, bool> = DiGraph::new();
        let nodes: BTreeMap<&str, NodeIndex> = schema
            .entities()
            .map(|t| (t.name.as_str(), graph.add_node(t.name.clone())))
            .collect();

        let mut reflexive: HashMap<String, Vec<DbRelationship>> = HashMap::new();
        let mut nullable = Vec::new();
        for table in schema.entities() {
            for rel in schema.dependencies(table) {
                if rel.target == table.name {
                    reflexive.entry(table.name.clone()).or_default().push(rel.clone());
                    continue;
                }
                let (Some(&master), Some(&dependent)) =
                    (nodes.get(rel.target.as_str()), nodes.get(table.name.as_str()))
                else {
                    continue;
                };
                let required = rel
                    .source_columns()
                    .all(|c| table.attribute(c).is_some_and(|a| a.mandatory));
                if required {
                    graph.update_edge(master, dependent, true);
                } else {
                    nullable.push((master, dependent));
                }
            }
        }

        if let Some(cycle) = kosaraju_scc(&graph).into_iter().find(|scc| scc.len() > 1) {
            let mut entities: Vec<String> = cycle.iter().map(|n| graph[*n].clone()).collect();
            entities.sort();
            return Err(CoreError::DependencyCycle { entities });
        }

        for (master, dependent) in nullable {
            if has_path_connecting(&graph, dependent, master, None) {
                tracing::debug!(
                    master = %graph[master],
                    dependent = %graph[dependent],
                    "nullable foreign key closes a cycle, leaving it unordered"
                );
                continue;
            }
            graph.update_edge(master, dependent, false);
        }

        let sorted = stable_toposort(&graph).map_err(|cycle| CoreError::DependencyCycle {
            entities: vec![graph[cycle].clone()],
        })?;
        let order: Vec<String> = sorted.into_iter().map(|n| graph[n].clone()).collect();
        let rank = order.iter().enumerate().map(|(i, t)| (t.clone(), i)).collect();

        Ok(Self {
            order,
            rank,
            reflexive,
        })
    }

    /// All tables, masters before dependents.
    pub fn table_order(&self) -> &[String] {
        &self.order
    }

    /// Position of a table in insert order. Unknown tables go last.
    pub fn insert_rank(&self, table: &str) -> usize {
        self.rank.get(table).copied().unwrap_or(usize::MAX)
    }

    /// Sorts tables so masters precede dependents.
    pub fn sort_for_insert(&self, tables: &mut [String]) {
        tables.sort_by_key(|t| self.insert_rank(t));
    }

    /// Sorts tables so dependents precede masters.
    pub fn sort_for_delete(&self, tables: &mut [String]) {
        tables.sort_by_key(|t| std::cmp::Reverse(self.insert_rank(t)));
    }

    /// Returns true if the table has a foreign key to itself.
    pub fn is_reflexive(&self, table: &str) -> bool {
        self.reflexive.contains_key(table)
    }

    /// Foreign keys of a table to itself.
    pub fn reflexive_relationships(&self, table: &str) -> &[DbRelationship] {
        self.reflexive.get(table).map_or(&[], Vec::as_slice)
    }

    /// Orders rows of a reflexive table so parents precede children.
    ///
    /// Each row is given as its key and the keys of its parents; parents
    /// outside the set are ignored. Returns row positions in insert
    /// order. Rows without a pending parent keep their relative order.
    ///
    /// # Errors
    ///
    /// Returns `DependencyCycle` if rows reference each other in a cycle.
    pub fn sort_rows<K>(&self, table: &str, rows: &[(K, Vec<K>)]) -> CoreResult<Vec<usize>>
    where
        K: Hash + Eq,
    {
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(rows.len(), rows.len());
        let nodes: HashMap<&K, NodeIndex> = rows
            .iter()
            .enumerate()
            .map(|(i, (key, _))| (key, graph.add_node(i)))
            .collect();
        for (key, parents) in rows {
            let Some(&child) = nodes.get(key) else {
                continue;
            };
            for parent in parents {
                if let Some(&parent) = nodes.get(parent) {
                    graph.update_edge(parent, child, ());
                }
            }
        }

        let sorted = stable_toposort(&graph).map_err(|_| CoreError::DependencyCycle {
            entities: vec![table.to_string()],
        })?;
        Ok(sorted.into_iter().map(|n| graph[n]).collect())
    }
}

/// Topological order that prefers lower node indices among ready nodes.
///
/// Returns a node left in a cycle if the graph is not acyclic.
fn stable_toposort<N, E>(graph: &DiGraph<N, E>) -> Result<Vec<NodeIndex>, NodeIndex> {
    let mut pending: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|n| pending[n.index()] == 0)
        .map(Reverse)
        .collect();

    let mut sorted = Vec::with_capacity(pending.len());
    while let Some(Reverse(node)) = ready.pop() {
        sorted.push(node);
        for child in graph.neighbors_directed(node, Direction::Outgoing) {
            let count = &mut pending[child.index()];
            *count -= 1;
            if *count == 0 {
                ready.push(Reverse(child));
            }
        }
    }

    if sorted.len() < pending.len() {
        let stuck = graph
            .node_indices()
            .find(|n| pending[n.index()] > 0)
            .unwrap_or_else(|| NodeIndex::new(0));
        return Err(stuck);
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormgraph_storage::DbEntity;

    fn gallery_schema() -> Schema {
        Schema::new()
            .with_entity(
                DbEntity::new("PAINTING")
                    .pk("PAINTING_ID")
                    .column("ARTIST_ID", false)
                    .column("GALLERY_ID", true)
                    .relationship(DbRelationship::to_one("toArtist", "ARTIST", "ARTIST_ID", "ARTIST_ID"))
                    .relationship(DbRelationship::to_one("toGallery", "GALLERY", "GALLERY_ID", "GALLERY_ID")),
            )
            .with_entity(
                DbEntity::new("ARTIST")
                    .pk("ARTIST_ID")
                    .relationship(DbRelationship::to_many("paintingArray", "PAINTING", "ARTIST_ID", "ARTIST_ID")),
            )
            .with_entity(DbEntity::new("GALLERY").pk("GALLERY_ID"))
            .with_entity(
                DbEntity::new("ARTGROUP")
                    .pk("GROUP_ID")
                    .column("PARENT_GROUP_ID", false)
                    .relationship(DbRelationship::to_one("toParent", "ARTGROUP", "PARENT_GROUP_ID", "GROUP_ID")),
            )
    }

    #[test]
    fn masters_precede_dependents() {
        let sorter = DependencySorter::new(&gallery_schema()).unwrap();
        let painting = sorter.insert_rank("PAINTING");
        assert!(sorter.insert_rank("ARTIST") < painting);
        assert!(sorter.insert_rank("GALLERY") < painting);

        let mut tables = vec!["PAINTING".to_string(), "ARTIST".to_string()];
        sorter.sort_for_delete(&mut tables);
        assert_eq!(tables, ["PAINTING", "ARTIST"]);
        sorter.sort_for_insert(&mut tables);
        assert_eq!(tables, ["ARTIST", "PAINTING"]);
    }

    #[test]
    fn reflexive_tables_are_detected() {
        let sorter = DependencySorter::new(&gallery_schema()).unwrap();
        assert!(sorter.is_reflexive("ARTGROUP"));
        assert!(!sorter.is_reflexive("PAINTING"));
        assert_eq!(sorter.reflexive_relationships("ARTGROUP").len(), 1);
    }

    #[test]
    fn required_cycle_is_an_error() {
        let schema = Schema::new()
            .with_entity(
                DbEntity::new("A")
                    .pk("A_ID")
                    .column("B_ID", true)
                    .relationship(DbRelationship::to_one("toB", "B", "B_ID", "B_ID")),
            )
            .with_entity(
                DbEntity::new("B")
                    .pk("B_ID")
                    .column("A_ID", true)
                    .relationship(DbRelationship::to_one("toA", "A", "A_ID", "A_ID")),
            );
        let err = DependencySorter::new(&schema).unwrap_err();
        assert!(matches!(err, CoreError::DependencyCycle { entities } if entities == ["A", "B"]));
    }

    #[test]
    fn nullable_cycle_is_broken() {
        let schema = Schema::new()
            .with_entity(
                DbEntity::new("A")
                    .pk("A_ID")
                    .column("B_ID", true)
                    .relationship(DbRelationship::to_one("toB", "B", "B_ID", "B_ID")),
            )
            .with_entity(
                DbEntity::new("B")
                    .pk("B_ID")
                    .column("A_ID", false)
                    .relationship(DbRelationship::to_one("toA", "A", "A_ID", "A_ID")),
            );
        let sorter = DependencySorter::new(&schema).unwrap();
        assert!(sorter.insert_rank("B") < sorter.insert_rank("A"));
    }

    #[test]
    fn rows_sort_parents_first() {
        let sorter = DependencySorter::new(&gallery_schema()).unwrap();
        let rows = vec![(3, vec![2]), (1, vec![]), (2, vec![1]), (4, vec![99])];
        let order = sorter.sort_rows("ARTGROUP", &rows).unwrap();
        let keys: Vec<i32> = order.iter().map(|&i| rows[i].0).collect();

        let pos = |k: i32| keys.iter().position(|&x| x == k).unwrap();
        assert!(pos(1) < pos(2));
        assert!(pos(2) < pos(3));
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn independent_rows_keep_order() {
        let sorter = DependencySorter::new(&gallery_schema()).unwrap();
        let rows = vec![(1, vec![]), (2, vec![]), (3, vec![])];
        assert_eq!(sorter.sort_rows("ARTGROUP", &rows).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn released_children_follow_row_order() {
        let sorter = DependencySorter::new(&gallery_schema()).unwrap();
        // 30 and 10 both wait on 20; 40 is free from the start.
        let rows = vec![(30, vec![20]), (20, vec![]), (10, vec![20]), (40, vec![])];
        let order = sorter.sort_rows("ARTGROUP", &rows).unwrap();
        assert_eq!(order, vec![1, 0, 2, 3]);
    }

    #[test]
    fn table_order_is_deterministic() {
        let first = DependencySorter::new(&gallery_schema()).unwrap();
        for _ in 0..8 {
            let again = DependencySorter::new(&gallery_schema()).unwrap();
            assert_eq!(again.table_order(), first.table_order());
        }
    }

    #[test]
    fn row_cycle_is_an_error() {
        let sorter = DependencySorter::new(&gallery_schema()).unwrap();
        let rows = vec![(1, vec![2]), (2, vec![1])];
        assert!(matches!(
            sorter.sort_rows("ARTGROUP", &rows),
            Err(CoreError::DependencyCycle { .. })
        ));
    }
}
