//! Row snapshots.

use ormgraph_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column name to value map used for primary keys and qualifiers.
pub type KeyMap = BTreeMap<String, Value>;

/// Version assigned to a row that was never stored in a snapshot cache.
pub const DEFAULT_VERSION: u64 = 0;

/// An immutable snapshot of one row: column name to value.
///
/// Rows carry a version counter assigned by the snapshot cache and the
/// version of the cached row they replace. Two rows are equal when their
/// column values are equal; versions are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataRow {
    values: BTreeMap<String, Value>,
    version: u64,
    replaces_version: u64,
}

impl DataRow {
    /// Creates a row from column values.
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            version: DEFAULT_VERSION,
            replaces_version: DEFAULT_VERSION,
        }
    }

    /// Creates a row from `(column, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the value of a column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Returns true if the column is present (possibly NULL).
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// All column values, ordered by column name.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Consumes the row, returning its values.
    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cache version of this row.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version of the cached row this one replaces.
    pub fn replaces_version(&self) -> u64 {
        self.replaces_version
    }

    /// Returns a copy of this row tagged with the given version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Returns a copy of this row declaring which cached version it replaces.
    #[must_use]
    pub fn replacing(mut self, version: u64) -> Self {
        self.replaces_version = version;
        self
    }

    /// Extracts the given columns as a key map.
    ///
    /// Returns `None` if any column is missing or NULL.
    pub fn key<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> Option<KeyMap> {
        let mut key = KeyMap::new();
        for column in columns {
            match self.values.get(column) {
                Some(v) if !v.is_null() => {
                    key.insert(column.to_string(), v.clone());
                }
                _ => return None,
            }
        }
        Some(key)
    }

    /// Columns whose values differ between `self` and `newer`, with the
    /// newer values. Columns missing from `newer` are skipped.
    pub fn diff(&self, newer: &DataRow) -> BTreeMap<String, Value> {
        newer
            .values
            .iter()
            .filter(|(k, v)| self.values.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl PartialEq for DataRow {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for DataRow {}

impl From<BTreeMap<String, Value>> for DataRow {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_versions() {
        let a = DataRow::from_pairs([("A", 1i64)]).with_version(3);
        let b = DataRow::from_pairs([("A", 1i64)]).with_version(9);
        assert_eq!(a, b);
    }

    #[test]
    fn equality_is_numeric_aware() {
        let a = DataRow::from_pairs([("A", Value::Integer(1))]);
        let b = DataRow::from_pairs([("A", Value::Real(1.0))]);
        assert_eq!(a, b);
    }

    #[test]
    fn key_requires_non_null_columns() {
        let row = DataRow::from_pairs([("ID", Value::Integer(5)), ("FK", Value::Null)]);
        assert!(row.key(["ID"]).is_some());
        assert!(row.key(["FK"]).is_none());
        assert!(row.key(["MISSING"]).is_none());
    }

    #[test]
    fn diff_reports_changed_columns() {
        let old = DataRow::from_pairs([("A", 1i64), ("B", 2i64)]);
        let new = DataRow::from_pairs([("A", 1i64), ("B", 3i64)]);
        let diff = old.diff(&new);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.get("B"), Some(&Value::Integer(3)));
    }

    #[test]
    fn deep_clone_keeps_versions() {
        let row = DataRow::from_pairs([("ID", Value::Integer(5)), ("NAME", Value::from("Monet"))])
            .with_version(6)
            .replacing(3);
        let copy = ormgraph_codec::deep_clone(&row).unwrap();
        assert_eq!(copy, row);
        assert_eq!(copy.version(), 6);
        assert_eq!(copy.replaces_version(), 3);
    }
}

