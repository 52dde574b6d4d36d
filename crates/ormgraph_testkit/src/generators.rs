//! Property-based test generators using proptest.
//!
//! Provides strategies for key values, identities and small object
//! graphs of the gallery fixture.

use ormgraph_codec::Value;
use proptest::prelude::*;

/// Strategy for scalar values usable as key columns.
pub fn key_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9]{0,12}".prop_map(Value::Text),
        any::<bool>().prop_map(Value::Bool),
    ]
}

/// Strategy for an integer together with the same number as a real, for
/// numbers a 64-bit float represents exactly.
pub fn numeric_twin_strategy() -> impl Strategy<Value = (Value, Value)> {
    (-(1i64 << 52)..(1i64 << 52)).prop_map(|n| (Value::Integer(n), Value::Real(n as f64)))
}

/// Strategy for composite keys: distinct column names with values.
pub fn key_columns_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[A-Z][A-Z_]{0,15}", key_value_strategy(), 1..5)
        .prop_map(|map| map.into_iter().collect())
}

/// Strategy for attribute text, including the empty string.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z ]{0,24}").expect("Invalid regex")
}

/// A small graph of artists and their paintings.
#[derive(Debug, Clone)]
pub struct GalleryGraph {
    /// Artist names.
    pub artists: Vec<String>,
    /// Paintings as (title, index of the artist).
    pub paintings: Vec<(String, usize)>,
}

/// Strategy for graphs of one to five artists with up to ten paintings.
pub fn gallery_graph_strategy() -> impl Strategy<Value = GalleryGraph> {
    prop::collection::vec(name_strategy(), 1..6).prop_flat_map(|artists| {
        let count = artists.len();
        prop::collection::vec((name_strategy(), 0..count), 0..10)
            .prop_map(move |paintings| GalleryGraph {
                artists: artists.clone(),
                paintings,
            })
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Quick configuration for CI.
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to a proptest config.
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn key_columns_are_distinct(columns in key_columns_strategy()) {
            let mut names: Vec<&String> = columns.iter().map(|(c, _)| c).collect();
            names.dedup();
            prop_assert_eq!(names.len(), columns.len());
        }

        #[test]
        fn numeric_twins_are_equal((int, real) in numeric_twin_strategy()) {
            prop_assert_eq!(int, real);
        }

        #[test]
        fn paintings_reference_existing_artists(graph in gallery_graph_strategy()) {
            prop_assert!(graph.paintings.iter().all(|(_, artist)| *artist < graph.artists.len()));
        }
    }
}
