//! Object identity.

use ormgraph_codec::Value;
use ormgraph_storage::KeyMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one persistent object within an object graph.
///
/// An identity is an entity name plus either a temporary surrogate, used
/// between registration and the INSERT that assigns a real key, or a
/// permanent primary key keyed by column name.
///
/// Equality and hashing are independent of the order in which key columns
/// were supplied, and numerically equal values of different types
/// (`Integer(1)` and `Real(1.0)`) compare equal.
///
/// Permanent identities are immutable. A temporary identity is replaced
/// by a permanent one after commit; objects are addressed by handle, so
/// every holder observes the replacement.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    entity: String,
    key: IdentityKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
enum IdentityKey {
    Temporary(Uuid),
    Permanent(KeyMap),
}

impl Identity {
    /// Creates a fresh temporary identity.
    #[must_use]
    pub fn temporary(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            key: IdentityKey::Temporary(Uuid::new_v4()),
        }
    }

    /// Creates a permanent identity from key column values.
    #[must_use]
    pub fn permanent(entity: impl Into<String>, key: KeyMap) -> Self {
        Self {
            entity: entity.into(),
            key: IdentityKey::Permanent(key),
        }
    }

    /// Creates a permanent identity with a single key column.
    #[must_use]
    pub fn single(entity: impl Into<String>, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut key = KeyMap::new();
        key.insert(column.into(), value.into());
        Self::permanent(entity, key)
    }

    /// Entity name.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    /// Returns true for a temporary identity.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self.key, IdentityKey::Temporary(_))
    }

    /// Key column values of a permanent identity.
    #[must_use]
    pub fn key(&self) -> Option<&KeyMap> {
        match &self.key {
            IdentityKey::Permanent(key) => Some(key),
            IdentityKey::Temporary(_) => None,
        }
    }

    /// Value of one key column of a permanent identity.
    #[must_use]
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.key().and_then(|k| k.get(column))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            IdentityKey::Temporary(uuid) => write!(f, "{}<temp:{}>", self.entity, uuid.simple()),
            IdentityKey::Permanent(key) => {
                write!(f, "{}<", self.entity)?;
                for (i, (column, value)) in key.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{column}={value}")?;
                }
                write!(f, ">")
            }
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(id: &Identity) -> u64 {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn temporary_identities_are_unique() {
        let a = Identity::temporary("Artist");
        let b = Identity::temporary("Artist");
        assert_ne!(a, b);
        assert!(a.is_temporary());
        assert!(a.key().is_none());
    }

    #[test]
    fn numeric_types_compare_equal() {
        let a = Identity::single("Artist", "ARTIST_ID", Value::Integer(7));
        let b = Identity::single("Artist", "ARTIST_ID", Value::Real(7.0));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn entity_name_is_part_of_equality() {
        let a = Identity::single("Artist", "ID", 1i64);
        let b = Identity::single("Gallery", "ID", 1i64);
        assert_ne!(a, b);
    }

    #[test]
    fn display_lists_key_columns() {
        let id = Identity::single("Artist", "ARTIST_ID", 5i64);
        assert_eq!(id.to_string(), "Artist<ARTIST_ID=5>");
        assert!(Identity::temporary("Artist").to_string().starts_with("Artist<temp:"));
    }

    proptest! {
        #[test]
        fn key_order_does_not_matter(
            entries in proptest::collection::btree_map("[A-Z]{1,6}", any::<i64>(), 1..6)
        ) {
            let forward: KeyMap = entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::Integer(*v)))
                .collect();
            let mut backward = KeyMap::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), Value::Integer(*v));
            }

            let a = Identity::permanent("E", forward);
            let b = Identity::permanent("E", backward);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
        }

        #[test]
        fn integral_reals_match_integers(v in -1_000_000i64..1_000_000) {
            #[allow(clippy::cast_precision_loss)]
            let real = v as f64;
            let a = Identity::single("E", "ID", Value::Integer(v));
            let b = Identity::single("E", "ID", Value::Real(real));
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
        }
    }
}
