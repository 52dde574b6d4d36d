//! # ormgraph Testkit
//!
//! Test utilities for ormgraph.
//!
//! This crate provides:
//! - The gallery fixture: a mapped schema of artists, paintings,
//!   galleries, nested artist groups and painting reviews
//! - [`TestStack`], an in-memory node and data domain wired to the
//!   fixture, with seeding and statement log helpers
//! - Property-based test generators using proptest
//!
//! The end-to-end scenarios live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust
//! use ormgraph_testkit::prelude::*;
//!
//! let stack = TestStack::new();
//! stack.seed_artist(1, "Monet");
//!
//! let context = stack.context();
//! let artist = context.find(&artist_id(1)).unwrap().unwrap();
//! assert_eq!(context.read_property(artist, "name").unwrap(), Value::from("Monet"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use ormgraph_codec::Value;
    pub use ormgraph_core::{
        Config, CoreError, Identity, ObjectContext, ObjectRef, PersistenceState, SelectQuery,
    };
    pub use ormgraph_storage::StatementKind;
}

pub use fixtures::*;
pub use generators::*;
