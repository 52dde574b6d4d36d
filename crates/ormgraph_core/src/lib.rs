//! # ormgraph Core
//!
//! Object graph runtime for ormgraph.
//!
//! This crate provides:
//! - Object contexts that track changes to a graph of persistent objects
//! - A commit pipeline that turns those changes into ordered, batched
//!   INSERT, UPDATE and DELETE statements
//! - A shared snapshot cache that keeps contexts of one domain in sync
//! - A dependency sorter for tables and for rows of self-referencing
//!   tables
//!
//! ## Example
//!
//! ```rust
//! use ormgraph_core::{Config, DataDomain, EntityResolver, ObjEntity, PersistenceState};
//! use ormgraph_storage::{DbEntity, MemoryDataNode, Schema};
//! use std::sync::Arc;
//!
//! let schema = Arc::new(Schema::new().with_entity(
//!     DbEntity::new("ARTIST").generated_pk("ARTIST_ID").column("ARTIST_NAME", true),
//! ));
//! let resolver = EntityResolver::new(
//!     Arc::clone(&schema),
//!     [ObjEntity::new("Artist", "ARTIST").attribute("name", "ARTIST_NAME")],
//! )
//! .unwrap();
//! let node = Arc::new(MemoryDataNode::new("node", schema));
//! let domain = Arc::new(DataDomain::new("domain", Arc::new(resolver), node, Config::default()));
//!
//! let context = domain.create_context();
//! let artist = context.new_object("Artist").unwrap();
//! context.write_property(artist, "name", "Monet").unwrap();
//! context.commit_changes().unwrap();
//! assert_eq!(context.persistence_state(artist).unwrap(), PersistenceState::Committed);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod config;
mod context;
mod delegate;
mod delete;
mod diff;
mod domain;
mod error;
mod event;
mod flush;
mod graph;
mod identity;
mod iterator;
mod map;
mod object;
mod object_diff;
mod object_store;
mod query;
mod snapshot_cache;
mod sorter;
mod transaction;

pub use channel::{CommitResult, DataChannel};
pub use config::{Config, ObjectRetention};
pub use context::ObjectContext;
pub use delegate::{ContextDelegate, DefaultDelegate};
pub use diff::{CompoundDiff, GraphChangeHandler, GraphDiff};
pub use domain::DataDomain;
pub use error::{CoreError, CoreResult};
pub use event::{SnapshotEvent, SubscriberId};
pub use identity::Identity;
pub use iterator::ResultIterator;
pub use map::{DeleteRule, EntityResolver, LockType, ObjAttribute, ObjEntity, ObjRelationship, Property};
pub use object::{DataObject, Fault, ObjectRef, PersistenceState, PropertyValue, Relationship};
pub use object_diff::{ArcOp, FlattenedArcKey, ObjectDiff};
pub use object_store::ObjectStore;
pub use query::{DbQuery, SelectQuery};
pub use snapshot_cache::SnapshotCache;
pub use sorter::DependencySorter;
pub use transaction::{BoundTransaction, Transaction, TransactionState};
