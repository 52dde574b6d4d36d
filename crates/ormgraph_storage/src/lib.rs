//! # ormgraph Storage
//!
//! Relational schema, batch queries and data node backends for ormgraph.
//!
//! This crate is the boundary between the object graph runtime and the
//! database. The runtime hands fully-shaped batches to a [`DataNode`];
//! the node executes them and reports affected row counts and generated
//! keys.
//!
//! ## Design Principles
//!
//! - Nodes know tables and columns, never objects
//! - One batch is one statement shape executed for many rows
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Nodes
//!
//! - [`MemoryDataNode`] - In-memory tables with constraint checks, for
//!   tests and ephemeral stores
//!
//! ## Example
//!
//! ```rust
//! use ormgraph_storage::{BatchQuery, DataNode, DbEntity, InsertBatch, MemoryDataNode, Schema, TxMode};
//! use ormgraph_codec::Value;
//! use std::sync::Arc;
//!
//! let schema = Arc::new(Schema::new().with_entity(
//!     DbEntity::new("ARTIST").generated_pk("ARTIST_ID").column("ARTIST_NAME", true),
//! ));
//! let node = MemoryDataNode::new("node", schema);
//!
//! let tx = node.begin(TxMode::ReadWrite).unwrap();
//! let result = node
//!     .execute(
//!         tx,
//!         &BatchQuery::Insert(InsertBatch {
//!             table: "ARTIST".into(),
//!             columns: vec!["ARTIST_NAME".into()],
//!             rows: vec![vec![Value::from("Monet")]],
//!         }),
//!     )
//!     .unwrap();
//! node.commit(tx).unwrap();
//! assert_eq!(result.counts, vec![1]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod error;
mod memory;
mod node;
mod row;
mod schema;

pub use batch::{
    BatchQuery, BatchResult, DeleteBatch, ExecutedStatement, InsertBatch, QualifierColumn,
    StatementKind, UpdateBatch, UpdateRow,
};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryDataNode;
pub use node::{DataNode, NodeTxId, TxMode};
pub use row::{DataRow, KeyMap, DEFAULT_VERSION};
pub use schema::{DbAttribute, DbEntity, DbJoin, DbRelationship, Schema};
