//! Object-to-table mapping.
//!
//! An [`ObjEntity`] maps a persistent class onto a table of the
//! [`Schema`](ormgraph_storage::Schema): attributes onto columns and
//! relationships onto paths of table relationships. The
//! [`EntityResolver`] validates a mapping and answers lookups for the
//! rest of the runtime.

mod entity;
mod resolver;

pub use entity::{DeleteRule, LockType, ObjAttribute, ObjEntity, ObjRelationship, Property};
pub use resolver::EntityResolver;
