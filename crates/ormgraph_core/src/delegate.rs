//! Merge policy hooks consulted when peer changes arrive.

use crate::object::DataObject;
use ormgraph_storage::DataRow;

/// Decides how a context reacts to changes committed by its peers.
///
/// Both hooks default to accepting the change.
pub trait ContextDelegate: Send + Sync {
    /// Whether a peer's new row state may be merged into `object`.
    ///
    /// `row` is `None` when only relationships were touched. Refusing
    /// leaves the object as it is.
    fn should_merge_changes(&self, object: &DataObject, row: Option<&DataRow>) -> bool {
        let _ = (object, row);
        true
    }

    /// Whether a peer's delete of the object's row may be applied.
    fn should_process_delete(&self, object: &DataObject) -> bool {
        let _ = object;
        true
    }
}

/// Delegate that accepts every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDelegate;

impl ContextDelegate for DefaultDelegate {}
