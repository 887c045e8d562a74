use std::fmt;

use crate::types::StorageHandle;

/// Identity of one node in the tree.
///
/// Equality is the storage location. Per-handle cache state (locks, node
/// bodies) lives in side tables owned by the node cache, keyed by this value.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeHandle(StorageHandle);

impl NodeHandle {
    /// Wraps a storage handle.
    pub fn new(storage: StorageHandle) -> Self {
        Self(storage)
    }

    /// The storage location behind this node.
    pub fn storage(self) -> StorageHandle {
        self.0
    }
}

impl From<StorageHandle> for NodeHandle {
    fn from(value: StorageHandle) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}
