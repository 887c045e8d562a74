//! Leases over locked nodes.

use std::sync::Arc;

use crate::primitives::concurrency::LockGuard;
use crate::types::Result;

use super::cache::CacheSlot;
use super::handle::NodeHandle;
use super::node::Node;

/// Why a node is being locked.
///
/// `Read` takes a shared lock; every other kind takes an exclusive one.
/// Children are always locked with their parent's kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum LockType {
    Read,
    Insert,
    Update,
    Delete,
}

impl LockType {
    pub(crate) fn is_write(self) -> bool {
        !matches!(self, LockType::Read)
    }
}

/// A held lock on one node plus the node body it protects.
///
/// `original` is the published, frozen node. A writer that calls
/// [`NodePin::begin_update`] works on a private clone in `temp` until the
/// owning transaction publishes or discards it. Dropping the pin releases
/// the lock.
pub(crate) struct NodePin<K, V> {
    slot: Arc<dyn CacheSlot<K, V>>,
    lock_type: LockType,
    original: Option<Arc<Node<K, V>>>,
    temp: Option<Node<K, V>>,
    _guard: LockGuard,
}

impl<K: Clone, V: Clone> NodePin<K, V> {
    pub(crate) fn new(
        slot: Arc<dyn CacheSlot<K, V>>,
        lock_type: LockType,
        guard: LockGuard,
        original: Option<Arc<Node<K, V>>>,
    ) -> Self {
        Self {
            slot,
            lock_type,
            original,
            temp: None,
            _guard: guard,
        }
    }

    pub(crate) fn handle(&self) -> NodeHandle {
        self.slot.handle()
    }

    pub(crate) fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// The node as this pin's owner currently sees it.
    pub(crate) fn node(&self) -> &Node<K, V> {
        match (&self.temp, &self.original) {
            (Some(temp), _) => temp,
            (None, Some(original)) => original,
            (None, None) => panic!("pin for {} holds no node", self.handle()),
        }
    }

    pub(crate) fn original(&self) -> Option<&Arc<Node<K, V>>> {
        self.original.as_ref()
    }

    /// Installs the body of a freshly created node.
    pub(crate) fn set_new_node(&mut self, node: Node<K, V>) {
        assert!(self.original.is_none(), "set_new_node on a published node");
        assert_eq!(node.handle(), self.handle(), "node stored under the wrong pin");
        self.temp = Some(node);
    }

    /// Clones the published node for writing and returns the clone.
    pub(crate) fn begin_update(&mut self) -> &mut Node<K, V> {
        assert!(self.lock_type.is_write(), "begin_update under a read lock");
        if self.temp.is_none() {
            let original = self
                .original
                .as_ref()
                .unwrap_or_else(|| panic!("begin_update on empty pin {}", self.slot.handle()));
            self.temp = Some(original.clone_for_write());
        }
        self.node_mut()
    }

    pub(crate) fn node_mut(&mut self) -> &mut Node<K, V> {
        match self.temp.as_mut() {
            Some(temp) => temp,
            None => panic!("node_mut without begin_update"),
        }
    }

    #[cfg(test)]
    pub(crate) fn has_changes(&self) -> bool {
        self.temp.is_some()
    }

    pub(crate) fn pending(&self) -> Option<&Node<K, V>> {
        self.temp.as_ref()
    }

    pub(crate) fn cancel_changes(&mut self) {
        self.temp = None;
    }

    /// Returns true if the cache still holds exactly this pin's original.
    pub(crate) fn is_current(&self) -> bool {
        self.slot.is_current(self.original.as_ref())
    }

    /// Freezes the working clone and swaps it into the cache.
    pub(crate) fn publish(&mut self) -> Result<()> {
        let Some(mut node) = self.temp.take() else {
            return Ok(());
        };
        node.mark_read_only();
        let node = Arc::new(node);
        self.slot
            .publish(self.original.as_ref(), Some(Arc::clone(&node)))?;
        self.original = Some(node);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn slot_for_tests(&self) -> &Arc<dyn CacheSlot<K, V>> {
        &self.slot
    }

    /// Clears the cache slot of a destroyed node.
    pub(crate) fn retire(&mut self) -> Result<()> {
        self.slot.publish(self.original.as_ref(), None)?;
        self.original = None;
        Ok(())
    }
}
