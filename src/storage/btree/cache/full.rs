use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use super::{entry_for, lost_race, register_new, same_node, CacheContext, CacheSlot, NodeCache};
use crate::primitives::concurrency::LockStrategy;
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::handle::NodeHandle;
use crate::storage::btree::node::Node;
use crate::storage::btree::options::CachePolicy;
use crate::storage::btree::pin::{LockType, NodePin};
use crate::types::{Result, StorageHandle};

struct FullEntry<K, V> {
    handle: NodeHandle,
    lock: Arc<dyn LockStrategy>,
    node: Mutex<Option<Arc<Node<K, V>>>>,
}

impl<K: KeyCodec, V: ValCodec> CacheSlot<K, V> for FullEntry<K, V> {
    fn handle(&self) -> NodeHandle {
        self.handle
    }

    fn is_current(&self, expected: Option<&Arc<Node<K, V>>>) -> bool {
        same_node(self.node.lock().as_ref(), expected)
    }

    fn publish(
        &self,
        expected: Option<&Arc<Node<K, V>>>,
        node: Option<Arc<Node<K, V>>>,
    ) -> Result<()> {
        let mut slot = self.node.lock();
        if !same_node(slot.as_ref(), expected) {
            return Err(lost_race(self.handle));
        }
        *slot = node;
        Ok(())
    }
}

/// Keeps every node body resident for the life of the tree.
pub(crate) struct NodeCacheFull<K, V> {
    ctx: CacheContext<K, V>,
    entries: RwLock<FxHashMap<StorageHandle, Arc<FullEntry<K, V>>>>,
}

impl<K: KeyCodec, V: ValCodec> NodeCacheFull<K, V> {
    pub(crate) fn new(ctx: CacheContext<K, V>) -> Self {
        Self {
            ctx,
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    fn entry(&self, handle: NodeHandle) -> Arc<FullEntry<K, V>> {
        entry_for(&self.entries, handle, || FullEntry {
            handle,
            lock: self.ctx.new_lock(),
            node: Mutex::new(None),
        })
    }
}

impl<K: KeyCodec, V: ValCodec> NodeCache<K, V> for NodeCacheFull<K, V> {
    fn context(&self) -> &CacheContext<K, V> {
        &self.ctx
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::All
    }

    fn lock_handle(&self, handle: NodeHandle, lock_type: LockType) -> Result<NodePin<K, V>> {
        let entry = self.entry(handle);
        let guard = self.ctx.acquire(&*entry.lock, lock_type)?;
        let node = {
            let mut slot = entry.node.lock();
            match slot.as_ref() {
                Some(node) => {
                    self.ctx.stats.inc_cache_hits();
                    Arc::clone(node)
                }
                None => {
                    let node = self.ctx.read_node(handle)?;
                    *slot = Some(Arc::clone(&node));
                    node
                }
            }
        };
        Ok(NodePin::new(entry, lock_type, guard, Some(node)))
    }

    fn create_lock(&self, handle: NodeHandle) -> Result<NodePin<K, V>> {
        let entry = Arc::new(FullEntry {
            handle,
            lock: self.ctx.new_lock(),
            node: Mutex::new(None),
        });
        register_new(&self.entries, handle, Arc::clone(&entry), |old| {
            old.node.lock().is_some()
        })?;
        let guard = self.ctx.acquire(&*entry.lock, LockType::Insert)?;
        Ok(NodePin::new(entry, LockType::Insert, guard, None))
    }

    fn forget(&self, handle: NodeHandle) {
        self.entries.write().remove(&handle.storage());
    }

    fn reset_cache(&self) {
        for entry in self.entries.read().values() {
            *entry.node.lock() = None;
        }
    }

    fn clear_entries(&self) {
        self.entries.write().clear();
    }

    fn load(&self) -> Result<()> {
        let mut pending = vec![self.ctx.root];
        let mut loaded = 0usize;
        while let Some(handle) = pending.pop() {
            let pin = self.lock_handle(handle, LockType::Read)?;
            let node = pin.node();
            if !node.is_leaf() {
                pending.extend((0..node.count()).map(|i| node.child(i)));
            }
            loaded += 1;
        }
        debug!(nodes = loaded, "btree.cache.full.loaded");
        Ok(())
    }
}
