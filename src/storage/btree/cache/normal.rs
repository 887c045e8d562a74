use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::trace;

use super::{
    entry_for, lost_race, register_new, same_node, CacheContext, CacheSlot, KeepAlive, NodeCache,
};
use crate::primitives::concurrency::LockStrategy;
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::handle::NodeHandle;
use crate::storage::btree::node::Node;
use crate::storage::btree::options::CachePolicy;
use crate::storage::btree::pin::{LockType, NodePin};
use crate::types::{Result, StorageHandle};

const MIN_PRUNE_THRESHOLD: usize = 1024;

struct NormalEntry<K, V> {
    handle: NodeHandle,
    lock: Arc<dyn LockStrategy>,
    node: Mutex<Weak<Node<K, V>>>,
}

impl<K: KeyCodec, V: ValCodec> CacheSlot<K, V> for NormalEntry<K, V> {
    fn handle(&self) -> NodeHandle {
        self.handle
    }

    fn is_current(&self, expected: Option<&Arc<Node<K, V>>>) -> bool {
        same_node(self.node.lock().upgrade().as_ref(), expected)
    }

    fn publish(
        &self,
        expected: Option<&Arc<Node<K, V>>>,
        node: Option<Arc<Node<K, V>>>,
    ) -> Result<()> {
        let mut slot = self.node.lock();
        if !same_node(slot.upgrade().as_ref(), expected) {
            return Err(lost_race(self.handle));
        }
        *slot = node.as_ref().map(Arc::downgrade).unwrap_or_default();
        Ok(())
    }
}

/// Holds node bodies weakly, with a keep-alive for recently used ones.
///
/// Lock entries outlive bodies; an entry is dropped once no pin refers to
/// it and its body has been released.
pub(crate) struct NodeCacheNormal<K, V> {
    ctx: CacheContext<K, V>,
    entries: RwLock<FxHashMap<StorageHandle, Arc<NormalEntry<K, V>>>>,
    keep_alive: Mutex<KeepAlive<StorageHandle, Node<K, V>>>,
    prune_at: AtomicUsize,
}

impl<K: KeyCodec, V: ValCodec> NodeCacheNormal<K, V> {
    pub(crate) fn new(
        ctx: CacheContext<K, V>,
        keep_alive: KeepAlive<StorageHandle, Node<K, V>>,
    ) -> Self {
        Self {
            ctx,
            entries: RwLock::new(FxHashMap::default()),
            keep_alive: Mutex::new(keep_alive),
            prune_at: AtomicUsize::new(MIN_PRUNE_THRESHOLD),
        }
    }

    fn entry(&self, handle: NodeHandle) -> Arc<NormalEntry<K, V>> {
        entry_for(&self.entries, handle, || NormalEntry {
            handle,
            lock: self.ctx.new_lock(),
            node: Mutex::new(Weak::new()),
        })
    }

    fn maybe_prune(&self) {
        let len = self.entries.read().len();
        if len < self.prune_at.load(Ordering::Relaxed) {
            return;
        }
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| {
            Arc::strong_count(entry) > 1 || entry.node.lock().strong_count() > 0
        });
        let after = entries.len();
        self.prune_at
            .store((after * 2).max(MIN_PRUNE_THRESHOLD), Ordering::Relaxed);
        trace!(before, after, "btree.cache.normal.pruned");
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.entries.read().len()
    }
}

impl<K: KeyCodec, V: ValCodec> NodeCache<K, V> for NodeCacheNormal<K, V> {
    fn context(&self) -> &CacheContext<K, V> {
        &self.ctx
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::Recent
    }

    fn lock_handle(&self, handle: NodeHandle, lock_type: LockType) -> Result<NodePin<K, V>> {
        self.maybe_prune();
        let entry = self.entry(handle);
        let guard = self.ctx.acquire(&*entry.lock, lock_type)?;
        let node = {
            let mut slot = entry.node.lock();
            match slot.upgrade() {
                Some(node) => {
                    self.ctx.stats.inc_cache_hits();
                    node
                }
                None => {
                    let node = self.ctx.read_node(handle)?;
                    *slot = Arc::downgrade(&node);
                    node
                }
            }
        };
        self.keep_alive
            .lock()
            .touch(handle.storage(), Arc::clone(&node));
        Ok(NodePin::new(entry, lock_type, guard, Some(node)))
    }

    fn create_lock(&self, handle: NodeHandle) -> Result<NodePin<K, V>> {
        let entry = Arc::new(NormalEntry {
            handle,
            lock: self.ctx.new_lock(),
            node: Mutex::new(Weak::new()),
        });
        register_new(&self.entries, handle, Arc::clone(&entry), |old| {
            old.node.lock().strong_count() > 0
        })?;
        let guard = self.ctx.acquire(&*entry.lock, LockType::Insert)?;
        Ok(NodePin::new(entry, LockType::Insert, guard, None))
    }

    fn update_node(&self, pin: &mut NodePin<K, V>) -> Result<()> {
        pin.publish()?;
        if let Some(node) = pin.original() {
            self.keep_alive
                .lock()
                .touch(pin.handle().storage(), Arc::clone(node));
        }
        Ok(())
    }

    fn forget(&self, handle: NodeHandle) {
        self.keep_alive.lock().forget(&handle.storage());
        self.entries.write().remove(&handle.storage());
    }

    fn reset_cache(&self) {
        self.keep_alive.lock().clear();
        for entry in self.entries.read().values() {
            *entry.node.lock() = Weak::new();
        }
    }

    fn clear_entries(&self) {
        self.keep_alive.lock().clear();
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::context;
    use super::*;
    use crate::storage::btree::node::Element;
    use std::time::Duration;

    fn stored_leaf(ctx: &CacheContext<u64, u64>, key: u64) -> NodeHandle {
        let handle = NodeHandle::new(ctx.storage.create().unwrap());
        let node = Node::from_entries(handle, 8, true, vec![Element::Value { key, value: key }]);
        ctx.storage
            .update(handle.storage(), &ctx.serializer.write(&node))
            .unwrap();
        handle
    }

    #[test]
    fn evicted_bodies_are_reloaded() {
        let ctx = context();
        let handles: Vec<NodeHandle> = (0..4).map(|k| stored_leaf(&ctx, k)).collect();
        let cache = NodeCacheNormal::new(ctx, KeepAlive::new(1, 2, Duration::from_secs(60)));
        for &h in &handles {
            drop(cache.lock_handle(h, LockType::Read).unwrap());
        }
        assert_eq!(cache.ctx.stats.cache_misses(), 4);
        drop(cache.lock_handle(handles[3], LockType::Read).unwrap());
        assert_eq!(cache.ctx.stats.cache_hits(), 1);
        drop(cache.lock_handle(handles[0], LockType::Read).unwrap());
        assert_eq!(cache.ctx.stats.cache_misses(), 5);
    }

    #[test]
    fn pinned_entries_survive_pruning() {
        let ctx = context();
        let kept = stored_leaf(&ctx, 1);
        let cache = NodeCacheNormal::new(ctx, KeepAlive::new(0, 0, Duration::from_secs(60)));
        let pin = cache.lock_handle(kept, LockType::Read).unwrap();
        for n in 0..MIN_PRUNE_THRESHOLD as u64 {
            cache.entry(NodeHandle::new(StorageHandle(10_000 + n)));
        }
        cache.maybe_prune();
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(pin.node().count(), 1);
    }
}
