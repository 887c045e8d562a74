use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{entry_for, register_new, CacheContext, CacheSlot, NodeCache};
use crate::primitives::concurrency::{LockStrategy, LockTimeout};
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::handle::NodeHandle;
use crate::storage::btree::node::Node;
use crate::storage::btree::options::CachePolicy;
use crate::storage::btree::pin::{LockType, NodePin};
use crate::types::{Result, StorageHandle};

struct LockEntry<K, V> {
    handle: NodeHandle,
    lock: Arc<dyn LockStrategy>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> CacheSlot<K, V> for LockEntry<K, V> {
    fn handle(&self) -> NodeHandle {
        self.handle
    }

    fn is_current(&self, _expected: Option<&Arc<Node<K, V>>>) -> bool {
        true
    }

    fn publish(
        &self,
        _expected: Option<&Arc<Node<K, V>>>,
        _node: Option<Arc<Node<K, V>>>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Caches locks only; every pin reads its node from storage.
pub(crate) struct NodeCacheNone<K, V> {
    ctx: CacheContext<K, V>,
    locks: RwLock<FxHashMap<StorageHandle, Arc<LockEntry<K, V>>>>,
}

impl<K: KeyCodec, V: ValCodec> NodeCacheNone<K, V> {
    pub(crate) fn new(ctx: CacheContext<K, V>) -> Self {
        Self {
            ctx,
            locks: RwLock::new(FxHashMap::default()),
        }
    }

    fn entry(&self, handle: NodeHandle) -> Arc<LockEntry<K, V>> {
        entry_for(&self.locks, handle, || LockEntry {
            handle,
            lock: self.ctx.new_lock(),
            _marker: PhantomData,
        })
    }
}

impl<K: KeyCodec, V: ValCodec> NodeCache<K, V> for NodeCacheNone<K, V> {
    fn context(&self) -> &CacheContext<K, V> {
        &self.ctx
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::None
    }

    fn lock_handle(&self, handle: NodeHandle, lock_type: LockType) -> Result<NodePin<K, V>> {
        let entry = self.entry(handle);
        let guard = self.ctx.acquire(&*entry.lock, lock_type)?;
        let node = self.ctx.read_node(handle)?;
        Ok(NodePin::new(entry, lock_type, guard, Some(node)))
    }

    fn create_lock(&self, handle: NodeHandle) -> Result<NodePin<K, V>> {
        let entry = Arc::new(LockEntry {
            handle,
            lock: self.ctx.new_lock(),
            _marker: PhantomData,
        });
        register_new(&self.locks, handle, Arc::clone(&entry), |old| {
            old.lock.write(LockTimeout::After(Duration::ZERO)).is_err()
        })?;
        let guard = self.ctx.acquire(&*entry.lock, LockType::Insert)?;
        Ok(NodePin::new(entry, LockType::Insert, guard, None))
    }

    fn forget(&self, handle: NodeHandle) {
        self.locks.write().remove(&handle.storage());
    }

    fn reset_cache(&self) {}

    fn clear_entries(&self) {
        self.locks.write().clear();
    }
}
