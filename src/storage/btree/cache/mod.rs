//! Node caches.
//!
//! A cache hands out [`NodePin`]s: it owns the one lock object per handle,
//! loads node bodies from storage and publishes committed clones. The three
//! strategies differ only in how long node bodies stay resident.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::primitives::concurrency::{LockGuard, LockStrategy, LockTimeout, LockingKind};
use crate::storage::store::NodeStorage;
use crate::types::{Result, StorageHandle, SylvaError};

use super::codecs::{KeyCodec, ValCodec};
use super::handle::NodeHandle;
use super::node::Node;
use super::options::CachePolicy;
use super::pin::{LockType, NodePin};
use super::serializer::NodeSerializer;
use super::stats::BTreeStats;

mod full;
mod keep_alive;
mod none;
mod normal;

pub(crate) use full::NodeCacheFull;
pub(crate) use keep_alive::KeepAlive;
pub(crate) use none::NodeCacheNone;
pub(crate) use normal::NodeCacheNormal;

/// Per-handle cache state shared by every pin on that handle.
pub(crate) trait CacheSlot<K, V>: Send + Sync {
    fn handle(&self) -> NodeHandle;

    /// Returns true if the slot holds `expected` (or holds nothing cached).
    fn is_current(&self, expected: Option<&Arc<Node<K, V>>>) -> bool;

    /// Replaces `expected` with `node`; a mismatch means another writer
    /// published without holding the lock.
    fn publish(
        &self,
        expected: Option<&Arc<Node<K, V>>>,
        node: Option<Arc<Node<K, V>>>,
    ) -> Result<()>;
}

/// Everything a cache needs besides its own tables.
pub(crate) struct CacheContext<K, V> {
    pub(crate) storage: Arc<dyn NodeStorage>,
    pub(crate) serializer: NodeSerializer<K, V>,
    pub(crate) root: NodeHandle,
    pub(crate) locking: LockingKind,
    pub(crate) timeout: LockTimeout,
    pub(crate) stats: Arc<BTreeStats>,
}

impl<K: KeyCodec, V: ValCodec> CacheContext<K, V> {
    pub(crate) fn new_lock(&self) -> Arc<dyn LockStrategy> {
        self.locking.create()
    }

    pub(crate) fn acquire(&self, lock: &dyn LockStrategy, lock_type: LockType) -> Result<LockGuard> {
        if lock_type.is_write() {
            lock.write(self.timeout)
        } else {
            lock.read(self.timeout)
        }
    }

    /// Reads and decodes a node body; the result is frozen.
    pub(crate) fn read_node(&self, handle: NodeHandle) -> Result<Arc<Node<K, V>>> {
        self.stats.inc_cache_misses();
        let image = self
            .storage
            .try_get_node(handle.storage())?
            .ok_or_else(|| SylvaError::CorruptionOwned(format!("no image stored for {handle}")))?;
        Ok(Arc::new(self.serializer.read(handle, &image)?))
    }
}

/// Strategy interface over the three caches.
pub(crate) trait NodeCache<K: KeyCodec, V: ValCodec>: Send + Sync {
    fn context(&self) -> &CacheContext<K, V>;

    fn policy(&self) -> CachePolicy;

    /// Locks `handle` and loads its node.
    fn lock_handle(&self, handle: NodeHandle, lock_type: LockType) -> Result<NodePin<K, V>>;

    /// Registers a brand-new handle and returns it write-locked, with no body.
    fn create_lock(&self, handle: NodeHandle) -> Result<NodePin<K, V>>;

    /// Drops cache state for a handle whose storage is gone.
    fn forget(&self, handle: NodeHandle);

    /// Drops every cached node body; locks are kept.
    fn reset_cache(&self);

    /// Drops every entry, including locks.
    fn clear_entries(&self);

    fn lock_root(&self, lock_type: LockType) -> Result<NodePin<K, V>> {
        self.lock_handle(self.context().root, lock_type)
    }

    /// Locks a child of `parent` with the parent's lock kind.
    fn lock(&self, parent: &NodePin<K, V>, handle: NodeHandle) -> Result<NodePin<K, V>> {
        self.lock_handle(handle, parent.lock_type())
    }

    /// Publishes a pin's committed clone.
    fn update_node(&self, pin: &mut NodePin<K, V>) -> Result<()> {
        pin.publish()
    }

    /// Clears and forgets a destroyed pin.
    fn remove_node(&self, pin: &mut NodePin<K, V>) -> Result<()> {
        pin.retire()?;
        self.forget(pin.handle());
        Ok(())
    }

    /// Warms the cache; only meaningful for caches that keep bodies.
    fn load(&self) -> Result<()> {
        Ok(())
    }

    /// Wipes storage and the cache together.
    fn delete_all(&self) -> Result<()> {
        self.context().storage.reset()?;
        self.clear_entries();
        Ok(())
    }
}

/// Returns the entry for `handle`, creating it with `make` if missing.
pub(crate) fn entry_for<E>(
    table: &RwLock<FxHashMap<StorageHandle, Arc<E>>>,
    handle: NodeHandle,
    make: impl FnOnce() -> E,
) -> Arc<E> {
    if let Some(entry) = table.read().get(&handle.storage()) {
        return Arc::clone(entry);
    }
    Arc::clone(
        table
            .write()
            .entry(handle.storage())
            .or_insert_with(|| Arc::new(make())),
    )
}

/// Inserts a fresh entry for a newly created handle.
pub(crate) fn register_new<E>(
    table: &RwLock<FxHashMap<StorageHandle, Arc<E>>>,
    handle: NodeHandle,
    entry: Arc<E>,
    occupied: impl FnOnce(&E) -> bool,
) -> Result<()> {
    let mut table = table.write();
    if let Some(existing) = table.get(&handle.storage()) {
        if occupied(existing) {
            return Err(SylvaError::CorruptionOwned(format!(
                "cache collision on new handle {handle}"
            )));
        }
    }
    table.insert(handle.storage(), entry);
    Ok(())
}

pub(crate) fn same_node<K, V>(a: Option<&Arc<Node<K, V>>>, b: Option<&Arc<Node<K, V>>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

pub(crate) fn lost_race(handle: NodeHandle) -> SylvaError {
    SylvaError::CorruptionOwned(format!("cache slot for {handle} changed underneath its writer"))
}

/// Builds the cache selected by `policy`.
pub(crate) fn build<K: KeyCodec, V: ValCodec>(
    policy: CachePolicy,
    ctx: CacheContext<K, V>,
    keep_alive: KeepAlive<StorageHandle, Node<K, V>>,
) -> Box<dyn NodeCache<K, V>> {
    match policy {
        CachePolicy::All => Box::new(NodeCacheFull::new(ctx)),
        CachePolicy::Recent => Box::new(NodeCacheNormal::new(ctx, keep_alive)),
        CachePolicy::None => Box::new(NodeCacheNone::new(ctx)),
    }
}
