//! The concurrent B+Tree.
//!
//! [`BPlusTree`] owns the node cache, the optional transaction log and the
//! call-level lock. Point operations descend with lock coupling: a node's
//! lock is released only after the next level's lock is held, and locks are
//! always taken top-down. Writers exclusively lock the root holder first, so
//! structural changes near the top are serialized while readers keep
//! observing frozen node versions.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::concurrency::{LockGuard, LockStrategy};
use crate::primitives::wal::{ExistingLogAction, LogOp, TransactionLog};
use crate::storage::store::{FileStorage, FileStorageOptions, MemoryStorage, NodeStorage};
use crate::types::{Result, SylvaError};

use super::cache::{self, CacheContext, KeepAlive, NodeCache};
use super::codecs::{KeyCodec, ValCodec};
use super::handle::NodeHandle;
use super::node::{Element, Node};
use super::ops::Upsert;
use super::options::{BPlusTreeOptions, CachePolicy, StorageType};
use super::pin::{LockType, NodePin};
use super::serializer::NodeSerializer;
use super::stats::BTreeStats;
use super::transaction::NodeTransaction;

mod api;
mod bulk;
mod delete;
mod insert;
mod recovery;
mod search;
#[cfg(feature = "validate")]
mod validate;

pub use bulk::{BulkInsertOptions, DuplicateHandling};
pub use recovery::{FileEntries, ScannedEntries};
#[cfg(feature = "validate")]
pub use validate::TreeReport;

pub(crate) use search::Seek;

/// A concurrent, optionally persistent, ordered map.
pub struct BPlusTree<K: KeyCodec, V: ValCodec> {
    options: BPlusTreeOptions<K, V>,
    cache: Box<dyn NodeCache<K, V>>,
    log: Option<TransactionLog<K, V>>,
    call_lock: Arc<dyn LockStrategy>,
    count: Mutex<Option<u64>>,
    stats: Arc<BTreeStats>,
}

impl<K: KeyCodec, V: ValCodec> BPlusTree<K, V> {
    /// Opens (or creates) a tree.
    ///
    /// Any content found in the configured transaction log is handled
    /// according to its [`ExistingLogAction`].
    pub fn open(options: BPlusTreeOptions<K, V>) -> Result<Self> {
        options.validate()?;
        let storage = open_storage(&options)?;
        let serializer =
            NodeSerializer::new(options.maximum_child_nodes, options.maximum_value_nodes);
        let (root, is_new) = storage.open_root()?;
        let root = NodeHandle::new(root);
        if is_new {
            if options.read_only {
                return Err(SylvaError::Corruption("read-only storage holds no tree"));
            }
            init_root(&*storage, &serializer, root)?;
        }

        let stats = Arc::new(BTreeStats::default());
        let ctx = CacheContext {
            storage,
            serializer,
            root,
            locking: options.locking_factory,
            timeout: options.lock_timeout,
            stats: Arc::clone(&stats),
        };
        let keep_alive = KeepAlive::new(
            options.cache_keep_alive_minimum_history,
            options.cache_keep_alive_maximum_history,
            options.cache_keep_alive_timeout,
        );
        let cache = cache::build(options.cache_policy, ctx, keep_alive);
        let log = options
            .transaction_log
            .as_ref()
            .map(TransactionLog::open)
            .transpose()?;
        let tree = Self {
            call_lock: options.call_level_lock.create(),
            options,
            cache,
            log,
            count: Mutex::new(None),
            stats,
        };
        if tree.cache.policy() == CachePolicy::All {
            tree.cache.load()?;
        }
        tree.process_existing_log()?;
        info!(
            storage = ?tree.options.storage,
            cache = ?tree.options.cache_policy,
            new = is_new,
            "btree.open"
        );
        Ok(tree)
    }

    /// Live operation counters.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.stats)
    }

    /// The options the tree was opened with.
    pub fn options(&self) -> &BPlusTreeOptions<K, V> {
        &self.options
    }

    /// Persists all changes and resets the transaction log.
    ///
    /// On non-durable storage the log is rewritten as a snapshot of the
    /// committed content instead, so it can rebuild the tree later.
    pub fn commit(&self) -> Result<()> {
        self.ensure_writable()?;
        let _call = self.write_call()?;
        self.commit_locked()
    }

    /// Reverts to the last commit.
    ///
    /// Supported for in-memory storage with a transaction log, and for
    /// custom storage that implements [`NodeStorage::rollback`].
    pub fn rollback(&self) -> Result<()> {
        self.ensure_writable()?;
        let _call = self.write_call()?;
        let counting = self.count.lock().take().is_some();
        let storage = Arc::clone(&self.cache.context().storage);
        match &self.log {
            Some(log) if !storage.is_durable() => {
                self.cache.delete_all()?;
                let (root, _) = storage.open_root()?;
                init_root(&*storage, &self.cache.context().serializer, NodeHandle::new(root))?;
                let ops = log.replay_to_checkpoint(|op| self.apply_logged(op))?;
                log.truncate_to_checkpoint()?;
                debug!(ops, "btree.rollback.replayed");
            }
            log => {
                storage.rollback()?;
                self.cache.clear_entries();
                if let Some(log) = log {
                    log.truncate_log()?;
                }
            }
        }
        if counting {
            let total = self.count_entries()?;
            *self.count.lock() = Some(total);
        }
        info!("btree.rollback");
        Ok(())
    }

    /// Counts every entry once; afterwards [`BPlusTree::count`] is kept
    /// current by each mutation.
    ///
    /// The walk is exact when no writer runs concurrently, which a
    /// non-`Ignore` call-level lock guarantees.
    pub fn enable_count(&self) -> Result<()> {
        let _call = self.write_call()?;
        if self.count.lock().is_none() {
            let total = self.count_entries()?;
            *self.count.lock() = Some(total);
            debug!(total, "btree.count.enabled");
        }
        Ok(())
    }

    /// Number of entries, enabling counting first if needed.
    pub fn count(&self) -> Result<u64> {
        if let Some(total) = *self.count.lock() {
            return Ok(total);
        }
        self.enable_count()?;
        let total = *self.count.lock();
        Ok(total.unwrap_or_default())
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        let _call = self.read_call()?;
        self.is_empty_unlocked()
    }

    /// Removes every entry.
    pub fn clear(&self) -> Result<()> {
        self.ensure_writable()?;
        {
            let _call = self.write_call()?;
            let log = self.log.as_ref();
            let mut root = self.cache.lock_root(LockType::Update)?;
            let old_top = root.node().child(0);
            let old_keys = match log {
                Some(_) => self.collect_entries(&root)?,
                None => Vec::new(),
            };
            let mut tx = NodeTransaction::new(&*self.cache, log);
            let top = tx.create(true, Vec::new())?;
            for (key, _) in &old_keys {
                tx.log_remove(key);
            }
            tx.begin_update(&mut root).set_root_child(old_top, top);
            drop(tx.commit()?);
            let old = self.cache.lock(&root, old_top)?;
            drop(root);
            self.destroy_subtree(old)?;
            if let Some(total) = self.count.lock().as_mut() {
                *total = 0;
            }
            debug!(removed = old_keys.len(), "btree.clear");
        }
        self.after_mutation(true)
    }

    /// Drops every cached node body.
    pub fn unload_cache(&self) -> Result<()> {
        let _call = self.write_call()?;
        self.cache.reset_cache();
        debug!("btree.cache.unloaded");
        Ok(())
    }

    fn process_existing_log(&self) -> Result<()> {
        let (Some(log), Some(log_options)) = (&self.log, &self.options.transaction_log) else {
            return Ok(());
        };
        match log_options.existing_log_action.resolve() {
            ExistingLogAction::Ignore => {}
            ExistingLogAction::Truncate => log.truncate_log()?,
            action @ (ExistingLogAction::Replay
            | ExistingLogAction::ReplayAndCommit
            | ExistingLogAction::Default) => {
                if log.size() > 0 {
                    self.replay_existing(log)?;
                }
                if action == ExistingLogAction::Replay {
                    log.mark_checkpoint();
                } else {
                    self.commit()?;
                }
            }
        }
        Ok(())
    }

    fn replay_existing(&self, log: &TransactionLog<K, V>) -> Result<()> {
        if self.is_empty_unlocked()? {
            let merged = log.merge_log(&*self.options.key_comparer, std::iter::empty())?;
            let applied = self.bulk_locked(merged, &BulkInsertOptions::sorted_replace(), None)?;
            info!(entries = applied, "btree.log.merged");
        } else {
            let ops = log.replay_log(|op| self.apply_logged(op))?;
            info!(ops, "btree.log.replayed");
        }
        Ok(())
    }

    fn apply_logged(&self, op: LogOp<K, V>) -> Result<()> {
        match op {
            LogOp::Add(key, value) | LogOp::Update(key, value) => {
                self.apply_op(key, &mut Upsert(value), None)?;
            }
            LogOp::Remove(key) => {
                self.remove_op(&key, &mut |_: &K, _: &V| true, None)?;
            }
        }
        Ok(())
    }

    fn commit_locked(&self) -> Result<()> {
        let storage = &self.cache.context().storage;
        storage.commit()?;
        if let Some(log) = &self.log {
            if storage.is_durable() {
                log.truncate_log()?;
            } else {
                let root = self.cache.lock_root(LockType::Read)?;
                let entries = self.collect_entries(&root)?;
                drop(root);
                log.compact(entries)?;
            }
        }
        debug!("btree.commit");
        Ok(())
    }

    /// Commits when the log has grown past its configured limit.
    fn after_mutation(&self, modified: bool) -> Result<()> {
        if !modified {
            return Ok(());
        }
        let limit = self
            .options
            .transaction_log
            .as_ref()
            .and_then(|opts| opts.transaction_log_limit);
        if let (Some(log), Some(limit)) = (&self.log, limit) {
            if log.size() >= limit {
                debug!(size = log.size(), limit, "btree.log.auto_commit");
                self.commit()?;
            }
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.options.read_only {
            Err(SylvaError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn read_call(&self) -> Result<LockGuard> {
        self.call_lock.read(self.options.lock_timeout)
    }

    fn write_call(&self) -> Result<LockGuard> {
        self.call_lock.write(self.options.lock_timeout)
    }

    fn active_log(&self) -> Option<&TransactionLog<K, V>> {
        self.log.as_ref()
    }

    fn compare(&self, a: &K, b: &K) -> std::cmp::Ordering {
        (self.options.key_comparer)(a, b)
    }

    fn minimum(&self, is_leaf: bool) -> usize {
        if is_leaf {
            self.options.minimum_value_nodes
        } else {
            self.options.minimum_child_nodes
        }
    }

    fn fill(&self, is_leaf: bool) -> usize {
        if is_leaf {
            self.options.fill_values()
        } else {
            self.options.fill_children()
        }
    }

    fn increment_count(&self) {
        if let Some(total) = self.count.lock().as_mut() {
            *total += 1;
        }
    }

    fn decrement_count(&self) {
        if let Some(total) = self.count.lock().as_mut() {
            *total = total.saturating_sub(1);
        }
    }

    fn is_empty_unlocked(&self) -> Result<bool> {
        let root = self.cache.lock_root(LockType::Read)?;
        let top = self.cache.lock(&root, root.node().child(0))?;
        drop(root);
        Ok(top.node().is_leaf() && top.node().count() == 0)
    }

    fn count_entries(&self) -> Result<u64> {
        let root = self.cache.lock_root(LockType::Read)?;
        self.count_subtree(&root)
    }

    fn count_subtree(&self, pin: &NodePin<K, V>) -> Result<u64> {
        let node = pin.node();
        if node.is_leaf() {
            return Ok(node.count() as u64);
        }
        let mut total = 0;
        for ordinal in 0..node.count() {
            let child = self.cache.lock(pin, node.child(ordinal))?;
            total += self.count_subtree(&child)?;
        }
        Ok(total)
    }

    /// Every entry below `pin`, in order.
    fn collect_entries(&self, pin: &NodePin<K, V>) -> Result<Vec<(K, V)>> {
        let mut out = Vec::new();
        self.collect_into(pin, &mut out)?;
        Ok(out)
    }

    fn collect_into(&self, pin: &NodePin<K, V>, out: &mut Vec<(K, V)>) -> Result<()> {
        let node = pin.node();
        if node.is_leaf() {
            out.extend(node.entries().iter().filter_map(|element| match element {
                Element::Value { key, value } => Some((key.clone(), value.clone())),
                Element::Child { .. } => None,
            }));
            return Ok(());
        }
        for ordinal in 0..node.count() {
            let child = self.cache.lock(pin, node.child(ordinal))?;
            self.collect_into(&child, out)?;
        }
        Ok(())
    }

    /// Destroys `pin` and everything below it.
    fn destroy_subtree(&self, pin: NodePin<K, V>) -> Result<()> {
        if !pin.node().is_leaf() {
            for ordinal in 0..pin.node().count() {
                let child = self.cache.lock(&pin, pin.node().child(ordinal))?;
                self.destroy_subtree(child)?;
            }
        }
        let mut tx = NodeTransaction::new(&*self.cache, None);
        tx.destroy(pin);
        tx.commit()?;
        Ok(())
    }
}

impl<K: KeyCodec, V: ValCodec> Drop for BPlusTree<K, V> {
    fn drop(&mut self) {
        if let Some(log) = &self.log {
            if log.size() > log.checkpoint_offset() {
                warn!(
                    path = %log.path().display(),
                    bytes = log.size() - log.checkpoint_offset(),
                    "btree.close.uncommitted_log"
                );
            }
        }
    }
}

fn open_storage<K, V>(options: &BPlusTreeOptions<K, V>) -> Result<Arc<dyn NodeStorage>> {
    Ok(match &options.storage {
        StorageType::Memory => Arc::new(MemoryStorage::new()),
        StorageType::Disk => {
            let path = options
                .file_name
                .clone()
                .ok_or(SylvaError::Invalid("disk storage requires a file name"))?;
            Arc::new(FileStorage::open(&FileStorageOptions {
                path,
                block_size: options.file_block_size,
                create: options.create_file,
                read_only: options.read_only,
            })?)
        }
        StorageType::Custom(storage) => Arc::clone(storage),
    })
}

/// Writes an empty leaf and points the root holder at it.
fn init_root<K: KeyCodec, V: ValCodec>(
    storage: &dyn NodeStorage,
    serializer: &NodeSerializer<K, V>,
    root: NodeHandle,
) -> Result<()> {
    let leaf = NodeHandle::new(storage.create()?);
    storage.update(
        leaf.storage(),
        &serializer.write(&Node::new(leaf, serializer.max_values(), true)),
    )?;
    storage.update(root.storage(), &serializer.write(&Node::new_root(root, leaf)))?;
    storage.commit()?;
    debug!(%root, top = %leaf, "btree.root.init");
    Ok(())
}
