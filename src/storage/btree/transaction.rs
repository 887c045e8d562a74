//! Scoped structural edits.
//!
//! A [`NodeTransaction`] gathers the edits of one step of an operation: at
//! most one modified parent, any number of created nodes and any number of
//! destroyed nodes, plus the log records that describe the step. `commit`
//! writes them to storage, appends the log frame and only then publishes the
//! new node bodies to the cache, so readers never observe half a step.
//! Anything not committed is undone when the transaction is dropped.

use tracing::warn;

use crate::primitives::wal::{LogToken, TransactionLog};
use crate::types::{Result, SylvaError};

use super::cache::NodeCache;
use super::codecs::{KeyCodec, ValCodec};
use super::handle::NodeHandle;
use super::node::{Element, Node};
use super::pin::NodePin;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TxState {
    Open,
    Committed,
    RolledBack,
}

pub(crate) struct NodeTransaction<'a, K: KeyCodec, V: ValCodec> {
    cache: &'a dyn NodeCache<K, V>,
    log: Option<(&'a TransactionLog<K, V>, LogToken)>,
    parent: Option<&'a mut NodePin<K, V>>,
    created: Vec<NodePin<K, V>>,
    deleted: Vec<NodePin<K, V>>,
    state: TxState,
}

impl<'a, K: KeyCodec, V: ValCodec> NodeTransaction<'a, K, V> {
    pub(crate) fn new(
        cache: &'a dyn NodeCache<K, V>,
        log: Option<&'a TransactionLog<K, V>>,
    ) -> Self {
        Self {
            cache,
            log: log.map(|log| (log, log.begin_transaction())),
            parent: None,
            created: Vec::new(),
            deleted: Vec::new(),
            state: TxState::Open,
        }
    }

    /// Starts modifying `pin`; only one node per transaction may be modified.
    pub(crate) fn begin_update(&mut self, pin: &'a mut NodePin<K, V>) -> &mut Node<K, V> {
        assert!(self.parent.is_none(), "transaction already modifies a node");
        pin.begin_update();
        self.parent = Some(pin);
        self.parent_mut()
    }

    /// The node being modified.
    pub(crate) fn parent_mut(&mut self) -> &mut Node<K, V> {
        match self.parent.as_deref_mut() {
            Some(pin) => pin.node_mut(),
            None => panic!("parent_mut before begin_update"),
        }
    }

    /// Allocates a new node holding `entries` and returns its handle.
    ///
    /// The node stays write-locked by this transaction.
    pub(crate) fn create(&mut self, is_leaf: bool, entries: Vec<Element<K, V>>) -> Result<NodeHandle> {
        let ctx = self.cache.context();
        let handle = NodeHandle::new(ctx.storage.create()?);
        let mut pin = match self.cache.create_lock(handle) {
            Ok(pin) => pin,
            Err(err) => {
                if let Err(destroy_err) = ctx.storage.destroy(handle.storage()) {
                    warn!(%handle, error = %destroy_err, "btree.tx.create.cleanup_failed");
                }
                return Err(err);
            }
        };
        let capacity = if is_leaf {
            ctx.serializer.max_values()
        } else {
            ctx.serializer.max_children()
        };
        pin.set_new_node(Node::from_entries(handle, capacity, is_leaf, entries));
        self.created.push(pin);
        Ok(handle)
    }

    /// Schedules `pin` for destruction.
    pub(crate) fn destroy(&mut self, pin: NodePin<K, V>) {
        assert!(pin.lock_type().is_write(), "destroying a read-locked node");
        self.deleted.push(pin);
    }

    pub(crate) fn log_add(&mut self, key: &K, value: &V) {
        if let Some((log, token)) = self.log.as_mut() {
            log.add_value(token, key, value);
        }
    }

    pub(crate) fn log_update(&mut self, key: &K, value: &V) {
        if let Some((log, token)) = self.log.as_mut() {
            log.update_value(token, key, value);
        }
    }

    pub(crate) fn log_remove(&mut self, key: &K) {
        if let Some((log, token)) = self.log.as_mut() {
            log.remove_value(token, key);
        }
    }

    /// Persists and publishes every edit.
    ///
    /// A failed persist rolls the step back. Once persist succeeds the step
    /// is durable and is not undone: publishing cannot fail while the locks
    /// are held, because persist has checked that every touched slot still
    /// holds its pin's original. An error from publishing means the cache
    /// was written without a lock and surfaces as corruption.
    ///
    /// Returns the created pins, still write-locked, in creation order.
    pub(crate) fn commit(mut self) -> Result<Vec<NodePin<K, V>>> {
        if let Err(err) = self.persist() {
            self.rollback();
            return Err(err);
        }
        self.state = TxState::Committed;

        let cache = self.cache;
        debug_assert!(self.parent.as_deref().map_or(true, NodePin::is_current));
        for pin in self.created.iter_mut() {
            cache.update_node(pin)?;
        }
        if let Some(parent) = self.parent.as_deref_mut() {
            cache.update_node(parent)?;
        }
        for pin in self.deleted.iter_mut() {
            cache.remove_node(pin)?;
        }
        cache.context().stats.inc_transactions_committed();
        Ok(std::mem::take(&mut self.created))
    }

    fn persist(&mut self) -> Result<()> {
        let stale = self
            .parent
            .iter()
            .map(|pin| &**pin)
            .chain(self.deleted.iter())
            .find(|pin| !pin.is_current());
        if let Some(pin) = stale {
            return Err(SylvaError::CorruptionOwned(format!(
                "{} changed while locked",
                pin.handle()
            )));
        }

        let ctx = self.cache.context();
        let pending = self
            .created
            .iter()
            .chain(self.parent.iter().map(|pin| &**pin))
            .filter_map(|pin| pin.pending());
        for node in pending {
            ctx.storage
                .update(node.handle().storage(), &ctx.serializer.write(node))?;
            ctx.stats.inc_node_writes();
        }
        for pin in &self.deleted {
            ctx.storage.destroy(pin.handle().storage())?;
        }
        if let Some((log, token)) = self.log.take() {
            log.commit_transaction(token)?;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if self.state != TxState::Open {
            return;
        }
        self.state = TxState::RolledBack;
        if let Some(parent) = self.parent.as_deref_mut() {
            parent.cancel_changes();
        }
        let ctx = self.cache.context();
        for pin in self.created.drain(..) {
            let handle = pin.handle();
            if let Err(err) = ctx.storage.destroy(handle.storage()) {
                warn!(%handle, error = %err, "btree.tx.rollback.destroy_failed");
            }
            drop(pin);
            self.cache.forget(handle);
        }
        if let Some((log, token)) = self.log.take() {
            log.rollback_transaction(token);
        }
        ctx.stats.inc_transactions_rolled_back();
    }
}

impl<K: KeyCodec, V: ValCodec> Drop for NodeTransaction<'_, K, V> {
    fn drop(&mut self) {
        self.rollback();
    }
}
