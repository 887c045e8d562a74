//! Insert and update with top-down preemptive splits.
//!
//! Any full node met on the way down is split before the descent continues,
//! so the leaf always has room and no path back up is ever needed.

use std::cmp::Ordering;

use tracing::trace;

use crate::primitives::wal::TransactionLog;
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::node::Element;
use crate::storage::btree::ops::{CreateOrUpdateValue, InsertResult};
use crate::storage::btree::pin::{LockType, NodePin};
use crate::storage::btree::transaction::NodeTransaction;
use crate::types::{Result, SylvaError};

use super::BPlusTree;

impl<K: KeyCodec, V: ValCodec> BPlusTree<K, V> {
    /// Applies `strategy` to `key` inside one atomic step.
    pub(super) fn apply_op<S>(
        &self,
        key: K,
        strategy: &mut S,
        log: Option<&TransactionLog<K, V>>,
    ) -> Result<InsertResult<V>>
    where
        S: CreateOrUpdateValue<K, V> + ?Sized,
    {
        let mut parent = self.cache.lock_root(LockType::Insert)?;
        let mut child = self.cache.lock(&parent, parent.node().child(0))?;
        let mut child_ordinal = 0;
        loop {
            if child.node().is_full() {
                child = self.split_child(&mut parent, child, child_ordinal, &key)?;
            }
            if child.node().is_leaf() {
                drop(parent);
                return self.apply_at_leaf(child, key, strategy, log);
            }
            let (_, ordinal) = child
                .node()
                .binary_search(&*self.options.key_comparer, &key);
            let next = self.cache.lock(&child, child.node().child(ordinal))?;
            parent = child;
            child = next;
            child_ordinal = ordinal;
        }
    }

    /// Splits the full `child` of `parent` in two and returns the half that
    /// `key` belongs to, still write-locked.
    fn split_child(
        &self,
        parent: &mut NodePin<K, V>,
        child: NodePin<K, V>,
        child_ordinal: usize,
        key: &K,
    ) -> Result<NodePin<K, V>> {
        let is_leaf = child.node().is_leaf();
        let old = child.handle();
        let mut left = child.node().entries().to_vec();
        let mut right = left.split_off(left.len() / 2);
        let separator = match &mut right[0] {
            Element::Value { key, .. } => key.clone(),
            Element::Child { key, .. } => key
                .take()
                .ok_or(SylvaError::Corruption("interior entry without a separator"))?,
        };

        let mut tx = NodeTransaction::new(&*self.cache, None);
        let left = tx.create(is_leaf, left)?;
        let right = tx.create(is_leaf, right)?;
        let root_split = parent.node().is_root();
        if root_split {
            let top = tx.create(
                false,
                vec![
                    Element::Child {
                        key: None,
                        child: left,
                    },
                    Element::Child {
                        key: Some(separator.clone()),
                        child: right,
                    },
                ],
            )?;
            tx.begin_update(parent).set_root_child(old, top);
        } else {
            let node = tx.begin_update(parent);
            node.replace_child(child_ordinal, old, left);
            node.insert(
                child_ordinal + 1,
                Element::Child {
                    key: Some(separator.clone()),
                    child: right,
                },
            );
        }
        tx.destroy(child);
        let mut created = tx.commit()?;

        if is_leaf {
            self.stats.inc_leaf_splits();
        } else {
            self.stats.inc_interior_splits();
        }
        if root_split {
            self.stats.inc_root_splits();
        }
        trace!(%old, %left, %right, root_split, "btree.split");

        let side = match self.compare(key, &separator) {
            Ordering::Less => 0,
            _ => 1,
        };
        Ok(created.swap_remove(side))
    }

    fn apply_at_leaf<S>(
        &self,
        mut leaf: NodePin<K, V>,
        key: K,
        strategy: &mut S,
        log: Option<&TransactionLog<K, V>>,
    ) -> Result<InsertResult<V>>
    where
        S: CreateOrUpdateValue<K, V> + ?Sized,
    {
        let (found, ordinal) = leaf
            .node()
            .binary_search(&*self.options.key_comparer, &key);
        if found {
            let Some(value) = strategy.update_value(&key, leaf.node().value(ordinal)) else {
                return Ok(InsertResult::Exists(leaf.node().value(ordinal).clone()));
            };
            let mut tx = NodeTransaction::new(&*self.cache, log);
            tx.begin_update(&mut leaf).set_value(ordinal, value.clone());
            tx.log_update(&key, &value);
            tx.commit()?;
            self.stats.inc_updates();
            return Ok(InsertResult::Updated(value));
        }

        let Some(value) = strategy.create_value(&key) else {
            return Ok(InsertResult::NotFound);
        };
        let mut tx = NodeTransaction::new(&*self.cache, log);
        tx.log_add(&key, &value);
        tx.begin_update(&mut leaf).insert(
            ordinal,
            Element::Value {
                key,
                value: value.clone(),
            },
        );
        tx.commit()?;
        self.increment_count();
        self.stats.inc_inserts();
        Ok(InsertResult::Inserted(value))
    }
}
