//! Removal with eager joins on the way down.
//!
//! A node at its minimum is topped up from a sibling (or merged with it)
//! before the descent continues, so the final leaf removal never underflows.

use std::cmp::Ordering;

use tracing::trace;

use crate::primitives::wal::TransactionLog;
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::node::Element;
use crate::storage::btree::ops::{RemoveResult, RemoveValue};
use crate::storage::btree::pin::{LockType, NodePin};
use crate::storage::btree::transaction::NodeTransaction;
use crate::types::{Result, SylvaError};

use super::BPlusTree;

impl<K: KeyCodec, V: ValCodec> BPlusTree<K, V> {
    /// Removes `key` if `strategy` agrees.
    pub(super) fn remove_op<S>(
        &self,
        key: &K,
        strategy: &mut S,
        log: Option<&TransactionLog<K, V>>,
    ) -> Result<RemoveResult<V>>
    where
        S: RemoveValue<K, V> + ?Sized,
    {
        let mut parent = self.cache.lock_root(LockType::Delete)?;
        let mut child = self.cache.lock(&parent, parent.node().child(0))?;
        let mut child_ordinal = 0;
        loop {
            if parent.node().is_root() {
                child = self.collapse_top(&mut parent, child)?;
            } else if child.node().count() <= self.minimum(child.node().is_leaf()) {
                child = self.join_child(&mut parent, child, child_ordinal, key)?;
            }
            if child.node().is_leaf() {
                drop(parent);
                return self.remove_at_leaf(child, key, strategy, log);
            }
            let (_, ordinal) = child
                .node()
                .binary_search(&*self.options.key_comparer, key);
            let next = self.cache.lock(&child, child.node().child(ordinal))?;
            parent = child;
            child = next;
            child_ordinal = ordinal;
        }
    }

    /// Shrinks the tree while the top node is an interior node with a single
    /// child.
    fn collapse_top(
        &self,
        root: &mut NodePin<K, V>,
        mut top: NodePin<K, V>,
    ) -> Result<NodePin<K, V>> {
        while !top.node().is_leaf() && top.node().count() == 1 {
            let below = self.cache.lock(&top, top.node().child(0))?;
            let old = top.handle();
            let mut tx = NodeTransaction::new(&*self.cache, None);
            tx.begin_update(root).set_root_child(old, below.handle());
            tx.destroy(top);
            tx.commit()?;
            self.stats.inc_root_collapses();
            trace!(%old, top = %below.handle(), "btree.collapse");
            top = below;
        }
        Ok(top)
    }

    /// Joins the under-full `child` with a sibling. Returns the node `key`
    /// now belongs to.
    fn join_child(
        &self,
        parent: &mut NodePin<K, V>,
        child: NodePin<K, V>,
        child_ordinal: usize,
        key: &K,
    ) -> Result<NodePin<K, V>> {
        let count = parent.node().count();
        if count < 2 {
            return Ok(child);
        }
        let child_is_left = child_ordinal + 1 < count;
        let left_ordinal = if child_is_left {
            child_ordinal
        } else {
            child_ordinal - 1
        };
        let sibling_ordinal = if child_is_left {
            child_ordinal + 1
        } else {
            child_ordinal - 1
        };
        let sibling = self.cache.lock(parent, parent.node().child(sibling_ordinal))?;
        let (left, right) = if child_is_left {
            (child, sibling)
        } else {
            (sibling, child)
        };

        let is_leaf = left.node().is_leaf();
        let (left_handle, right_handle) = (left.handle(), right.handle());
        let mut entries = left.node().entries().to_vec();
        let mut right_entries = right.node().entries().to_vec();
        if !is_leaf {
            let separator = parent
                .node()
                .key(left_ordinal + 1)
                .cloned()
                .ok_or(SylvaError::Corruption("interior entry without a separator"))?;
            if let Some(Element::Child { key, .. }) = right_entries.first_mut() {
                *key = Some(separator);
            }
        }
        entries.append(&mut right_entries);
        let total = entries.len();

        let mut tx = NodeTransaction::new(&*self.cache, None);
        if total <= self.fill(is_leaf) {
            let merged = tx.create(is_leaf, entries)?;
            let node = tx.begin_update(parent);
            node.replace_child(left_ordinal, left_handle, merged);
            node.remove(left_ordinal + 1);
            tx.destroy(left);
            tx.destroy(right);
            let mut created = tx.commit()?;
            self.stats.inc_merges();
            trace!(%left_handle, %right_handle, %merged, total, "btree.merge");
            return Ok(created.swap_remove(0));
        }

        let mut upper = entries.split_off(split_point(total, child_is_left));
        let separator = match &mut upper[0] {
            Element::Value { key, .. } => key.clone(),
            Element::Child { key, .. } => key
                .take()
                .ok_or(SylvaError::Corruption("interior entry without a separator"))?,
        };
        let new_left = tx.create(is_leaf, entries)?;
        let new_right = tx.create(is_leaf, upper)?;
        let node = tx.begin_update(parent);
        node.replace_child(left_ordinal, left_handle, new_left);
        node.replace_child(left_ordinal + 1, right_handle, new_right);
        node.replace_key(left_ordinal + 1, separator.clone());
        tx.destroy(left);
        tx.destroy(right);
        let mut created = tx.commit()?;
        self.stats.inc_redistributions();
        trace!(%new_left, %new_right, total, "btree.redistribute");

        if self.compare(key, &separator) == Ordering::Less {
            Ok(created.swap_remove(0))
        } else {
            Ok(created.swap_remove(1))
        }
    }

    fn remove_at_leaf<S>(
        &self,
        mut leaf: NodePin<K, V>,
        key: &K,
        strategy: &mut S,
        log: Option<&TransactionLog<K, V>>,
    ) -> Result<RemoveResult<V>>
    where
        S: RemoveValue<K, V> + ?Sized,
    {
        let (found, ordinal) = leaf
            .node()
            .binary_search(&*self.options.key_comparer, key);
        if !found {
            return Ok(RemoveResult::NotFound);
        }
        if !strategy.remove_value(key, leaf.node().value(ordinal)) {
            return Ok(RemoveResult::Ignored);
        }
        let mut tx = NodeTransaction::new(&*self.cache, log);
        tx.log_remove(key);
        let removed = tx.begin_update(&mut leaf).remove(ordinal);
        tx.commit()?;
        self.decrement_count();
        self.stats.inc_removes();
        match removed {
            Element::Value { value, .. } => Ok(RemoveResult::Removed(value)),
            Element::Child { .. } => Err(SylvaError::Corruption("leaf holds an interior entry")),
        }
    }
}

/// Size of the left half when `total` entries are redistributed; an odd
/// total favours the side the probe key is on.
fn split_point(total: usize, favour_left: bool) -> usize {
    if total % 2 == 1 && favour_left {
        total / 2 + 1
    } else {
        total / 2
    }
}

#[cfg(test)]
mod tests {
    use super::split_point;

    #[test]
    fn odd_totals_favour_the_requested_side() {
        assert_eq!(split_point(10, true), 5);
        assert_eq!(split_point(10, false), 5);
        assert_eq!(split_point(11, true), 6);
        assert_eq!(split_point(11, false), 5);
    }
}
