//! Read paths: point lookups, edges and enumeration pages.

use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::node::{Element, Node};
use crate::storage::btree::pin::{LockType, NodePin};
use crate::types::Result;

use super::BPlusTree;

/// Where an enumeration page starts.
#[derive(Clone, Debug)]
pub(crate) enum Seek<K> {
    First,
    From(K),
}

/// One leaf's worth of entries plus the key the following leaf starts at.
pub(crate) struct Page<K, V> {
    pub(crate) entries: Vec<(K, V)>,
    pub(crate) next: Option<K>,
}

impl<K: KeyCodec, V: ValCodec> BPlusTree<K, V> {
    /// Descends to the leaf responsible for `key` and hands it to `visit`
    /// together with the search result.
    pub(super) fn seek<R>(
        &self,
        key: &K,
        visit: impl FnOnce(&Node<K, V>, bool, usize) -> R,
    ) -> Result<R> {
        let _call = self.read_call()?;
        self.stats.inc_lookups();
        let comparer = &*self.options.key_comparer;
        let mut pin = self.cache.lock_root(LockType::Read)?;
        loop {
            let node = pin.node();
            let (found, ordinal) = node.binary_search(comparer, key);
            if node.is_leaf() {
                return Ok(visit(node, found, ordinal));
            }
            let next = self.cache.lock(&pin, node.child(ordinal))?;
            pin = next;
        }
    }

    /// The first or last entry of the tree.
    pub(super) fn edge(&self, first: bool) -> Result<Option<(K, V)>> {
        let _call = self.read_call()?;
        self.stats.inc_lookups();
        let mut pin = self.cache.lock_root(LockType::Read)?;
        loop {
            let node = pin.node();
            if node.count() == 0 {
                return Ok(None);
            }
            let ordinal = if first { 0 } else { node.count() - 1 };
            if node.is_leaf() {
                return Ok(Some(entry_at(node, ordinal)));
            }
            let next = self.cache.lock(&pin, node.child(ordinal))?;
            pin = next;
        }
    }

    /// Reads the leaf that `seek` lands on, from the seek position onward.
    pub(crate) fn read_page(&self, seek: &Seek<K>) -> Result<Page<K, V>> {
        let _call = self.read_call()?;
        let comparer = &*self.options.key_comparer;
        let mut pin: NodePin<K, V> = self.cache.lock_root(LockType::Read)?;
        let mut next = None;
        loop {
            let node = pin.node();
            let ordinal = match seek {
                Seek::First => 0,
                Seek::From(key) => node.binary_search(comparer, key).1,
            };
            if node.is_leaf() {
                let entries = (ordinal..node.count()).map(|i| entry_at(node, i)).collect();
                return Ok(Page { entries, next });
            }
            if ordinal + 1 < node.count() {
                next = node.key(ordinal + 1).cloned();
            }
            let child = self.cache.lock(&pin, node.child(ordinal))?;
            pin = child;
        }
    }
}

fn entry_at<K: Clone, V: Clone>(node: &Node<K, V>, ordinal: usize) -> (K, V) {
    match node.get(ordinal) {
        Element::Value { key, value } => (key.clone(), value.clone()),
        Element::Child { .. } => panic!("leaf holds an interior entry"),
    }
}
