//! In-memory node representation.
//!
//! A node is a bounded, sorted array of [`Element`]s. Leaves carry values;
//! interior nodes carry child handles and their index-0 key is absent
//! (it stands for "everything below the first separator"). The root holder is
//! a capacity-1 interior node whose single entry points at the top node.
//!
//! Published nodes are frozen ([`Node::is_read_only`]); mutation always
//! happens on a [`Node::clone_for_write`] copy owned by one transaction.
//! Contract violations here are engine bugs and panic.

use std::cmp::Ordering;

use super::handle::NodeHandle;

/// One key-plus-payload slot of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Element<K, V> {
    /// Leaf entry.
    Value {
        /// Entry key.
        key: K,
        /// Entry value.
        value: V,
    },
    /// Interior entry; `key` is `None` only at ordinal 0.
    Child {
        /// Smallest key reachable through `child`, or `None` at ordinal 0.
        key: Option<K>,
        /// Child node.
        child: NodeHandle,
    },
}

impl<K, V> Element<K, V> {
    /// The entry key, if it has one.
    pub fn key(&self) -> Option<&K> {
        match self {
            Element::Value { key, .. } => Some(key),
            Element::Child { key, .. } => key.as_ref(),
        }
    }

    /// Returns true for leaf entries.
    pub fn is_value(&self) -> bool {
        matches!(self, Element::Value { .. })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum NodeState {
    Writable,
    ReadOnly,
}

/// A fixed-capacity sorted array of entries.
#[derive(Debug)]
pub struct Node<K, V> {
    handle: NodeHandle,
    entries: Vec<Element<K, V>>,
    capacity: usize,
    is_leaf: bool,
    is_root: bool,
    version: u64,
    state: NodeState,
}

impl<K: Clone, V: Clone> Node<K, V> {
    /// Creates an empty writable node.
    pub fn new(handle: NodeHandle, capacity: usize, is_leaf: bool) -> Self {
        assert!(capacity >= 2, "node capacity below 2");
        Self {
            handle,
            entries: Vec::with_capacity(capacity),
            capacity,
            is_leaf,
            is_root: false,
            version: 0,
            state: NodeState::Writable,
        }
    }

    /// Creates a writable node holding `entries`.
    pub fn from_entries(
        handle: NodeHandle,
        capacity: usize,
        is_leaf: bool,
        entries: Vec<Element<K, V>>,
    ) -> Self {
        let mut node = Self::new(handle, capacity, is_leaf);
        assert!(entries.len() <= capacity, "entries exceed node capacity");
        assert!(
            entries.iter().all(|e| e.is_value() == is_leaf),
            "mixed leaf and interior entries"
        );
        node.entries = entries;
        node
    }

    /// Creates a writable root holder pointing at `child`.
    pub fn new_root(handle: NodeHandle, child: NodeHandle) -> Self {
        Self {
            handle,
            entries: vec![Element::Child { key: None, child }],
            capacity: 1,
            is_leaf: false,
            is_root: true,
            version: 0,
            state: NodeState::Writable,
        }
    }

    /// Storage identity of this node.
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// Number of entries.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if no more entries fit.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Returns true for leaves.
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Returns true for the root holder.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Copy-on-write generation of this node.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns true once the node has been frozen.
    pub fn is_read_only(&self) -> bool {
        self.state == NodeState::ReadOnly
    }

    /// Freezes the node.
    pub fn mark_read_only(&mut self) {
        self.state = NodeState::ReadOnly;
    }

    /// Returns an independent writable copy one version ahead.
    pub fn clone_for_write(&self) -> Self {
        Self {
            handle: self.handle,
            entries: self.entries.clone(),
            capacity: self.capacity,
            is_leaf: self.is_leaf,
            is_root: self.is_root,
            version: self.version + 1,
            state: NodeState::Writable,
        }
    }

    /// Entry at `ordinal`.
    pub fn get(&self, ordinal: usize) -> &Element<K, V> {
        &self.entries[ordinal]
    }

    /// All entries in order.
    pub fn entries(&self) -> &[Element<K, V>] {
        &self.entries
    }

    /// Consumes the node, returning its entries.
    pub fn into_entries(self) -> Vec<Element<K, V>> {
        self.entries
    }

    /// Key at `ordinal`; `None` for interior ordinal 0.
    pub fn key(&self, ordinal: usize) -> Option<&K> {
        self.entries[ordinal].key()
    }

    /// Child handle at `ordinal` of an interior node.
    pub fn child(&self, ordinal: usize) -> NodeHandle {
        match &self.entries[ordinal] {
            Element::Child { child, .. } => *child,
            Element::Value { .. } => panic!("child requested from a leaf entry"),
        }
    }

    /// Value at `ordinal` of a leaf.
    pub fn value(&self, ordinal: usize) -> &V {
        match &self.entries[ordinal] {
            Element::Value { value, .. } => value,
            Element::Child { .. } => panic!("value requested from an interior entry"),
        }
    }

    /// Locates `probe`.
    ///
    /// Leaves return `(true, ordinal)` on an exact match, otherwise the
    /// insertion point. Interior nodes always return a descent ordinal: the
    /// last entry whose key is `<= probe`, clamped to 0. The root holder
    /// always answers ordinal 0.
    pub fn binary_search<F>(&self, compare: F, probe: &K) -> (bool, usize)
    where
        F: Fn(&K, &K) -> Ordering,
    {
        if self.is_root {
            return (true, 0);
        }
        let start = usize::from(!self.is_leaf);
        if self.entries.len() <= start {
            return (false, 0);
        }
        let searched = self.entries[start..].binary_search_by(|entry| match entry.key() {
            Some(key) => compare(key, probe),
            None => Ordering::Less,
        });
        match (searched, self.is_leaf) {
            (Ok(pos), _) => (true, pos + start),
            (Err(pos), true) => (false, pos),
            (Err(pos), false) => (false, pos + start - 1),
        }
    }

    fn assert_mutable(&self) {
        assert!(
            self.state == NodeState::Writable,
            "mutation of read-only node {}",
            self.handle
        );
    }

    fn assert_mutable_non_root(&self) {
        self.assert_mutable();
        assert!(!self.is_root, "entry mutation on root holder {}", self.handle);
    }

    /// Inserts `element` at `ordinal`.
    pub fn insert(&mut self, ordinal: usize, element: Element<K, V>) {
        self.assert_mutable_non_root();
        assert!(ordinal <= self.entries.len(), "insert ordinal out of bounds");
        assert!(!self.is_full(), "insert into full node {}", self.handle);
        assert_eq!(element.is_value(), self.is_leaf, "entry kind mismatch");
        self.entries.insert(ordinal, element);
    }

    /// Removes and returns the entry at `ordinal`.
    pub fn remove(&mut self, ordinal: usize) -> Element<K, V> {
        self.assert_mutable_non_root();
        assert!(ordinal < self.entries.len(), "remove ordinal out of bounds");
        let removed = self.entries.remove(ordinal);
        if !self.is_leaf && ordinal == 0 {
            if let Some(Element::Child { key, .. }) = self.entries.first_mut() {
                *key = None;
            }
        }
        removed
    }

    /// Repoints the child at `ordinal` from `expected` to `child`.
    pub fn replace_child(&mut self, ordinal: usize, expected: NodeHandle, child: NodeHandle) {
        self.assert_mutable();
        assert!(ordinal < self.entries.len(), "replace ordinal out of bounds");
        match &mut self.entries[ordinal] {
            Element::Child { child: slot, .. } => {
                assert_eq!(*slot, expected, "replace_child found an unexpected child");
                *slot = child;
            }
            Element::Value { .. } => panic!("replace_child on a leaf"),
        }
    }

    /// Replaces the separator key at `ordinal` of an interior node.
    pub fn replace_key(&mut self, ordinal: usize, new_key: K) {
        self.assert_mutable_non_root();
        assert!(ordinal > 0, "interior ordinal 0 carries no key");
        assert!(ordinal < self.entries.len(), "replace ordinal out of bounds");
        match &mut self.entries[ordinal] {
            Element::Child { key, .. } => *key = Some(new_key),
            Element::Value { .. } => panic!("replace_key on a leaf"),
        }
    }

    /// Overwrites the value at `ordinal` of a leaf.
    pub fn set_value(&mut self, ordinal: usize, new_value: V) {
        self.assert_mutable_non_root();
        assert!(ordinal < self.entries.len(), "set_value ordinal out of bounds");
        match &mut self.entries[ordinal] {
            Element::Value { value, .. } => *value = new_value,
            Element::Child { .. } => panic!("set_value on an interior entry"),
        }
    }

    /// Repoints the root holder at a new top node.
    pub fn set_root_child(&mut self, expected: NodeHandle, child: NodeHandle) {
        assert!(self.is_root, "set_root_child on a non-root node");
        self.replace_child(0, expected, child);
    }
}
