//! Node image format.
//!
//! ```text
//! [storage handle: varint][is_leaf: u8][is_root: u8][count: varint]
//! then `count` entries:
//!   leaf:     key, value
//!   interior: key (absent at ordinal 0), child handle: varint
//! ```

use std::marker::PhantomData;

use crate::primitives::bytes::{buf, var};
use crate::types::{Result, StorageHandle, SylvaError};

use super::codecs::{KeyCodec, ValCodec};
use super::handle::NodeHandle;
use super::node::{Element, Node};

/// Encodes and decodes node images for one tree.
#[derive(Clone, Debug)]
pub struct NodeSerializer<K, V> {
    max_children: usize,
    max_values: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> NodeSerializer<K, V> {
    /// Serializer for nodes of the given capacities.
    pub fn new(max_children: usize, max_values: usize) -> Self {
        Self {
            max_children,
            max_values,
            _marker: PhantomData,
        }
    }

    /// Interior node capacity.
    pub fn max_children(&self) -> usize {
        self.max_children
    }

    /// Leaf capacity.
    pub fn max_values(&self) -> usize {
        self.max_values
    }

    /// Writes the image of `node`.
    pub fn write(&self, node: &Node<K, V>) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + node.count() * 16);
        var::encode_u64(node.handle().storage().0, &mut out);
        out.push(u8::from(node.is_leaf()));
        out.push(u8::from(node.is_root()));
        var::encode_u64(node.count() as u64, &mut out);
        for (ordinal, entry) in node.entries().iter().enumerate() {
            match entry {
                Element::Value { key, value } => {
                    K::encode_key(key, &mut out);
                    V::encode_val(value, &mut out);
                }
                Element::Child { key, child } => {
                    if ordinal > 0 {
                        if let Some(key) = key {
                            K::encode_key(key, &mut out);
                        }
                    }
                    var::encode_u64(child.storage().0, &mut out);
                }
            }
        }
        out
    }

    /// Reads an image stored under `expected`; the node comes back frozen.
    pub fn read(&self, expected: NodeHandle, image: &[u8]) -> Result<Node<K, V>> {
        let mut src = image;
        let stored = StorageHandle(var::decode_u64(&mut src)?);
        if stored != expected.storage() {
            return Err(SylvaError::CorruptionOwned(format!(
                "node image for {} found under {}",
                stored,
                expected.storage()
            )));
        }
        let is_leaf = buf::read_bool(&mut src)?;
        let is_root = buf::read_bool(&mut src)?;
        let count = var::decode_len(&mut src)?;

        let mut node = if is_root {
            if is_leaf || count != 1 {
                return Err(SylvaError::Corruption("malformed root holder image"));
            }
            let child = NodeHandle::new(StorageHandle(var::decode_u64(&mut src)?));
            Node::new_root(expected, child)
        } else {
            let capacity = if is_leaf {
                self.max_values
            } else {
                self.max_children
            };
            if count > capacity {
                return Err(SylvaError::Corruption("node count exceeds capacity"));
            }
            let mut entries = Vec::with_capacity(count);
            for ordinal in 0..count {
                if is_leaf {
                    let key = K::decode_key(&mut src)?;
                    let value = V::decode_val(&mut src)?;
                    entries.push(Element::Value { key, value });
                } else {
                    let key = if ordinal == 0 {
                        None
                    } else {
                        Some(K::decode_key(&mut src)?)
                    };
                    let child = NodeHandle::new(StorageHandle(var::decode_u64(&mut src)?));
                    entries.push(Element::Child { key, child });
                }
            }
            Node::from_entries(expected, capacity, is_leaf, entries)
        };
        if !src.is_empty() {
            return Err(SylvaError::Corruption("trailing bytes after node image"));
        }
        node.mark_read_only();
        Ok(node)
    }
}
