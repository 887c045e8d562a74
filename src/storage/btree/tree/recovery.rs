//! Offline access to tree files.
//!
//! These paths open the block file read-only and decode nodes directly,
//! without a cache, locks or a transaction log.

use std::cmp::Ordering;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::vec;

use tracing::{info, warn};

use crate::primitives::io::not_found_to_none;
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::handle::NodeHandle;
use crate::storage::btree::node::{Element, Node};
use crate::storage::btree::options::{BPlusTreeOptions, StorageType};
use crate::storage::btree::serializer::NodeSerializer;
use crate::storage::store::{CreatePolicy, FileStorage, FileStorageOptions, NodeStorage};
use crate::types::{Result, StorageHandle, SylvaError};

use super::{BPlusTree, BulkInsertOptions, DuplicateHandling};

/// Depth-first walk over the entries of a tree file.
pub struct FileEntries<K, V> {
    storage: FileStorage,
    serializer: NodeSerializer<K, V>,
    stack: Vec<(Node<K, V>, usize)>,
    leaf: vec::IntoIter<(K, V)>,
    failed: bool,
}

impl<K: KeyCodec, V: ValCodec> FileEntries<K, V> {
    fn load(&self, handle: NodeHandle) -> Result<Node<K, V>> {
        let image = self
            .storage
            .try_get_node(handle.storage())?
            .ok_or_else(|| SylvaError::CorruptionOwned(format!("no image stored for {handle}")))?;
        self.serializer.read(handle, &image)
    }

    fn advance(&mut self) -> Result<bool> {
        let Some((node, next)) = self.stack.last_mut() else {
            return Ok(false);
        };
        if *next >= node.count() {
            self.stack.pop();
            return Ok(true);
        }
        let child = node.child(*next);
        *next += 1;
        let child = self.load(child)?;
        if child.is_leaf() {
            self.leaf = leaf_entries(child).into_iter();
        } else {
            self.stack.push((child, 0));
        }
        Ok(true)
    }
}

impl<K: KeyCodec, V: ValCodec> Iterator for FileEntries<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.leaf.next() {
                return Some(Ok(entry));
            }
            if self.failed {
                return None;
            }
            match self.advance() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Entries of every decodable leaf image in a file, in file order.
pub struct ScannedEntries<K, V> {
    storage: FileStorage,
    serializer: NodeSerializer<K, V>,
    heads: vec::IntoIter<StorageHandle>,
    leaf: vec::IntoIter<(K, V)>,
    skipped: usize,
}

impl<K, V> ScannedEntries<K, V> {
    /// Number of head blocks that could not be decoded so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<K: KeyCodec, V: ValCodec> Iterator for ScannedEntries<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.leaf.next() {
                return Some(entry);
            }
            let handle = NodeHandle::new(self.heads.next()?);
            let decoded = self
                .storage
                .try_get_node(handle.storage())
                .and_then(|image| match image {
                    Some(image) => self.serializer.read(handle, &image).map(Some),
                    None => Ok(None),
                });
            match decoded {
                Ok(Some(node)) if node.is_leaf() => {
                    self.leaf = leaf_entries(node).into_iter();
                }
                Ok(_) => {}
                Err(err) => {
                    self.skipped += 1;
                    warn!(%handle, error = %err, "btree.recovery.skip");
                }
            }
        }
    }
}

impl<K: KeyCodec, V: ValCodec> BPlusTree<K, V> {
    /// Walks a tree file without opening a tree.
    pub fn enumerate_file(options: &BPlusTreeOptions<K, V>) -> Result<FileEntries<K, V>> {
        let storage = open_read_only(options)?;
        let serializer = serializer_for(options);
        let (root, is_new) = storage.open_root()?;
        if is_new {
            return Err(SylvaError::Corruption("file holds no root node"));
        }
        let mut entries = FileEntries {
            storage,
            serializer,
            stack: Vec::new(),
            leaf: Vec::new().into_iter(),
            failed: false,
        };
        let root = entries.load(NodeHandle::new(root))?;
        entries.stack.push((root, 0));
        Ok(entries)
    }

    /// Reads every leaf block of a file, ignoring the tree structure.
    ///
    /// Blocks that fail to decode are skipped with a warning.
    pub fn recovery_scan(options: &BPlusTreeOptions<K, V>) -> Result<ScannedEntries<K, V>> {
        let storage = open_read_only(options)?;
        let heads = storage.scan_heads()?;
        Ok(ScannedEntries {
            serializer: serializer_for(options),
            storage,
            heads: heads.into_iter(),
            leaf: Vec::new().into_iter(),
            skipped: 0,
        })
    }

    /// Rebuilds a damaged file from its readable leaves.
    ///
    /// The original is kept as `<name>.bak`. Returns the number of entries
    /// recovered.
    pub fn recover_file(options: &BPlusTreeOptions<K, V>) -> Result<u64> {
        let path = file_name(options)?;
        let scan = Self::recovery_scan(options)?;
        let mut entries: Vec<(K, V)> = scan.collect();
        let comparer = &*options.key_comparer;
        entries.sort_by(|a, b| comparer(&a.0, &b.0));
        entries.dedup_by(|later, earlier| comparer(&later.0, &earlier.0) == Ordering::Equal);
        if entries.is_empty() {
            warn!(path = %path.display(), "btree.recovery.empty");
            return Ok(0);
        }

        let rebuilt = sibling_path(&path, "recover");
        not_found_to_none(fs::remove_file(&rebuilt))?;
        let recovered = {
            let mut rebuild = options.clone();
            rebuild.storage = StorageType::Disk;
            rebuild.file_name = Some(rebuilt.clone());
            rebuild.create_file = CreatePolicy::Always;
            rebuild.read_only = false;
            rebuild.transaction_log = None;
            let tree = BPlusTree::open(rebuild)?;
            let bulk = BulkInsertOptions::default()
                .input_is_sorted(true)
                .duplicate_handling(DuplicateHandling::FirstValueWins)
                .commit_on_completion(true)
                .replace_contents(true);
            tree.bulk_insert(entries, &bulk)?
        };

        let backup = sibling_path(&path, "bak");
        not_found_to_none(fs::remove_file(&backup))?;
        fs::rename(&path, &backup)?;
        if let Err(err) = fs::rename(&rebuilt, &path) {
            warn!(path = %path.display(), error = %err, "btree.recovery.swap_failed");
            fs::rename(&backup, &path)?;
            return Err(err.into());
        }
        info!(path = %path.display(), entries = recovered, "btree.recovery.done");
        Ok(recovered)
    }
}

fn file_name<K, V>(options: &BPlusTreeOptions<K, V>) -> Result<PathBuf> {
    options
        .file_name
        .clone()
        .ok_or(SylvaError::Invalid("offline access requires a file name"))
}

fn open_read_only<K, V>(options: &BPlusTreeOptions<K, V>) -> Result<FileStorage> {
    FileStorage::open(&FileStorageOptions {
        path: file_name(options)?,
        block_size: options.file_block_size,
        create: CreatePolicy::Never,
        read_only: true,
    })
}

fn serializer_for<K: KeyCodec, V: ValCodec>(
    options: &BPlusTreeOptions<K, V>,
) -> NodeSerializer<K, V> {
    NodeSerializer::new(options.maximum_child_nodes, options.maximum_value_nodes)
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn leaf_entries<K: Clone, V: Clone>(node: Node<K, V>) -> Vec<(K, V)> {
    node.into_entries()
        .into_iter()
        .filter_map(|element| match element {
            Element::Value { key, value } => Some((key, value)),
            Element::Child { .. } => None,
        })
        .collect()
}
