//! Tree configuration.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::primitives::concurrency::{LockTimeout, LockingKind};
use crate::primitives::wal::TransactionLogOptions;
use crate::storage::store::{CreatePolicy, NodeStorage, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::types::{Result, SylvaError};

/// Largest fan-out accepted for any node kind.
pub const MAX_FAN_OUT: usize = 1024;

/// Ordering used for keys.
pub type KeyComparer<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

/// Where nodes live.
#[derive(Clone)]
pub enum StorageType {
    /// Volatile in-process storage.
    Memory,
    /// A block file at [`BPlusTreeOptions::file_name`].
    Disk,
    /// Caller-provided storage.
    Custom(Arc<dyn NodeStorage>),
}

impl fmt::Debug for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Memory => f.write_str("Memory"),
            StorageType::Disk => f.write_str("Disk"),
            StorageType::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Which node cache strategy the tree uses.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Keep every node resident.
    All,
    /// Keep recently used nodes resident; the rest may be dropped.
    #[default]
    Recent,
    /// Cache locks only; node bodies are read from storage each time.
    None,
}

/// Options for opening a [`crate::BPlusTree`].
pub struct BPlusTreeOptions<K, V> {
    /// Node storage.
    pub storage: StorageType,
    /// File used by [`StorageType::Disk`].
    pub file_name: Option<PathBuf>,
    /// Creation policy for the storage file.
    pub create_file: CreatePolicy,
    /// Block size for new storage files.
    pub file_block_size: u32,
    /// Open the tree without write access.
    pub read_only: bool,
    /// Node cache strategy.
    pub cache_policy: CachePolicy,
    /// Entries always retained by the recent-node keep-alive.
    pub cache_keep_alive_minimum_history: usize,
    /// Upper bound of the recent-node keep-alive.
    pub cache_keep_alive_maximum_history: usize,
    /// Age after which keep-alive entries beyond the minimum are dropped.
    pub cache_keep_alive_timeout: Duration,
    /// Whole-tree lock taken by every public call.
    pub call_level_lock: LockingKind,
    /// Lock kind created for each node.
    pub locking_factory: LockingKind,
    /// Timeout for every lock acquisition.
    pub lock_timeout: LockTimeout,
    /// Interior node capacity.
    pub maximum_child_nodes: usize,
    /// Interior node lower bound.
    pub minimum_child_nodes: usize,
    /// Leaf capacity.
    pub maximum_value_nodes: usize,
    /// Leaf lower bound.
    pub minimum_value_nodes: usize,
    /// Optional write-ahead transaction log.
    pub transaction_log: Option<TransactionLogOptions>,
    /// Key ordering.
    pub key_comparer: KeyComparer<K>,
    _marker: PhantomData<fn() -> V>,
}

impl<K: Ord + 'static, V> BPlusTreeOptions<K, V> {
    /// Defaults with keys ordered by [`Ord`].
    pub fn new() -> Self {
        Self::with_comparer(|a: &K, b: &K| a.cmp(b))
    }
}

impl<K: Ord + 'static, V> Default for BPlusTreeOptions<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> BPlusTreeOptions<K, V> {
    /// Defaults with a custom key ordering.
    pub fn with_comparer<F>(comparer: F) -> Self
    where
        F: Fn(&K, &K) -> Ordering + Send + Sync + 'static,
    {
        Self {
            storage: StorageType::Memory,
            file_name: None,
            create_file: CreatePolicy::IfNeeded,
            file_block_size: DEFAULT_BLOCK_SIZE,
            read_only: false,
            cache_policy: CachePolicy::Recent,
            cache_keep_alive_minimum_history: 10,
            cache_keep_alive_maximum_history: 100,
            cache_keep_alive_timeout: Duration::from_secs(60),
            call_level_lock: LockingKind::Ignore,
            locking_factory: LockingKind::ReaderWriter,
            lock_timeout: LockTimeout::default(),
            maximum_child_nodes: 32,
            minimum_child_nodes: 12,
            maximum_value_nodes: 32,
            minimum_value_nodes: 8,
            transaction_log: None,
            key_comparer: Arc::new(comparer),
            _marker: PhantomData,
        }
    }

    /// Uses a block file at `path`.
    pub fn disk(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage = StorageType::Disk;
        self.file_name = Some(path.into());
        self
    }

    /// Uses caller-provided storage.
    pub fn custom_storage(mut self, storage: Arc<dyn NodeStorage>) -> Self {
        self.storage = StorageType::Custom(storage);
        self
    }

    /// Sets the file creation policy.
    pub fn create_file(mut self, policy: CreatePolicy) -> Self {
        self.create_file = policy;
        self
    }

    /// Sets the block size for new files.
    pub fn file_block_size(mut self, bytes: u32) -> Self {
        self.file_block_size = bytes;
        self
    }

    /// Opens without write access.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Selects the node cache strategy.
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Configures the recent-node keep-alive.
    pub fn cache_keep_alive(mut self, minimum: usize, maximum: usize, timeout: Duration) -> Self {
        self.cache_keep_alive_minimum_history = minimum;
        self.cache_keep_alive_maximum_history = maximum;
        self.cache_keep_alive_timeout = timeout;
        self
    }

    /// Sets the whole-tree call lock.
    pub fn call_level_lock(mut self, kind: LockingKind) -> Self {
        self.call_level_lock = kind;
        self
    }

    /// Sets the per-node lock kind.
    pub fn locking_factory(mut self, kind: LockingKind) -> Self {
        self.locking_factory = kind;
        self
    }

    /// Sets the lock acquisition timeout.
    pub fn lock_timeout(mut self, timeout: LockTimeout) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets interior fan-out bounds.
    pub fn child_nodes(mut self, minimum: usize, maximum: usize) -> Self {
        self.minimum_child_nodes = minimum;
        self.maximum_child_nodes = maximum;
        self
    }

    /// Sets leaf fan-out bounds.
    pub fn value_nodes(mut self, minimum: usize, maximum: usize) -> Self {
        self.minimum_value_nodes = minimum;
        self.maximum_value_nodes = maximum;
        self
    }

    /// Attaches a transaction log.
    pub fn transaction_log(mut self, log: TransactionLogOptions) -> Self {
        self.transaction_log = Some(log);
        self
    }

    /// Merge target for interior nodes.
    pub fn fill_children(&self) -> usize {
        fill_target(self.minimum_child_nodes, self.maximum_child_nodes)
    }

    /// Merge target for leaves.
    pub fn fill_values(&self) -> usize {
        fill_target(self.minimum_value_nodes, self.maximum_value_nodes)
    }

    /// Checks every setting; called when a tree is opened.
    pub fn validate(&self) -> Result<()> {
        check_fan_out("child", self.minimum_child_nodes, self.maximum_child_nodes)?;
        check_fan_out("value", self.minimum_value_nodes, self.maximum_value_nodes)?;
        if self.cache_keep_alive_maximum_history < self.cache_keep_alive_minimum_history {
            return Err(SylvaError::Invalid(
                "keep-alive maximum history is below the minimum",
            ));
        }
        match &self.storage {
            StorageType::Disk => {
                if self.file_name.is_none() {
                    return Err(SylvaError::Invalid("disk storage requires a file name"));
                }
                if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.file_block_size) {
                    return Err(SylvaError::InvalidOwned(format!(
                        "file block size {} outside {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}",
                        self.file_block_size
                    )));
                }
                if self.read_only && self.create_file == CreatePolicy::Always {
                    return Err(SylvaError::Invalid("read-only trees cannot recreate their file"));
                }
            }
            StorageType::Memory => {
                if self.read_only {
                    return Err(SylvaError::Invalid("read-only requires an existing file"));
                }
            }
            StorageType::Custom(_) => {}
        }
        if self.read_only && self.transaction_log.is_some() {
            return Err(SylvaError::Invalid("read-only trees cannot keep a transaction log"));
        }
        Ok(())
    }
}

fn fill_target(minimum: usize, maximum: usize) -> usize {
    (2 * minimum + 1).max(maximum * 3 / 4).min(maximum)
}

fn check_fan_out(kind: &str, minimum: usize, maximum: usize) -> Result<()> {
    if minimum < 2 {
        return Err(SylvaError::InvalidOwned(format!(
            "minimum {kind} nodes must be at least 2, got {minimum}"
        )));
    }
    if maximum < 2 * minimum + 1 {
        return Err(SylvaError::InvalidOwned(format!(
            "maximum {kind} nodes must be at least {}, got {maximum}",
            2 * minimum + 1
        )));
    }
    if maximum > MAX_FAN_OUT {
        return Err(SylvaError::InvalidOwned(format!(
            "maximum {kind} nodes must be at most {MAX_FAN_OUT}, got {maximum}"
        )));
    }
    Ok(())
}

impl<K, V> Clone for BPlusTreeOptions<K, V> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            file_name: self.file_name.clone(),
            create_file: self.create_file,
            file_block_size: self.file_block_size,
            read_only: self.read_only,
            cache_policy: self.cache_policy,
            cache_keep_alive_minimum_history: self.cache_keep_alive_minimum_history,
            cache_keep_alive_maximum_history: self.cache_keep_alive_maximum_history,
            cache_keep_alive_timeout: self.cache_keep_alive_timeout,
            call_level_lock: self.call_level_lock,
            locking_factory: self.locking_factory,
            lock_timeout: self.lock_timeout,
            maximum_child_nodes: self.maximum_child_nodes,
            minimum_child_nodes: self.minimum_child_nodes,
            maximum_value_nodes: self.maximum_value_nodes,
            minimum_value_nodes: self.minimum_value_nodes,
            transaction_log: self.transaction_log.clone(),
            key_comparer: Arc::clone(&self.key_comparer),
            _marker: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for BPlusTreeOptions<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BPlusTreeOptions")
            .field("storage", &self.storage)
            .field("file_name", &self.file_name)
            .field("create_file", &self.create_file)
            .field("file_block_size", &self.file_block_size)
            .field("read_only", &self.read_only)
            .field("cache_policy", &self.cache_policy)
            .field("call_level_lock", &self.call_level_lock)
            .field("locking_factory", &self.locking_factory)
            .field("lock_timeout", &self.lock_timeout)
            .field("child_nodes", &(self.minimum_child_nodes, self.maximum_child_nodes))
            .field("value_nodes", &(self.minimum_value_nodes, self.maximum_value_nodes))
            .field("transaction_log", &self.transaction_log)
            .finish_non_exhaustive()
    }
}
