//! Sylva: a concurrent, disk-backed B+ tree.
//!
//! [`BPlusTree`] is an ordered map that can live in memory, in a block file
//! or in caller-provided storage. Concurrent callers share the tree by
//! reference; value changes can be recorded in a write-ahead transaction log
//! and replayed after a crash.

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::concurrency::{LockTimeout, LockingKind};
pub use primitives::wal::{ExistingLogAction, TransactionLogOptions};
pub use storage::btree::{
    BPlusTree, BPlusTreeOptions, BTreeStats, BulkInsertOptions, CachePolicy, DuplicateHandling,
    Entries, InsertResult, KeyCodec, RemoveResult, StorageType, ValCodec,
};
pub use storage::store::{CreatePolicy, FileStorage, MemoryStorage, NodeStorage};
pub use types::{Result, SylvaError};
