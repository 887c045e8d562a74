#![forbid(unsafe_code)]

//! Concurrent copy-on-write B+ tree.
//!
//! Nodes are frozen once published; writers clone, mutate and publish
//! through a node transaction while readers keep seeing the previous
//! version. Node bodies are held by one of three caches selected by
//! [`CachePolicy`].

mod cache;
/// Encoding and decoding utilities for keys and values.
pub mod codecs;
mod cursor;
mod handle;
mod node;
mod ops;
mod options;
mod pin;
mod serializer;
mod stats;
mod transaction;
mod tree;

pub use codecs::{KeyCodec, ValCodec};
pub use cursor::{Entries, Keys};
pub use handle::NodeHandle;
pub use node::{Element, Node};
pub use ops::{
    AddOnly, AddOrUpdateWith, CreateOrUpdateValue, FnCreate, FnUpdate, InsertResult, RemoveResult,
    RemoveValue, UpdateIf, UpdateOnly, Upsert,
};
pub use options::{BPlusTreeOptions, CachePolicy, KeyComparer, StorageType, MAX_FAN_OUT};
pub use serializer::NodeSerializer;
pub use stats::{BTreeStats, BTreeStatsSnapshot};
#[cfg(feature = "validate")]
pub use tree::TreeReport;
pub use tree::{BPlusTree, BulkInsertOptions, DuplicateHandling, FileEntries, ScannedEntries};

#[cfg(test)]
mod tests;
