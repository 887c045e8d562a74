#![forbid(unsafe_code)]
//! Physical homes for node images.
//!
//! The tree serializes nodes itself; a [`NodeStorage`] only allocates
//! handles and moves opaque byte images in and out.

use crate::types::{Result, StorageHandle, SylvaError};

mod file;
mod memory;

pub use file::{
    CreatePolicy, FileStorage, FileStorageOptions, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
};
pub use memory::MemoryStorage;

/// Storage contract consumed by the tree.
pub trait NodeStorage: Send + Sync {
    /// Returns the root holder's handle and whether it was just created.
    fn open_root(&self) -> Result<(StorageHandle, bool)>;

    /// Allocates a handle for a new node.
    fn create(&self) -> Result<StorageHandle>;

    /// Returns the image stored under `handle`, if one has been written.
    fn try_get_node(&self, handle: StorageHandle) -> Result<Option<Vec<u8>>>;

    /// Replaces the image stored under `handle`.
    fn update(&self, handle: StorageHandle, image: &[u8]) -> Result<()>;

    /// Releases `handle`; storage may hand the slot out again later.
    fn destroy(&self, handle: StorageHandle) -> Result<()>;

    /// Drops every node, including the root holder.
    fn reset(&self) -> Result<()>;

    /// Makes all prior writes durable.
    fn commit(&self) -> Result<()>;

    /// Discards writes since the last commit.
    fn rollback(&self) -> Result<()> {
        Err(SylvaError::Unsupported("storage rollback"))
    }

    /// Returns true if content survives process exit.
    fn is_durable(&self) -> bool;
}
