//! Tree engine and the storage it persists to.

/// The B+ tree and its node caches.
pub mod btree;

/// Node storage backends.
pub mod store;
