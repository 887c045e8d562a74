//! Low-level building blocks shared by the tree and its storage.

/// Varint and slice helpers for node and log images.
pub mod bytes;

/// Pluggable lock strategies.
pub mod concurrency;

/// Positional file I/O.
pub mod io;

/// Value-level transaction log.
pub mod wal;
