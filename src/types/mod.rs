#![forbid(unsafe_code)]
//! Shared identifiers, errors and checksums.

use std::fmt;

mod checksum;

pub use checksum::{block_crc32, Checksum, Crc32};

/// Durable location of a node inside a [`crate::storage::store::NodeStorage`].
///
/// Handles are issued by storage and compared by value. A destroyed handle may
/// be handed out again by storage for a brand-new node.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct StorageHandle(pub u64);

impl fmt::Display for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors produced by the engine.
#[derive(thiserror::Error, Debug)]
pub enum SylvaError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted data failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Persisted data failed validation (dynamic message).
    #[error("corruption: {0}")]
    CorruptionOwned(String),
    /// Invalid option or argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Invalid option or argument (dynamic message).
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// The requested key does not exist.
    #[error("key not found")]
    NotFound,
    /// The key already exists and updates were not allowed.
    #[error("duplicate key")]
    DuplicateKey,
    /// A lock could not be acquired within the configured timeout.
    #[error("deadlock: lock not acquired within {timeout_ms} ms")]
    Deadlock {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },
    /// A mutation was attempted on a read-only tree.
    #[error("tree is read-only")]
    ReadOnly,
    /// The operation is not available for this configuration.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl SylvaError {
    /// Returns true for errors that indicate damaged persisted state.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SylvaError::Corruption(_) | SylvaError::CorruptionOwned(_)
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SylvaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        assert!(SylvaError::Corruption("x").is_corruption());
        assert!(SylvaError::CorruptionOwned("y".into()).is_corruption());
        assert!(!SylvaError::NotFound.is_corruption());
    }
}
