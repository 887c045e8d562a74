use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::NodeStorage;
use crate::types::{Result, StorageHandle, SylvaError};

const ROOT: StorageHandle = StorageHandle(1);

/// Volatile storage backed by a hash map.
pub struct MemoryStorage {
    next: AtomicU64,
    images: RwLock<FxHashMap<StorageHandle, Option<Vec<u8>>>>,
}

impl MemoryStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(ROOT.0 + 1),
            images: RwLock::new(FxHashMap::default()),
        }
    }

    /// Number of live handles, including the root holder.
    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    /// Returns true if nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.images.read().is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStorage for MemoryStorage {
    fn open_root(&self) -> Result<(StorageHandle, bool)> {
        let mut images = self.images.write();
        let is_new = match images.get(&ROOT) {
            Some(Some(_)) => false,
            _ => {
                images.insert(ROOT, None);
                true
            }
        };
        Ok((ROOT, is_new))
    }

    fn create(&self) -> Result<StorageHandle> {
        let handle = StorageHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.images.write().insert(handle, None);
        trace!(%handle, "storage.memory.create");
        Ok(handle)
    }

    fn try_get_node(&self, handle: StorageHandle) -> Result<Option<Vec<u8>>> {
        Ok(self.images.read().get(&handle).cloned().flatten())
    }

    fn update(&self, handle: StorageHandle, image: &[u8]) -> Result<()> {
        match self.images.write().get_mut(&handle) {
            Some(slot) => {
                *slot = Some(image.to_vec());
                Ok(())
            }
            None => Err(SylvaError::CorruptionOwned(format!(
                "update of unallocated handle {handle}"
            ))),
        }
    }

    fn destroy(&self, handle: StorageHandle) -> Result<()> {
        if self.images.write().remove(&handle).is_none() {
            return Err(SylvaError::CorruptionOwned(format!(
                "destroy of unallocated handle {handle}"
            )));
        }
        trace!(%handle, "storage.memory.destroy");
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.images.write().clear();
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_new_until_written() {
        let storage = MemoryStorage::new();
        let (root, is_new) = storage.open_root().unwrap();
        assert!(is_new);
        assert!(storage.open_root().unwrap().1);
        storage.update(root, b"root").unwrap();
        assert_eq!(storage.open_root().unwrap(), (root, false));
    }

    #[test]
    fn handles_are_unique_and_destroyable() {
        let storage = MemoryStorage::new();
        let a = storage.create().unwrap();
        let b = storage.create().unwrap();
        assert_ne!(a, b);
        assert_eq!(storage.try_get_node(a).unwrap(), None);
        storage.update(a, b"x").unwrap();
        assert_eq!(storage.try_get_node(a).unwrap().as_deref(), Some(&b"x"[..]));
        storage.destroy(a).unwrap();
        assert!(storage.update(a, b"y").is_err());
        assert!(storage.destroy(a).is_err());
        assert!(storage.rollback().is_err());
        storage.reset().unwrap();
        assert!(storage.is_empty());
    }
}
