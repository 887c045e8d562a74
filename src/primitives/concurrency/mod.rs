#![forbid(unsafe_code)]
//! Read/write lock strategies used per node and for whole-tree call-level locking.
//!
//! Every acquisition takes an explicit timeout. Running out of time is a
//! [`SylvaError::Deadlock`]; the caller decides whether to retry the whole
//! operation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{
    lock_api::{ArcMutexGuard, ArcRwLockReadGuard, ArcRwLockWriteGuard},
    Mutex, RawMutex, RawRwLock, RwLock,
};
use serde::{Deserialize, Serialize};

use crate::types::{Result, SylvaError};

/// Selects a [`LockStrategy`] implementation.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockingKind {
    /// No mutual exclusion at all.
    Ignore,
    /// A single mutex; readers exclude each other too.
    Exclusive,
    /// Shared readers, exclusive writers.
    #[default]
    ReaderWriter,
}

impl LockingKind {
    /// Builds a fresh lock of this kind.
    pub fn create(self) -> Arc<dyn LockStrategy> {
        match self {
            LockingKind::Ignore => Arc::new(IgnoreLocking),
            LockingKind::Exclusive => Arc::new(ExclusiveLocking::default()),
            LockingKind::ReaderWriter => Arc::new(ReaderWriterLocking::default()),
        }
    }
}

/// How long an acquisition may wait.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockTimeout {
    /// Wait at most this long.
    After(Duration),
    /// Wait forever.
    Infinite,
}

impl LockTimeout {
    /// Timeout from milliseconds; negative values mean infinite.
    pub fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            LockTimeout::Infinite
        } else {
            LockTimeout::After(Duration::from_millis(ms as u64))
        }
    }

    fn deadlock(self) -> SylvaError {
        let timeout_ms = match self {
            LockTimeout::After(d) => d.as_millis() as u64,
            LockTimeout::Infinite => u64::MAX,
        };
        SylvaError::Deadlock { timeout_ms }
    }
}

impl Default for LockTimeout {
    fn default() -> Self {
        LockTimeout::After(Duration::from_millis(120_000))
    }
}

/// A read/write mutual exclusion primitive.
pub trait LockStrategy: Send + Sync {
    /// Acquires shared access.
    fn read(&self, timeout: LockTimeout) -> Result<LockGuard>;
    /// Acquires exclusive access.
    fn write(&self, timeout: LockTimeout) -> Result<LockGuard>;
    /// Short name for diagnostics.
    fn kind(&self) -> LockingKind;
}

/// Held lock; released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    held: Held,
}

enum Held {
    Nothing,
    Exclusive(ArcMutexGuard<RawMutex, ()>),
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

impl LockGuard {
    /// A guard that holds nothing.
    pub fn unlocked() -> Self {
        Self {
            held: Held::Nothing,
        }
    }

    /// Returns true if this guard grants exclusive access.
    pub fn is_exclusive(&self) -> bool {
        matches!(self.held, Held::Exclusive(_) | Held::Write(_))
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.held {
            Held::Nothing => "nothing",
            Held::Exclusive(_) => "exclusive",
            Held::Read(_) => "read",
            Held::Write(_) => "write",
        };
        f.debug_struct("LockGuard").field("held", &state).finish()
    }
}

/// Grants every request immediately.
#[derive(Default, Debug, Clone, Copy)]
pub struct IgnoreLocking;

impl LockStrategy for IgnoreLocking {
    fn read(&self, _timeout: LockTimeout) -> Result<LockGuard> {
        Ok(LockGuard::unlocked())
    }

    fn write(&self, _timeout: LockTimeout) -> Result<LockGuard> {
        Ok(LockGuard::unlocked())
    }

    fn kind(&self) -> LockingKind {
        LockingKind::Ignore
    }
}

/// One mutex for both readers and writers.
#[derive(Default)]
pub struct ExclusiveLocking {
    lock: Arc<Mutex<()>>,
}

impl ExclusiveLocking {
    fn acquire(&self, timeout: LockTimeout) -> Result<LockGuard> {
        let guard = match timeout {
            LockTimeout::Infinite => Some(self.lock.lock_arc()),
            LockTimeout::After(wait) => self.lock.try_lock_arc_for(wait),
        };
        guard
            .map(|g| LockGuard {
                held: Held::Exclusive(g),
            })
            .ok_or_else(|| timeout.deadlock())
    }
}

impl LockStrategy for ExclusiveLocking {
    fn read(&self, timeout: LockTimeout) -> Result<LockGuard> {
        self.acquire(timeout)
    }

    fn write(&self, timeout: LockTimeout) -> Result<LockGuard> {
        self.acquire(timeout)
    }

    fn kind(&self) -> LockingKind {
        LockingKind::Exclusive
    }
}

/// Shared readers and a single writer.
#[derive(Default)]
pub struct ReaderWriterLocking {
    lock: Arc<RwLock<()>>,
}

impl LockStrategy for ReaderWriterLocking {
    fn read(&self, timeout: LockTimeout) -> Result<LockGuard> {
        let guard = match timeout {
            LockTimeout::Infinite => Some(self.lock.read_arc()),
            LockTimeout::After(wait) => self.lock.try_read_arc_for(wait),
        };
        guard
            .map(|g| LockGuard {
                held: Held::Read(g),
            })
            .ok_or_else(|| timeout.deadlock())
    }

    fn write(&self, timeout: LockTimeout) -> Result<LockGuard> {
        let guard = match timeout {
            LockTimeout::Infinite => Some(self.lock.write_arc()),
            LockTimeout::After(wait) => self.lock.try_write_arc_for(wait),
        };
        guard
            .map(|g| LockGuard {
                held: Held::Write(g),
            })
            .ok_or_else(|| timeout.deadlock())
    }

    fn kind(&self) -> LockingKind {
        LockingKind::ReaderWriter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    const SHORT: LockTimeout = LockTimeout::After(Duration::from_millis(20));

    #[test]
    fn readers_share_reader_writer_lock() {
        let lock = ReaderWriterLocking::default();
        let a = lock.read(SHORT).unwrap();
        let b = lock.read(SHORT).unwrap();
        assert!(!a.is_exclusive());
        let err = lock.write(SHORT).unwrap_err();
        assert!(matches!(err, SylvaError::Deadlock { timeout_ms: 20 }));
        drop((a, b));
        assert!(lock.write(SHORT).unwrap().is_exclusive());
    }

    #[test]
    fn exclusive_lock_blocks_second_reader() {
        let lock = ExclusiveLocking::default();
        let held = lock.read(SHORT).unwrap();
        assert!(held.is_exclusive());
        assert!(lock.read(SHORT).is_err());
        drop(held);
        assert!(lock.read(SHORT).is_ok());
    }

    #[test]
    fn ignore_locking_never_blocks() {
        let lock = LockingKind::Ignore.create();
        let _a = lock.write(SHORT).unwrap();
        let _b = lock.write(SHORT).unwrap();
        assert_eq!(lock.kind(), LockingKind::Ignore);
    }

    #[test]
    fn writer_waits_for_release_across_threads() {
        let lock: Arc<dyn LockStrategy> = LockingKind::ReaderWriter.create();
        let barrier = Arc::new(Barrier::new(2));
        let held = lock.write(SHORT).unwrap();
        let worker = {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                lock.read(LockTimeout::After(Duration::from_secs(5))).is_ok()
            })
        };
        barrier.wait();
        thread::sleep(Duration::from_millis(10));
        drop(held);
        assert!(worker.join().unwrap());
    }

    #[test]
    fn negative_millis_means_infinite() {
        assert_eq!(LockTimeout::from_millis(-1), LockTimeout::Infinite);
        assert_eq!(
            LockTimeout::from_millis(250),
            LockTimeout::After(Duration::from_millis(250))
        );
    }
}
