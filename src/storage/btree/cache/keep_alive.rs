use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Keeps recently touched objects strongly reachable.
///
/// At most `maximum` objects are retained. Objects beyond the first
/// `minimum` are released once they have not been touched for `timeout`.
pub(crate) struct KeepAlive<Id: Hash + Eq, T> {
    recent: LruCache<Id, (Instant, Arc<T>)>,
    minimum: usize,
    maximum: usize,
    timeout: Duration,
}

impl<Id: Hash + Eq, T> KeepAlive<Id, T> {
    pub(crate) fn new(minimum: usize, maximum: usize, timeout: Duration) -> Self {
        Self {
            recent: LruCache::unbounded(),
            minimum,
            maximum: maximum.max(minimum),
            timeout,
        }
    }

    pub(crate) fn touch(&mut self, id: Id, object: Arc<T>) {
        self.touch_at(id, object, Instant::now());
    }

    fn touch_at(&mut self, id: Id, object: Arc<T>, now: Instant) {
        self.recent.put(id, (now, object));
        while self.recent.len() > self.maximum {
            self.recent.pop_lru();
        }
        while self.recent.len() > self.minimum {
            match self.recent.peek_lru() {
                Some((_, (stamp, _))) if now.duration_since(*stamp) > self.timeout => {
                    self.recent.pop_lru();
                }
                _ => break,
            }
        }
    }

    pub(crate) fn forget(&mut self, id: &Id) {
        self.recent.pop(id);
    }

    pub(crate) fn clear(&mut self) {
        self.recent.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.recent.len()
    }
}
