use std::collections::VecDeque;

use super::codecs::{KeyCodec, ValCodec};
use super::tree::{BPlusTree, Seek};
use crate::types::Result;

type Until<'t, K> = Box<dyn Fn(&K) -> bool + Send + 't>;

/// Forward iterator over tree entries in key order.
///
/// Entries are buffered one leaf at a time; when a buffer runs dry the
/// cursor re-seeks from the first key of the following leaf. No lock is
/// held between pages, so writers are never blocked, but entries changed
/// concurrently near a page boundary may be missed or seen twice.
pub struct Entries<'t, K: KeyCodec, V: ValCodec> {
    tree: &'t BPlusTree<K, V>,
    buffer: VecDeque<(K, V)>,
    next: Option<Seek<K>>,
    until: Option<Until<'t, K>>,
    done: bool,
}

impl<'t, K: KeyCodec, V: ValCodec> Entries<'t, K, V> {
    pub(crate) fn new(tree: &'t BPlusTree<K, V>, start: Seek<K>, until: Option<Until<'t, K>>) -> Self {
        Self {
            tree,
            buffer: VecDeque::new(),
            next: Some(start),
            until,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.next = None;
        self.buffer.clear();
    }
}

impl<K: KeyCodec, V: ValCodec> Iterator for Entries<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                if let Some(until) = &self.until {
                    if !until(&entry.0) {
                        self.finish();
                        return None;
                    }
                }
                return Some(Ok(entry));
            }
            if self.done {
                return None;
            }
            let Some(seek) = self.next.take() else {
                self.finish();
                return None;
            };
            match self.tree.read_page(&seek) {
                Ok(page) => {
                    self.buffer.extend(page.entries);
                    self.next = page.next.map(Seek::From);
                }
                Err(err) => {
                    self.finish();
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Keys of an [`Entries`] walk.
pub struct Keys<'t, K: KeyCodec, V: ValCodec> {
    inner: Entries<'t, K, V>,
}

impl<'t, K: KeyCodec, V: ValCodec> Keys<'t, K, V> {
    pub(crate) fn new(inner: Entries<'t, K, V>) -> Self {
        Self { inner }
    }
}

impl<K: KeyCodec, V: ValCodec> Iterator for Keys<'_, K, V> {
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| entry.map(|(key, _)| key))
    }
}
