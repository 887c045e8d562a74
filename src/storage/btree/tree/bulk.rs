//! Bulk loading.
//!
//! The input is sorted, de-duplicated and merged with the existing content,
//! then a fresh tree is built bottom-up from packed leaves and swapped in
//! under the root holder in a single transaction.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::primitives::wal::TransactionLog;
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::handle::NodeHandle;
use crate::storage::btree::node::{Element, Node};
use crate::storage::btree::pin::LockType;
use crate::storage::btree::transaction::NodeTransaction;
use crate::types::{Result, SylvaError};

use super::BPlusTree;

/// What happens when two entries share a key.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateHandling {
    /// Keep the earliest entry.
    FirstValueWins,
    /// Keep the latest entry.
    #[default]
    LastValueWins,
    /// Fail with [`SylvaError::DuplicateKey`].
    RaisesException,
}

/// Settings for [`BPlusTree::bulk_insert`].
#[derive(Clone, Debug)]
pub struct BulkInsertOptions {
    /// Resolution of duplicate keys, within the input and against the tree.
    pub duplicate_handling: DuplicateHandling,
    /// The input is already ordered by the key comparer.
    pub input_is_sorted: bool,
    /// Commit the tree once the load is done.
    pub commit_on_completion: bool,
    /// Discard the existing content instead of merging with it.
    pub replace_contents: bool,
}

impl Default for BulkInsertOptions {
    fn default() -> Self {
        Self {
            duplicate_handling: DuplicateHandling::LastValueWins,
            input_is_sorted: false,
            commit_on_completion: true,
            replace_contents: false,
        }
    }
}

impl BulkInsertOptions {
    /// Sets the duplicate policy.
    pub fn duplicate_handling(mut self, handling: DuplicateHandling) -> Self {
        self.duplicate_handling = handling;
        self
    }

    /// Declares the input as already sorted.
    pub fn input_is_sorted(mut self, sorted: bool) -> Self {
        self.input_is_sorted = sorted;
        self
    }

    /// Enables or disables the final commit.
    pub fn commit_on_completion(mut self, commit: bool) -> Self {
        self.commit_on_completion = commit;
        self
    }

    /// Replaces rather than merges with the existing content.
    pub fn replace_contents(mut self, replace: bool) -> Self {
        self.replace_contents = replace;
        self
    }

    pub(crate) fn sorted_replace() -> Self {
        Self {
            duplicate_handling: DuplicateHandling::LastValueWins,
            input_is_sorted: true,
            commit_on_completion: false,
            replace_contents: true,
        }
    }
}

impl<K: KeyCodec, V: ValCodec> BPlusTree<K, V> {
    /// Loads many entries at once and returns how many distinct input
    /// entries were applied.
    pub fn bulk_insert<I>(&self, items: I, options: &BulkInsertOptions) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.ensure_writable()?;
        let applied = {
            let _call = self.write_call()?;
            let applied = self.bulk_locked(items.into_iter().collect(), options, self.active_log())?;
            if options.commit_on_completion {
                self.commit_locked()?;
            }
            applied
        };
        self.after_mutation(applied > 0)?;
        Ok(applied)
    }

    /// Bulk load with the call-level write lock already held.
    pub(super) fn bulk_locked(
        &self,
        mut input: Vec<(K, V)>,
        options: &BulkInsertOptions,
        log: Option<&TransactionLog<K, V>>,
    ) -> Result<u64> {
        if input.is_empty() && !options.replace_contents {
            return Ok(0);
        }
        if options.input_is_sorted {
            if input
                .windows(2)
                .any(|pair| self.compare(&pair[0].0, &pair[1].0) == Ordering::Greater)
            {
                return Err(SylvaError::Invalid("bulk input is not sorted"));
            }
        } else {
            input.sort_by(|a, b| self.compare(&a.0, &b.0));
        }
        let input = self.dedupe(input, options.duplicate_handling)?;
        let applied = input.len() as u64;

        let mut root = self.cache.lock_root(LockType::Update)?;
        let old_top = root.node().child(0);
        let existing = if !options.replace_contents || log.is_some() {
            self.collect_entries(&root)?
        } else {
            Vec::new()
        };
        let old_keys: Vec<K> = match log {
            Some(_) => existing.iter().map(|(key, _)| key.clone()).collect(),
            None => Vec::new(),
        };
        let merged = if options.replace_contents {
            input
        } else {
            self.merge(existing, input, options.duplicate_handling)?
        };
        let total = merged.len() as u64;

        let mut written = Vec::new();
        let swapped = self
            .build_tree(&merged, &mut written)
            .and_then(|new_top| {
                let mut tx = NodeTransaction::new(&*self.cache, log);
                for key in &old_keys {
                    tx.log_remove(key);
                }
                for (key, value) in &merged {
                    tx.log_add(key, value);
                }
                tx.begin_update(&mut root).set_root_child(old_top, new_top);
                tx.commit().map(drop)
            });
        if let Err(err) = swapped {
            let storage = &self.cache.context().storage;
            for handle in written {
                if let Err(cleanup) = storage.destroy(handle.storage()) {
                    warn!(%handle, error = %cleanup, "btree.bulk.cleanup_failed");
                }
            }
            return Err(err);
        }

        let old = self.cache.lock(&root, old_top)?;
        drop(root);
        self.destroy_subtree(old)?;
        if let Some(count) = self.count.lock().as_mut() {
            *count = total;
        }
        debug!(applied, total, nodes = written.len(), "btree.bulk_insert");
        Ok(applied)
    }

    fn dedupe(&self, sorted: Vec<(K, V)>, handling: DuplicateHandling) -> Result<Vec<(K, V)>> {
        let mut out: Vec<(K, V)> = Vec::with_capacity(sorted.len());
        for (key, value) in sorted {
            match out.last_mut() {
                Some(last) if self.compare(&last.0, &key) == Ordering::Equal => match handling {
                    DuplicateHandling::FirstValueWins => {}
                    DuplicateHandling::LastValueWins => *last = (key, value),
                    DuplicateHandling::RaisesException => return Err(SylvaError::DuplicateKey),
                },
                _ => out.push((key, value)),
            }
        }
        Ok(out)
    }

    /// Merges two sorted, duplicate-free runs; `existing` counts as first.
    fn merge(
        &self,
        existing: Vec<(K, V)>,
        input: Vec<(K, V)>,
        handling: DuplicateHandling,
    ) -> Result<Vec<(K, V)>> {
        let mut out = Vec::with_capacity(existing.len() + input.len());
        let mut existing = existing.into_iter().peekable();
        let mut input = input.into_iter().peekable();
        loop {
            let order = match (existing.peek(), input.peek()) {
                (Some(a), Some(b)) => self.compare(&a.0, &b.0),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => break,
            };
            match order {
                Ordering::Less => out.extend(existing.next()),
                Ordering::Greater => out.extend(input.next()),
                Ordering::Equal => match handling {
                    DuplicateHandling::FirstValueWins => {
                        out.extend(existing.next());
                        input.next();
                    }
                    DuplicateHandling::LastValueWins => {
                        out.extend(input.next());
                        existing.next();
                    }
                    DuplicateHandling::RaisesException => return Err(SylvaError::DuplicateKey),
                },
            }
        }
        Ok(out)
    }

    /// Writes a complete tree for `entries` straight to storage and returns
    /// its top node. Every allocated handle is recorded in `written`.
    fn build_tree(&self, entries: &[(K, V)], written: &mut Vec<NodeHandle>) -> Result<NodeHandle> {
        let ctx = self.cache.context();
        let mut write = |is_leaf: bool, elements: Vec<Element<K, V>>| -> Result<NodeHandle> {
            let handle = NodeHandle::new(ctx.storage.create()?);
            written.push(handle);
            let capacity = if is_leaf {
                ctx.serializer.max_values()
            } else {
                ctx.serializer.max_children()
            };
            let node = Node::from_entries(handle, capacity, is_leaf, elements);
            ctx.storage
                .update(handle.storage(), &ctx.serializer.write(&node))?;
            ctx.stats.inc_node_writes();
            Ok(handle)
        };

        // (first key of the subtree, node)
        let mut level: Vec<(Option<K>, NodeHandle)> = Vec::new();
        let mut remaining = entries;
        for size in pack(
            entries.len(),
            self.fill(true),
            self.options.minimum_value_nodes,
        ) {
            let (chunk, rest) = remaining.split_at(size);
            remaining = rest;
            let elements = chunk
                .iter()
                .map(|(key, value)| Element::Value {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect();
            level.push((chunk.first().map(|(key, _)| key.clone()), write(true, elements)?));
        }

        while level.len() > 1 {
            let mut upper = Vec::new();
            let mut children = level.into_iter();
            for size in pack(
                children.len(),
                self.fill(false),
                self.options.minimum_child_nodes,
            ) {
                let mut first = None;
                let mut elements = Vec::with_capacity(size);
                for (i, (key, child)) in children.by_ref().take(size).enumerate() {
                    if i == 0 {
                        first = key;
                        elements.push(Element::Child { key: None, child });
                    } else {
                        elements.push(Element::Child { key, child });
                    }
                }
                upper.push((first, write(false, elements)?));
            }
            level = upper;
        }
        level
            .pop()
            .map(|(_, top)| top)
            .ok_or(SylvaError::Corruption("bulk build produced no nodes"))
    }
}

/// Chunk sizes for `n` entries: runs of `target`, with a short tail folded
/// into its neighbour so no chunk is below `minimum`. A single chunk may be
/// smaller; it becomes the top node.
fn pack(n: usize, target: usize, minimum: usize) -> Vec<usize> {
    if n <= target {
        return vec![n];
    }
    let mut sizes = vec![target; n / target];
    let tail = n % target;
    if tail >= minimum {
        sizes.push(tail);
    } else if tail > 0 {
        let total = sizes.pop().unwrap_or_default() + tail;
        sizes.push(total - total / 2);
        sizes.push(total / 2);
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::pack;

    #[test]
    fn pack_respects_bounds() {
        assert_eq!(pack(0, 6, 3), vec![0]);
        assert_eq!(pack(5, 6, 3), vec![5]);
        assert_eq!(pack(12, 6, 3), vec![6, 6]);
        assert_eq!(pack(16, 6, 3), vec![6, 6, 4]);
        assert_eq!(pack(13, 6, 3), vec![6, 4, 3]);
        for n in 25..500 {
            let sizes = pack(n, 24, 8);
            assert_eq!(sizes.iter().sum::<usize>(), n);
            assert!(sizes.iter().all(|&s| (8..=24).contains(&s)), "{n}: {sizes:?}");
        }
    }
}
