use std::cmp::Ordering;

use tracing::debug;

use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::pin::{LockType, NodePin};
use crate::types::{Result, SylvaError};

use super::BPlusTree;

/// Shape of a tree as seen by [`BPlusTree::validate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeReport {
    /// Levels below the root holder; an empty tree has depth 1.
    pub depth: usize,
    /// Number of leaves.
    pub leaf_nodes: usize,
    /// Number of interior nodes.
    pub interior_nodes: usize,
    /// Number of entries.
    pub entries: u64,
}

struct Bounds<'a, K> {
    lower: Option<&'a K>,
    upper: Option<&'a K>,
}

impl<K: KeyCodec, V: ValCodec> BPlusTree<K, V> {
    /// Crawls the whole tree and checks its structural invariants: key
    /// order, fan-out bounds, uniform leaf depth and separator placement.
    pub fn validate(&self) -> Result<TreeReport> {
        let _call = self.read_call()?;
        let root = self.cache.lock_root(LockType::Read)?;
        let top = self.cache.lock(&root, root.node().child(0))?;
        drop(root);
        let mut report = TreeReport::default();
        let mut leaf_depth = None;
        self.check_node(
            &top,
            1,
            true,
            Bounds {
                lower: None,
                upper: None,
            },
            &mut leaf_depth,
            &mut report,
        )?;
        report.depth = leaf_depth.unwrap_or(1);
        if let Some(total) = *self.count.lock() {
            if total != report.entries {
                return Err(SylvaError::CorruptionOwned(format!(
                    "count is {total} but the tree holds {}",
                    report.entries
                )));
            }
        }
        debug!(?report, "btree.validate");
        Ok(report)
    }

    fn check_node(
        &self,
        pin: &NodePin<K, V>,
        depth: usize,
        is_top: bool,
        bounds: Bounds<'_, K>,
        leaf_depth: &mut Option<usize>,
        report: &mut TreeReport,
    ) -> Result<()> {
        let node = pin.node();
        let handle = pin.handle();
        let invalid = |what: &str| SylvaError::CorruptionOwned(format!("{handle}: {what}"));

        if node.handle() != handle {
            return Err(invalid("node body belongs to another handle"));
        }
        if node.is_root() {
            return Err(invalid("root holder below the root"));
        }
        let count = node.count();
        let (minimum, maximum) = if node.is_leaf() {
            (self.options.minimum_value_nodes, self.options.maximum_value_nodes)
        } else {
            (self.options.minimum_child_nodes, self.options.maximum_child_nodes)
        };
        if count > maximum {
            return Err(invalid("node exceeds its capacity"));
        }
        if is_top {
            if !node.is_leaf() && count == 0 {
                return Err(invalid("empty interior top node"));
            }
        } else if count < minimum {
            return Err(invalid("node is below its minimum"));
        }

        let start = usize::from(!node.is_leaf());
        for ordinal in start..count {
            let Some(key) = node.key(ordinal) else {
                return Err(invalid("entry without a key"));
            };
            if let Some(lower) = bounds.lower {
                if self.compare(key, lower) == Ordering::Less {
                    return Err(invalid("key below its separator"));
                }
            }
            if let Some(upper) = bounds.upper {
                if self.compare(key, upper) != Ordering::Less {
                    return Err(invalid("key at or above the next separator"));
                }
            }
            if ordinal > start {
                if let Some(previous) = node.key(ordinal - 1) {
                    if self.compare(previous, key) != Ordering::Less {
                        return Err(invalid("keys out of order"));
                    }
                }
            }
        }

        if node.is_leaf() {
            report.leaf_nodes += 1;
            report.entries += count as u64;
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(invalid("leaves at different depths"));
                }
                Some(_) => {}
            }
            return Ok(());
        }

        report.interior_nodes += 1;
        for ordinal in 0..count {
            let lower = if ordinal == 0 {
                bounds.lower
            } else {
                node.key(ordinal)
            };
            let upper = if ordinal + 1 < count {
                node.key(ordinal + 1)
            } else {
                bounds.upper
            };
            let child = self.cache.lock(pin, node.child(ordinal))?;
            self.check_node(
                &child,
                depth + 1,
                false,
                Bounds { lower, upper },
                leaf_depth,
                report,
            )?;
        }
        Ok(())
    }
}
