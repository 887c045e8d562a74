use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy)]
pub struct BTreeStatsSnapshot {
    /// Number of point lookups performed
    pub lookups: u64,
    /// Number of entries inserted
    pub inserts: u64,
    /// Number of entries updated in place
    pub updates: u64,
    /// Number of entries removed
    pub removes: u64,
    /// Number of leaf splits performed
    pub leaf_splits: u64,
    /// Number of interior splits performed
    pub interior_splits: u64,
    /// Number of times the tree grew a level
    pub root_splits: u64,
    /// Number of sibling merges performed
    pub merges: u64,
    /// Number of sibling redistributions performed
    pub redistributions: u64,
    /// Number of times the tree lost a level
    pub root_collapses: u64,
    /// Number of node lookups served from the cache
    pub cache_hits: u64,
    /// Number of node lookups that had to read storage
    pub cache_misses: u64,
    /// Number of node images written to storage
    pub node_writes: u64,
    /// Number of node transactions committed
    pub transactions_committed: u64,
    /// Number of node transactions rolled back
    pub transactions_rolled_back: u64,
}

/// Thread-safe statistics tracking for tree operations.
#[derive(Default)]
pub struct BTreeStats {
    lookups: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removes: AtomicU64,
    leaf_splits: AtomicU64,
    interior_splits: AtomicU64,
    root_splits: AtomicU64,
    merges: AtomicU64,
    redistributions: AtomicU64,
    root_collapses: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    node_writes: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
}

macro_rules! counters {
    ($($name:ident => $inc:ident),* $(,)?) => {
        $(
            #[doc = concat!("Returns the current `", stringify!($name), "` counter.")]
            pub fn $name(&self) -> u64 {
                self.$name.load(AtomicOrdering::Relaxed)
            }

            pub(crate) fn $inc(&self) {
                self.$name.fetch_add(1, AtomicOrdering::Relaxed);
            }
        )*
    };
}

impl BTreeStats {
    counters! {
        lookups => inc_lookups,
        inserts => inc_inserts,
        updates => inc_updates,
        removes => inc_removes,
        leaf_splits => inc_leaf_splits,
        interior_splits => inc_interior_splits,
        root_splits => inc_root_splits,
        merges => inc_merges,
        redistributions => inc_redistributions,
        root_collapses => inc_root_collapses,
        cache_hits => inc_cache_hits,
        cache_misses => inc_cache_misses,
        node_writes => inc_node_writes,
        transactions_committed => inc_transactions_committed,
        transactions_rolled_back => inc_transactions_rolled_back,
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            lookups: self.lookups(),
            inserts: self.inserts(),
            updates: self.updates(),
            removes: self.removes(),
            leaf_splits: self.leaf_splits(),
            interior_splits: self.interior_splits(),
            root_splits: self.root_splits(),
            merges: self.merges(),
            redistributions: self.redistributions(),
            root_collapses: self.root_collapses(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            node_writes: self.node_writes(),
            transactions_committed: self.transactions_committed(),
            transactions_rolled_back: self.transactions_rolled_back(),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "sylva::btree::stats",
            lookups = snapshot.lookups,
            inserts = snapshot.inserts,
            updates = snapshot.updates,
            removes = snapshot.removes,
            leaf_splits = snapshot.leaf_splits,
            interior_splits = snapshot.interior_splits,
            root_splits = snapshot.root_splits,
            merges = snapshot.merges,
            redistributions = snapshot.redistributions,
            root_collapses = snapshot.root_collapses,
            cache_hits = snapshot.cache_hits,
            cache_misses = snapshot.cache_misses,
            node_writes = snapshot.node_writes,
            transactions_committed = snapshot.transactions_committed,
            transactions_rolled_back = snapshot.transactions_rolled_back,
            "btree stats snapshot"
        );
    }
}
