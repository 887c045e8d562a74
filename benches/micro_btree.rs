//! Micro benchmarks for the B+ tree.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sylva::storage::btree::BPlusTreeOptions;
use sylva::{BPlusTree, BulkInsertOptions, CachePolicy};
use tempfile::TempDir;

const INSERT_COUNT: u64 = 32_768;
const LOOKUP_SAMPLES: usize = 4_096;
const RANGE_WIDTH: u64 = 512;

fn micro_btree(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/btree");
    group.sample_size(30);

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("sequential_insert", |b| {
        b.iter_batched(
            || FreshTree::memory(),
            |tree| {
                tree.insert_keys(0..INSERT_COUNT);
                black_box(tree.tree.count().expect("count"));
            },
            BatchSize::SmallInput,
        );
    });

    let mut random_keys: Vec<u64> = (0..INSERT_COUNT).collect();
    random_keys.shuffle(&mut ChaCha8Rng::seed_from_u64(0xBEEF_F00D));
    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("random_insert", |b| {
        b.iter_batched(
            || FreshTree::memory(),
            |tree| tree.insert_keys(random_keys.iter().copied()),
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("bulk_insert", |b| {
        let sorted = BulkInsertOptions::default().input_is_sorted(true);
        b.iter_batched(
            || FreshTree::memory(),
            |tree| {
                let loaded = tree
                    .tree
                    .bulk_insert((0..INSERT_COUNT).map(|k| (k, k)), &sorted)
                    .expect("bulk");
                black_box(loaded);
            },
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("delete_random", |b| {
        b.iter_batched(
            || {
                let tree = FreshTree::memory();
                tree.insert_keys(0..INSERT_COUNT);
                tree
            },
            |tree| {
                for key in &random_keys {
                    tree.tree.remove(key).expect("remove");
                }
            },
            BatchSize::SmallInput,
        );
    });

    for policy in [CachePolicy::All, CachePolicy::Recent, CachePolicy::None] {
        let mut harness = LoadedTree::on_disk(INSERT_COUNT, policy);
        group.throughput(Throughput::Elements(LOOKUP_SAMPLES as u64));
        group.bench_function(
            BenchmarkId::new(format!("point_lookup/{policy:?}"), LOOKUP_SAMPLES),
            |b| b.iter(|| harness.point_lookup(LOOKUP_SAMPLES)),
        );
        group.throughput(Throughput::Elements(RANGE_WIDTH));
        group.bench_function(
            BenchmarkId::new(format!("range_scan/{policy:?}"), RANGE_WIDTH),
            |b| b.iter(|| harness.range_scan(RANGE_WIDTH)),
        );
    }

    group.finish();
}

struct FreshTree {
    _tmpdir: Option<TempDir>,
    tree: BPlusTree<u64, u64>,
}

impl FreshTree {
    fn memory() -> Self {
        let tree = BPlusTree::open(BPlusTreeOptions::new()).expect("tree");
        Self {
            _tmpdir: None,
            tree,
        }
    }

    fn disk(policy: CachePolicy) -> Self {
        let tmpdir = tempfile::tempdir().expect("tmpdir");
        let path = tmpdir.path().join("btree.sylva");
        let tree =
            BPlusTree::open(BPlusTreeOptions::new().disk(path).cache_policy(policy)).expect("tree");
        Self {
            _tmpdir: Some(tmpdir),
            tree,
        }
    }

    fn insert_keys(&self, keys: impl IntoIterator<Item = u64>) {
        for key in keys {
            self.tree.insert(key, key).expect("insert");
        }
    }
}

struct LoadedTree {
    fresh: FreshTree,
    max_key: u64,
    rng: ChaCha8Rng,
}

impl LoadedTree {
    fn on_disk(count: u64, policy: CachePolicy) -> Self {
        let fresh = FreshTree::disk(policy);
        fresh.insert_keys(0..count);
        fresh.tree.commit().expect("commit");
        Self {
            fresh,
            max_key: count,
            rng: ChaCha8Rng::seed_from_u64(0xFEED_FACE),
        }
    }

    fn point_lookup(&mut self, samples: usize) {
        for _ in 0..samples {
            let key = self.rng.gen_range(0..self.max_key);
            black_box(self.fresh.tree.get(&key).expect("get"));
        }
    }

    fn range_scan(&mut self, width: u64) {
        for _ in 0..16 {
            let start = self.rng.gen_range(0..(self.max_key - width));
            for entry in self.fresh.tree.enumerate_range(start, start + width) {
                black_box(entry.expect("entry"));
            }
        }
    }
}

criterion_group!(benches, micro_btree);
criterion_main!(benches);
