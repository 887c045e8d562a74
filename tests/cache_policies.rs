#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sylva::storage::btree::BPlusTreeOptions;
use sylva::{BPlusTree, CachePolicy, Result};
use tempfile::tempdir;

const POLICIES: [CachePolicy; 3] = [CachePolicy::All, CachePolicy::Recent, CachePolicy::None];

fn mixed_workload(tree: &BPlusTree<u64, u64>, seed: u64) -> Result<BTreeMap<u64, u64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut model = BTreeMap::new();
    for _ in 0..3_000 {
        let key = rng.gen_range(0..400u64);
        match rng.gen_range(0..10) {
            0..=4 => {
                let value = rng.gen::<u64>();
                tree.insert(key, value)?;
                model.insert(key, value);
            }
            5..=6 => {
                assert_eq!(tree.remove(&key)?, model.remove(&key).is_some());
            }
            _ => {
                assert_eq!(tree.try_get_value(&key)?, model.get(&key).copied());
            }
        }
    }
    Ok(model)
}

fn assert_matches(tree: &BPlusTree<u64, u64>, model: &BTreeMap<u64, u64>) -> Result<()> {
    let entries: Vec<(u64, u64)> = tree.iter().collect::<Result<_>>()?;
    let expected: Vec<(u64, u64)> = model.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(entries, expected);
    let report = tree.validate()?;
    assert_eq!(report.entries, model.len() as u64);
    Ok(())
}

#[test]
fn every_policy_agrees_in_memory() -> Result<()> {
    for (seed, policy) in POLICIES.into_iter().enumerate() {
        let tree = BPlusTree::open(
            BPlusTreeOptions::<u64, u64>::new()
                .cache_policy(policy)
                .child_nodes(2, 6)
                .value_nodes(2, 6),
        )?;
        let model = mixed_workload(&tree, seed as u64)?;
        assert_matches(&tree, &model)?;
    }
    Ok(())
}

#[test]
fn every_policy_agrees_on_disk() -> Result<()> {
    let dir = tempdir()?;
    for (seed, policy) in POLICIES.into_iter().enumerate() {
        let path = dir.path().join(format!("{policy:?}.sylva"));
        let options = BPlusTreeOptions::<u64, u64>::new()
            .disk(&path)
            .file_block_size(512)
            .cache_policy(policy)
            .child_nodes(3, 10)
            .value_nodes(3, 10);
        let model = {
            let tree = BPlusTree::open(options.clone())?;
            let model = mixed_workload(&tree, 100 + seed as u64)?;
            assert_matches(&tree, &model)?;
            tree.commit()?;
            model
        };
        let tree = BPlusTree::open(options)?;
        assert_matches(&tree, &model)?;
    }
    Ok(())
}

#[test]
fn full_cache_serves_hits_and_none_never_does() -> Result<()> {
    let dir = tempdir()?;
    for policy in [CachePolicy::All, CachePolicy::None] {
        let path = dir.path().join(format!("hits-{policy:?}.sylva"));
        let tree = BPlusTree::open(
            BPlusTreeOptions::<u64, u64>::new()
                .disk(&path)
                .cache_policy(policy),
        )?;
        for key in 0u64..500 {
            tree.insert(key, key)?;
        }
        for key in 0u64..500 {
            assert_eq!(tree.get(&key)?, key);
        }
        let stats = tree.stats().snapshot();
        match policy {
            CachePolicy::None => {
                assert_eq!(stats.cache_hits, 0);
                assert!(stats.cache_misses > 0);
            }
            _ => assert!(stats.cache_hits > 0),
        }
    }
    Ok(())
}

#[test]
fn recent_cache_reloads_after_unload() -> Result<()> {
    let dir = tempdir()?;
    let tree = BPlusTree::open(
        BPlusTreeOptions::<u64, u64>::new()
            .disk(dir.path().join("recent.sylva"))
            .cache_policy(CachePolicy::Recent)
            .cache_keep_alive(2, 16, Duration::from_millis(5))
            .child_nodes(2, 6)
            .value_nodes(2, 6),
    )?;
    for key in 0u64..300 {
        tree.add(key, key * 7)?;
    }
    tree.commit()?;
    tree.unload_cache()?;
    let misses = tree.stats().cache_misses();
    for key in (0u64..300).rev() {
        assert_eq!(tree.get(&key)?, key * 7);
    }
    assert!(tree.stats().cache_misses() > misses);
    tree.validate()?;
    Ok(())
}
