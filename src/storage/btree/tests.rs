use super::{BPlusTree, BPlusTreeOptions, BulkInsertOptions, DuplicateHandling, InsertResult};
use crate::primitives::concurrency::LockingKind;
use crate::types::{Result, SylvaError};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

fn small_options() -> BPlusTreeOptions<u64, u64> {
    BPlusTreeOptions::new().child_nodes(2, 5).value_nodes(2, 5)
}

fn small_tree() -> Result<BPlusTree<u64, u64>> {
    BPlusTree::open(small_options())
}

fn collect(tree: &BPlusTree<u64, u64>) -> Result<Vec<(u64, u64)>> {
    tree.iter().collect()
}

#[cfg(feature = "validate")]
fn check(tree: &BPlusTree<u64, u64>) -> Result<()> {
    tree.validate().map(drop)
}

#[cfg(not(feature = "validate"))]
fn check(_tree: &BPlusTree<u64, u64>) -> Result<()> {
    Ok(())
}

#[test]
fn empty_tree_get_returns_none() -> Result<()> {
    let tree = small_tree()?;
    assert_eq!(tree.try_get_value(&7)?, None);
    assert!(matches!(tree.get(&7), Err(SylvaError::NotFound)));
    assert!(matches!(tree.first(), Err(SylvaError::NotFound)));
    assert_eq!(tree.try_get_last()?, None);
    assert!(tree.is_empty()?);
    assert_eq!(tree.count()?, 0);
    assert_eq!(collect(&tree)?, Vec::new());
    Ok(())
}

#[test]
fn insert_and_get_roundtrip() -> Result<()> {
    let tree = small_tree()?;
    for key in 0u64..200 {
        tree.insert(key, key + 1_000)?;
    }
    for key in 0u64..200 {
        assert_eq!(tree.get(&key)?, key + 1_000);
    }
    assert!(!tree.contains_key(&200)?);
    let stats = tree.stats();
    assert!(stats.leaf_splits() > 0);
    assert!(stats.interior_splits() > 0);
    assert!(stats.root_splits() >= 2);
    assert_eq!(stats.inserts(), 200);
    check(&tree)?;
    Ok(())
}

#[test]
fn descending_inserts_split_the_left_edge() -> Result<()> {
    let tree = small_tree()?;
    for key in (0u64..150).rev() {
        tree.insert(key, key)?;
    }
    let keys: Vec<u64> = tree.keys().collect::<Result<_>>()?;
    assert_eq!(keys, (0..150).collect::<Vec<_>>());
    assert_eq!(tree.first()?, (0, 0));
    assert_eq!(tree.last()?, (149, 149));
    check(&tree)?;
    Ok(())
}

#[test]
fn add_rejects_duplicates() -> Result<()> {
    let tree = small_tree()?;
    tree.add(1, 10)?;
    assert!(matches!(tree.add(1, 11), Err(SylvaError::DuplicateKey)));
    assert!(!tree.try_add(1, 12)?);
    assert_eq!(tree.get_or_add(1, 13)?, 10);
    assert_eq!(tree.get_or_add(2, 20)?, 20);
    assert!(tree.try_add_with(3, |k| k * 100)?);
    assert_eq!(tree.get(&3)?, 300);
    Ok(())
}

#[test]
fn conditional_updates() -> Result<()> {
    let tree = small_tree()?;
    assert!(!tree.try_update(5, 1)?);
    tree.insert(5, 1)?;
    assert!(tree.try_update(5, 2)?);
    assert!(!tree.try_update_if(5, 3, 1)?);
    assert!(tree.try_update_if(5, 3, 2)?);
    assert!(!tree.try_update_with(5, |_, _| None)?);
    assert!(tree.try_update_with(5, |_, v| Some(v * 10))?);
    assert_eq!(tree.get(&5)?, 30);
    assert_eq!(tree.stats().updates(), 3);
    Ok(())
}

#[test]
fn add_or_update_applies_factory_then_updater() -> Result<()> {
    let tree = small_tree()?;
    assert_eq!(tree.add_or_update(5, 10, |_, v| v + 1)?, 10);
    assert_eq!(tree.add_or_update(5, 10, |_, v| v + 1)?, 11);
    assert_eq!(
        tree.add_or_update_with(6, |k| k * 2, |_, v| v + 1)?,
        12
    );
    Ok(())
}

#[test]
fn custom_strategies_report_outcomes() -> Result<()> {
    let tree = small_tree()?;
    let mut never = super::FnUpdate(|_: &u64, _: &u64| -> Option<u64> { None });
    assert_eq!(tree.apply(1, &mut never)?, InsertResult::NotFound);
    tree.insert(1, 5)?;
    assert_eq!(tree.apply(1, &mut never)?, InsertResult::Exists(5));

    let mut keep_odd = |_: &u64, v: &u64| v % 2 == 0;
    assert_eq!(tree.remove_with(&1, &mut keep_odd)?, super::RemoveResult::Ignored);
    assert_eq!(tree.remove_with(&2, &mut keep_odd)?, super::RemoveResult::NotFound);
    assert_eq!(tree.try_remove_if(&1, |_, v| *v == 5)?, Some(5));
    assert!(tree.is_empty()?);
    Ok(())
}

#[test]
fn delete_everything_collapses_to_a_leaf() -> Result<()> {
    let tree = small_tree()?;
    for key in 0u64..100 {
        tree.insert(key, key)?;
    }
    for key in 0u64..100 {
        assert!(tree.remove(&key)?, "key {key} missing");
        if key % 10 == 0 {
            check(&tree)?;
        }
    }
    assert!(!tree.remove(&0)?);
    assert!(tree.is_empty()?);
    let stats = tree.stats();
    assert!(stats.merges() > 0);
    assert!(stats.root_collapses() > 0);
    #[cfg(feature = "validate")]
    assert_eq!(tree.validate()?.depth, 1);
    Ok(())
}

#[test]
fn delete_from_the_middle_redistributes() -> Result<()> {
    let tree = small_tree()?;
    for key in 0u64..300 {
        tree.insert(key, key)?;
    }
    for key in (100u64..200).rev() {
        assert_eq!(tree.try_remove(&key)?, Some(key));
    }
    check(&tree)?;
    let keys: Vec<u64> = tree.keys().collect::<Result<_>>()?;
    let expected: Vec<u64> = (0..100).chain(200..300).collect();
    assert_eq!(keys, expected);
    Ok(())
}

#[test]
fn delete_from_the_right_edge_joins_left_siblings() -> Result<()> {
    let tree = small_tree()?;
    for key in 0u64..250 {
        tree.insert(key, key * 3)?;
    }
    for key in (40u64..250).rev() {
        assert!(tree.remove(&key)?, "key {key} missing");
        if key % 25 == 0 {
            check(&tree)?;
            assert_eq!(tree.try_get_last()?, Some((key - 1, (key - 1) * 3)));
        }
    }
    check(&tree)?;
    assert!(tree.stats().merges() > 0);
    let entries = collect(&tree)?;
    let expected: Vec<(u64, u64)> = (0..40).map(|k| (k, k * 3)).collect();
    assert_eq!(entries, expected);
    Ok(())
}

#[test]
fn randomized_ops_match_reference() -> Result<()> {
    let tree = small_tree()?;
    let mut reference = BTreeMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    for step in 0..4_000 {
        let key = rng.gen_range(0u64..400);
        if rng.gen_bool(0.6) {
            let value = rng.gen::<u64>();
            tree.insert(key, value)?;
            reference.insert(key, value);
        } else {
            assert_eq!(tree.try_remove(&key)?, reference.remove(&key));
        }
        if step % 500 == 0 {
            check(&tree)?;
        }
    }
    check(&tree)?;
    let expected: Vec<(u64, u64)> = reference.into_iter().collect();
    assert_eq!(collect(&tree)?, expected);
    Ok(())
}

#[test]
fn ranges_are_inclusive() -> Result<()> {
    let tree = small_tree()?;
    for key in (0u64..100).map(|k| k * 2) {
        tree.insert(key, key)?;
    }
    let range: Vec<u64> = tree
        .enumerate_range(10, 20)
        .map(|e| e.map(|(k, _)| k))
        .collect::<Result<_>>()?;
    assert_eq!(range, vec![10, 12, 14, 16, 18, 20]);

    let from_gap: Vec<u64> = tree
        .enumerate_from(181)
        .map(|e| e.map(|(k, _)| k))
        .collect::<Result<_>>()?;
    assert_eq!(from_gap, vec![182, 184, 186, 188, 190, 192, 194, 196, 198]);

    assert_eq!(tree.enumerate_range(11, 11).count(), 0);
    assert_eq!(tree.enumerate_from(1_000).count(), 0);
    Ok(())
}

#[test]
fn count_tracks_mutations() -> Result<()> {
    let tree = small_tree()?;
    for key in 0u64..50 {
        tree.insert(key, key)?;
    }
    tree.enable_count()?;
    assert_eq!(tree.count()?, 50);
    tree.insert(10, 99)?;
    assert_eq!(tree.count()?, 50);
    tree.insert(1_000, 1)?;
    tree.remove(&0)?;
    tree.remove(&0)?;
    assert_eq!(tree.count()?, 50);
    tree.clear()?;
    assert_eq!(tree.count()?, 0);
    check(&tree)?;
    Ok(())
}

#[test]
fn custom_comparer_orders_descending() -> Result<()> {
    let options = BPlusTreeOptions::<u64, u64>::with_comparer(|a, b| b.cmp(a))
        .child_nodes(2, 5)
        .value_nodes(2, 5);
    let tree = BPlusTree::open(options)?;
    for key in 0u64..40 {
        tree.insert(key, key)?;
    }
    assert_eq!(tree.first()?.0, 39);
    let keys: Vec<u64> = tree.keys().collect::<Result<_>>()?;
    assert_eq!(keys, (0..40).rev().collect::<Vec<_>>());
    let range: Vec<u64> = tree
        .enumerate_range(20, 17)
        .map(|e| e.map(|(k, _)| k))
        .collect::<Result<_>>()?;
    assert_eq!(range, vec![20, 19, 18, 17]);
    Ok(())
}

#[test]
fn bulk_insert_merges_with_existing_content() -> Result<()> {
    let tree = small_tree()?;
    for key in 0u64..20 {
        tree.insert(key, 0)?;
    }
    let applied = tree.bulk_insert(
        (10u64..40).map(|k| (k, 1)),
        &BulkInsertOptions::default(),
    )?;
    assert_eq!(applied, 30);
    check(&tree)?;
    let entries = collect(&tree)?;
    assert_eq!(entries.len(), 40);
    assert!(entries[..10].iter().all(|&(_, v)| v == 0));
    assert!(entries[10..].iter().all(|&(_, v)| v == 1));

    let keep = BulkInsertOptions::default().duplicate_handling(DuplicateHandling::FirstValueWins);
    tree.bulk_insert(vec![(5, 9), (50, 9)], &keep)?;
    assert_eq!(tree.get(&5)?, 0);
    assert_eq!(tree.get(&50)?, 9);

    let strict = BulkInsertOptions::default().duplicate_handling(DuplicateHandling::RaisesException);
    assert!(matches!(
        tree.bulk_insert(vec![(5, 1)], &strict),
        Err(SylvaError::DuplicateKey)
    ));
    assert_eq!(tree.get(&5)?, 0);
    Ok(())
}

#[test]
fn bulk_insert_rejects_unsorted_input_when_declared_sorted() -> Result<()> {
    let tree = small_tree()?;
    let sorted = BulkInsertOptions::default().input_is_sorted(true);
    assert!(matches!(
        tree.bulk_insert(vec![(2, 2), (1, 1)], &sorted),
        Err(SylvaError::Invalid(_))
    ));
    assert!(tree.is_empty()?);
    assert_eq!(tree.bulk_insert(Vec::new(), &sorted)?, 0);
    Ok(())
}

#[test]
fn bulk_insert_builds_a_balanced_tree() -> Result<()> {
    let tree = small_tree()?;
    let replace = BulkInsertOptions::default()
        .input_is_sorted(true)
        .replace_contents(true);
    tree.bulk_insert((0u64..1_000).map(|k| (k, k)), &replace)?;
    check(&tree)?;
    tree.enable_count()?;
    assert_eq!(tree.count()?, 1_000);
    for key in 0u64..1_000 {
        tree.remove(&key)?;
    }
    assert_eq!(tree.count()?, 0);
    check(&tree)?;
    Ok(())
}

#[test]
fn unload_cache_keeps_content() -> Result<()> {
    let tree = small_tree()?;
    for key in 0u64..64 {
        tree.insert(key, key * 3)?;
    }
    tree.unload_cache()?;
    assert_eq!(tree.get(&63)?, 189);
    assert_eq!(collect(&tree)?.len(), 64);
    Ok(())
}

#[test]
fn exclusive_call_lock_serializes_without_deadlock() -> Result<()> {
    let tree = BPlusTree::open(small_options().call_level_lock(LockingKind::Exclusive))?;
    for key in 0u64..100 {
        tree.insert(key, key)?;
    }
    tree.enable_count()?;
    tree.commit()?;
    assert_eq!(tree.count()?, 100);
    assert_eq!(tree.iter().count(), 100);
    check(&tree)?;
    Ok(())
}

#[test]
fn read_only_memory_tree_is_rejected() {
    let options = small_options().read_only(true);
    assert!(matches!(
        BPlusTree::open(options),
        Err(SylvaError::Invalid(_))
    ));
}

#[test]
fn invalid_fan_out_is_rejected() {
    let options = BPlusTreeOptions::<u64, u64>::new().value_nodes(4, 8);
    assert!(matches!(
        BPlusTree::open(options),
        Err(SylvaError::InvalidOwned(_))
    ));
}

#[derive(Clone, Debug)]
enum PropOp {
    Put(u64, u64),
    Delete(u64),
}

fn op_strategy() -> impl Strategy<Value = PropOp> {
    let key_range = 0u64..64;
    let value_range = 0u64..512;
    prop_oneof![
        (key_range.clone(), value_range).prop_map(|(k, v)| PropOp::Put(k, v)),
        key_range.prop_map(PropOp::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]
    #[test]
    fn tree_matches_btreemap_random_ops(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let tree = small_tree().expect("open tree");
        let mut reference = BTreeMap::new();

        for op in ops {
            match op {
                PropOp::Put(key, value) => {
                    tree.insert(key, value).expect("insert");
                    reference.insert(key, value);
                }
                PropOp::Delete(key) => {
                    let expected = reference.remove(&key).is_some();
                    let removed = tree.remove(&key).expect("remove");
                    prop_assert_eq!(removed, expected);
                }
            }
        }

        check(&tree).expect("validate");
        let actual: BTreeMap<u64, u64> = tree.iter().collect::<Result<_>>().expect("iter");
        prop_assert_eq!(actual, reference);
    }
}
