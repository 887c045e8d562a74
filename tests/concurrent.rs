#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sylva::storage::btree::BPlusTreeOptions;
use sylva::{BPlusTree, LockingKind, Result};

fn small_tree() -> Result<BPlusTree<u64, u64>> {
    BPlusTree::open(BPlusTreeOptions::new().child_nodes(2, 6).value_nodes(2, 6))
}

#[test]
fn readers_never_observe_torn_values() -> Result<()> {
    let tree = small_tree()?;
    let done = AtomicBool::new(false);

    thread::scope(|scope| -> Result<()> {
        let writer = scope.spawn(|| -> Result<()> {
            for key in 0u64..3_000 {
                tree.insert(key, key * 2)?;
                if key % 3 == 0 {
                    tree.remove(&(key / 2))?;
                }
            }
            done.store(true, Ordering::Release);
            Ok(())
        });

        let readers: Vec<_> = (0..3u64)
            .map(|seed| {
                let tree = &tree;
                let done = &done;
                scope.spawn(move || -> Result<()> {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    while !done.load(Ordering::Acquire) {
                        let key = rng.gen_range(0..3_000u64);
                        if let Some(value) = tree.try_get_value(&key)? {
                            assert_eq!(value, key * 2);
                        }
                        let mut previous = None;
                        for entry in tree.enumerate_range(key, key + 50) {
                            let (k, v) = entry?;
                            assert_eq!(v, k * 2);
                            if let Some(p) = previous {
                                assert!(k > p, "{k} after {p}");
                            }
                            previous = Some(k);
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        writer.join().expect("writer panicked")?;
        for reader in readers {
            reader.join().expect("reader panicked")?;
        }
        Ok(())
    })?;

    tree.validate()?;
    Ok(())
}

#[test]
fn disjoint_writers_build_one_tree() -> Result<()> {
    let tree = small_tree()?;
    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let tree = &tree;
                scope.spawn(move || -> Result<()> {
                    for i in 0..600u64 {
                        tree.add(i * 4 + t, t)?;
                    }
                    for i in (0..600u64).step_by(2) {
                        assert!(tree.remove(&(i * 4 + t))?);
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer panicked")?;
        }
        Ok(())
    })?;

    assert_eq!(tree.count()?, 4 * 300);
    let report = tree.validate()?;
    assert_eq!(report.entries, 1_200);
    for key in 0u64..2_400 {
        let present = (key / 4) % 2 == 1;
        assert_eq!(tree.contains_key(&key)?, present, "key {key}");
    }
    Ok(())
}

#[test]
fn add_or_update_counters_do_not_lose_increments() -> Result<()> {
    let tree = small_tree()?;
    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..6u64)
            .map(|_| {
                let tree = &tree;
                scope.spawn(move || -> Result<()> {
                    for i in 0..500u64 {
                        tree.add_or_update(i % 25, 1, |_, v| v + 1)?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked")?;
        }
        Ok(())
    })?;

    let total: u64 = tree.iter().map(|entry| entry.map(|(_, v)| v)).sum::<Result<u64>>()?;
    assert_eq!(total, 6 * 500);
    for key in 0u64..25 {
        assert_eq!(tree.get(&key)?, 6 * 20);
    }
    Ok(())
}

#[test]
fn exclusive_call_lock_keeps_count_exact() -> Result<()> {
    let tree = BPlusTree::open(
        BPlusTreeOptions::<u64, u64>::new()
            .call_level_lock(LockingKind::ReaderWriter)
            .child_nodes(2, 6)
            .value_nodes(2, 6),
    )?;
    tree.enable_count()?;
    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let tree = &tree;
                scope.spawn(move || -> Result<()> {
                    for i in 0..400u64 {
                        tree.insert(t * 1_000 + i, i)?;
                        if i % 50 == 0 {
                            tree.count()?;
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked")?;
        }
        Ok(())
    })?;
    assert_eq!(tree.count()?, 1_600);
    tree.validate()?;
    Ok(())
}
