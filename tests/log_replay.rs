#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::path::Path;

use sylva::storage::btree::BPlusTreeOptions;
use sylva::{BPlusTree, ExistingLogAction, Result, SylvaError, TransactionLogOptions};
use tempfile::tempdir;

fn memory_with_log(log: &Path, action: ExistingLogAction) -> BPlusTreeOptions<u64, u64> {
    BPlusTreeOptions::new()
        .child_nodes(2, 6)
        .value_nodes(2, 6)
        .transaction_log(TransactionLogOptions::new(log).existing_log_action(action))
}

fn entries(tree: &BPlusTree<u64, u64>) -> Result<Vec<(u64, u64)>> {
    tree.iter().collect()
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

#[test]
fn uncommitted_memory_tree_is_rebuilt_from_its_log() -> Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("tree.log");
    {
        let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
        for key in 0u64..100 {
            tree.add(key, key + 1)?;
        }
        for key in (0u64..100).step_by(10) {
            tree.insert(key, 0)?;
        }
    }

    let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
    let restored = entries(&tree)?;
    assert_eq!(restored.len(), 100);
    for (key, value) in restored {
        let expected = if key % 10 == 0 { 0 } else { key + 1 };
        assert_eq!(value, expected, "key {key}");
    }
    tree.validate()?;
    Ok(())
}

#[test]
fn removals_survive_replay() -> Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("tree.log");
    {
        let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
        for key in 0u64..40 {
            tree.add(key, key)?;
        }
        for key in 0u64..20 {
            assert!(tree.remove(&key)?);
        }
    }
    let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
    let keys: Vec<u64> = entries(&tree)?.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, (20..40).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn torn_tail_loses_only_the_last_transaction() -> Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("tree.log");
    {
        let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
        for key in 0u64..10 {
            tree.add(key, key * 2)?;
        }
    }
    let full = file_len(&log);
    assert!(full > 0 && full % 10 == 0);
    let frame = full / 10;
    OpenOptions::new().write(true).open(&log)?.set_len(full - 3)?;

    let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
    let restored = entries(&tree)?;
    assert_eq!(restored, (0u64..9).map(|k| (k, k * 2)).collect::<Vec<_>>());
    drop(tree);
    assert_eq!(file_len(&log), 9 * frame);
    Ok(())
}

#[test]
fn replay_and_commit_compacts_the_log() -> Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("tree.log");
    {
        let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
        for key in 0u64..20 {
            tree.add(key, key)?;
        }
        for key in 0u64..20 {
            tree.insert(key, key + 100)?;
        }
    }
    let before = file_len(&log);
    {
        let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::ReplayAndCommit))?;
        assert_eq!(tree.count()?, 20);
    }
    assert!(file_len(&log) < before);

    let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
    assert_eq!(entries(&tree)?, (0u64..20).map(|k| (k, k + 100)).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn truncate_discards_logged_content() -> Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("tree.log");
    {
        let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
        for key in 0u64..10 {
            tree.add(key, key)?;
        }
    }
    assert!(file_len(&log) > 0);
    let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Truncate))?;
    assert!(tree.is_empty()?);
    assert_eq!(file_len(&log), 0);
    Ok(())
}

#[test]
fn ignore_leaves_the_log_alone() -> Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("tree.log");
    {
        let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Replay))?;
        for key in 0u64..5 {
            tree.add(key, key)?;
        }
    }
    let before = file_len(&log);
    let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Ignore))?;
    assert!(tree.is_empty()?);
    drop(tree);
    assert_eq!(file_len(&log), before);
    Ok(())
}

#[test]
fn memory_rollback_restores_the_last_commit() -> Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("tree.log");
    let tree = BPlusTree::open(memory_with_log(&log, ExistingLogAction::Default))?;
    for key in 0u64..30 {
        tree.add(key, key)?;
    }
    tree.commit()?;
    let committed = entries(&tree)?;

    for key in 30u64..60 {
        tree.add(key, key)?;
    }
    for key in 0u64..10 {
        tree.remove(&key)?;
    }
    tree.insert(15, 999)?;
    tree.enable_count()?;
    assert_eq!(tree.count()?, 50);

    tree.rollback()?;
    assert_eq!(entries(&tree)?, committed);
    assert_eq!(tree.count()?, 30);
    tree.validate()?;
    Ok(())
}

#[test]
fn disk_tree_replays_uncommitted_changes() -> Result<()> {
    let dir = tempdir()?;
    let data = dir.path().join("tree.sylva");
    let log = dir.path().join("tree.log");
    let options = || {
        BPlusTreeOptions::<u64, u64>::new()
            .disk(&data)
            .file_block_size(512)
            .transaction_log(TransactionLogOptions::new(&log))
    };
    {
        let tree = BPlusTree::open(options())?;
        for key in 0u64..50 {
            tree.add(key, key)?;
        }
        tree.commit()?;
        assert_eq!(file_len(&log), 0);
        for key in 50u64..100 {
            tree.add(key, key)?;
        }
        assert!(file_len(&log) > 0);
    }

    let tree = BPlusTree::open(options())?;
    assert_eq!(entries(&tree)?, (0u64..100).map(|k| (k, k)).collect::<Vec<_>>());
    assert_eq!(file_len(&log), 0);
    tree.validate()?;
    Ok(())
}

#[test]
fn log_limit_commits_automatically() -> Result<()> {
    let dir = tempdir()?;
    let data = dir.path().join("tree.sylva");
    let log = dir.path().join("tree.log");
    let limit = 1_024;
    let tree = BPlusTree::open(
        BPlusTreeOptions::<u64, u64>::new()
            .disk(&data)
            .file_block_size(512)
            .transaction_log(TransactionLogOptions::new(&log).transaction_log_limit(limit)),
    )?;
    for key in 0u64..500 {
        tree.add(key, key)?;
        assert!(file_len(&log) < limit);
    }
    assert_eq!(tree.count()?, 500);
    Ok(())
}

#[test]
fn disk_rollback_is_unsupported() -> Result<()> {
    let dir = tempdir()?;
    let tree = BPlusTree::open(
        BPlusTreeOptions::<u64, u64>::new()
            .disk(dir.path().join("tree.sylva"))
            .transaction_log(TransactionLogOptions::new(dir.path().join("tree.log"))),
    )?;
    tree.add(1, 1)?;
    assert!(matches!(tree.rollback(), Err(SylvaError::Unsupported(_))));
    Ok(())
}
