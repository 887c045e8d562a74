#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sylva::storage::btree::{BPlusTreeOptions, NodeHandle, NodeSerializer};
use sylva::storage::store::FileStorageOptions;
use sylva::types::StorageHandle;
use sylva::{BPlusTree, CreatePolicy, FileStorage, NodeStorage, Result, SylvaError};
use tempfile::tempdir;

const BLOCK: u32 = 512;
const PAYLOAD_OFFSET: u64 = 20;

fn options(path: &Path) -> BPlusTreeOptions<u64, u64> {
    BPlusTreeOptions::new()
        .disk(path)
        .file_block_size(BLOCK)
        .child_nodes(4, 12)
        .value_nodes(4, 12)
}

fn build(path: &Path, total: u64) -> Result<()> {
    let tree = BPlusTree::open(options(path))?;
    for key in 0..total {
        tree.add(key, key * 3)?;
    }
    tree.commit()
}

fn scribble(path: &Path, block: u64) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(block * u64::from(BLOCK) + PAYLOAD_OFFSET))?;
    file.write_all(&[0xA5; 6])?;
    file.sync_all()?;
    Ok(())
}

/// First leaf block found in the file and the number of entries it holds.
fn find_leaf(path: &Path) -> Result<(StorageHandle, usize)> {
    let mut storage_options = FileStorageOptions::new(path);
    storage_options.block_size = BLOCK;
    storage_options.create = CreatePolicy::Never;
    storage_options.read_only = true;
    let storage = FileStorage::open(&storage_options)?;
    let serializer = NodeSerializer::<u64, u64>::new(12, 12);
    for head in storage.scan_heads()? {
        let Some(image) = storage.try_get_node(head)? else {
            continue;
        };
        let node = serializer.read(NodeHandle::new(head), &image)?;
        if node.is_leaf() && !node.is_root() {
            return Ok((head, node.count()));
        }
    }
    Err(SylvaError::NotFound)
}

fn backup_of(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

#[test]
fn enumerate_file_walks_an_intact_tree() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("intact.sylva");
    build(&path, 300)?;
    let entries: Vec<(u64, u64)> = BPlusTree::enumerate_file(&options(&path))?.collect::<Result<_>>()?;
    assert_eq!(entries, (0..300).map(|k| (k, k * 3)).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn damaged_root_is_recovered_from_leaves() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("damaged.sylva");
    build(&path, 1_000)?;
    scribble(&path, 1)?;

    let walked: Result<Vec<(u64, u64)>> = BPlusTree::enumerate_file(&options(&path))
        .and_then(|entries| entries.collect());
    assert!(walked.is_err());

    let recovered = BPlusTree::recover_file(&options(&path))?;
    assert_eq!(recovered, 1_000);
    assert!(backup_of(&path).exists());

    let tree = BPlusTree::open(options(&path).create_file(CreatePolicy::Never))?;
    let report = tree.validate()?;
    assert_eq!(report.entries, 1_000);
    assert_eq!(tree.get(&999)?, 2_997);
    Ok(())
}

#[test]
fn damaged_leaf_is_skipped_by_the_scan() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("leaf.sylva");
    build(&path, 500)?;
    let (leaf, lost) = find_leaf(&path)?;
    scribble(&path, leaf.0)?;

    let mut scan = BPlusTree::recovery_scan(&options(&path))?;
    let mut survivors: Vec<u64> = scan.by_ref().map(|(key, _)| key).collect();
    assert_eq!(survivors.len(), 500 - lost);
    assert_eq!(scan.skipped(), 0);
    survivors.sort_unstable();
    survivors.dedup();
    assert_eq!(survivors.len(), 500 - lost);

    let recovered = BPlusTree::recover_file(&options(&path))?;
    assert_eq!(recovered, (500 - lost) as u64);
    let tree = BPlusTree::open(options(&path))?;
    tree.validate()?;
    Ok(())
}

#[test]
fn empty_tree_recovers_nothing() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.sylva");
    build(&path, 0)?;
    assert_eq!(BPlusTree::recover_file(&options(&path))?, 0);
    assert!(!backup_of(&path).exists());
    Ok(())
}

#[test]
fn offline_access_needs_a_file_name() {
    let options = BPlusTreeOptions::<u64, u64>::new();
    assert!(matches!(
        BPlusTree::recover_file(&options),
        Err(SylvaError::Invalid(_))
    ));
    assert!(BPlusTree::enumerate_file(&options).is_err());
}
