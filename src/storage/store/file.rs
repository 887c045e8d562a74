//! Block file node storage.
//!
//! Block 0 is the file header. Every other block starts with a small header
//! and carries a slice of one node image; an image is a chain of blocks whose
//! first block number is the node's handle.

use std::collections::BTreeSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::NodeStorage;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{block_crc32, Checksum, Crc32, Result, StorageHandle, SylvaError};

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: u32 = 512;
/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: u32 = 65_536;
/// Block size used when none is configured.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

const MAGIC: [u8; 4] = *b"SYLV";
const FORMAT_VERSION: u32 = 1;
const ROOT_BLOCK: u64 = 1;

const HDR_MAGIC: Range<usize> = 0..4;
const HDR_VERSION: Range<usize> = 4..8;
const HDR_BLOCK_SIZE: Range<usize> = 8..12;
const HDR_ROOT: Range<usize> = 12..20;
const HDR_CRC: Range<usize> = 20..24;

const BLK_KIND: usize = 0;
const BLK_CRC: Range<usize> = 4..8;
const BLK_LEN: Range<usize> = 8..12;
const BLK_NEXT: Range<usize> = 12..20;
const BLK_PAYLOAD: usize = 20;

const KIND_FREE: u8 = 0;
const KIND_HEAD: u8 = 1;
const KIND_CONTINUATION: u8 = 2;

/// When a storage file is created.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreatePolicy {
    /// The file must already exist.
    Never,
    /// Create the file if it is missing.
    #[default]
    IfNeeded,
    /// Always start from an empty file.
    Always,
}

/// Settings for [`FileStorage::open`].
#[derive(Clone, Debug)]
pub struct FileStorageOptions {
    /// Path of the block file.
    pub path: PathBuf,
    /// Block size used for new files.
    pub block_size: u32,
    /// Creation policy.
    pub create: CreatePolicy,
    /// Open without write access.
    pub read_only: bool,
}

impl FileStorageOptions {
    /// Options for `path` with defaults.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            create: CreatePolicy::IfNeeded,
            read_only: false,
        }
    }
}

struct BlockHeader {
    kind: u8,
    len: usize,
    next: u64,
}

struct FileState {
    free: BTreeSet<u64>,
    block_count: u64,
}

/// Node storage in a single block file.
pub struct FileStorage {
    path: PathBuf,
    io: Arc<dyn FileIo>,
    block_size: usize,
    read_only: bool,
    state: Mutex<FileState>,
}

impl FileStorage {
    /// Opens or creates a block file.
    pub fn open(options: &FileStorageOptions) -> Result<Self> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&options.block_size) {
            return Err(SylvaError::Invalid("block size out of range"));
        }
        let exists = options.path.exists();
        if options.read_only {
            if !exists {
                return Err(SylvaError::InvalidOwned(format!(
                    "{} does not exist",
                    options.path.display()
                )));
            }
            let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open_read_only(&options.path)?);
            return Self::from_io(options.path.clone(), io, options.block_size, true);
        }
        match (options.create, exists) {
            (CreatePolicy::Never, false) => {
                return Err(SylvaError::InvalidOwned(format!(
                    "{} does not exist",
                    options.path.display()
                )))
            }
            (CreatePolicy::Always, true) => std::fs::remove_file(&options.path)?,
            _ => {}
        }
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&options.path)?);
        Self::from_io(options.path.clone(), io, options.block_size, false)
    }

    /// Opens storage over an arbitrary [`FileIo`].
    pub fn from_io(
        path: PathBuf,
        io: Arc<dyn FileIo>,
        block_size: u32,
        read_only: bool,
    ) -> Result<Self> {
        let len = io.len()?;
        if len == 0 {
            if read_only {
                return Err(SylvaError::Corruption("empty storage file"));
            }
            let storage = Self {
                path,
                io,
                block_size: block_size as usize,
                read_only,
                state: Mutex::new(FileState {
                    free: BTreeSet::new(),
                    block_count: ROOT_BLOCK + 1,
                }),
            };
            storage.write_file_header()?;
            storage.write_block(ROOT_BLOCK, KIND_HEAD, 0, &[])?;
            storage.io.sync_all()?;
            debug!(path = %storage.path.display(), block_size, "storage.file.created");
            return Ok(storage);
        }

        let mut header = [0u8; HDR_CRC.end];
        io.read_at(0, &mut header)?;
        if header[HDR_MAGIC] != MAGIC {
            return Err(SylvaError::Corruption("storage file magic mismatch"));
        }
        let stored_crc = u32::from_le_bytes(le4(&header[HDR_CRC]));
        if Crc32::of(&header[..HDR_CRC.start]) != stored_crc {
            return Err(SylvaError::Corruption("storage header checksum mismatch"));
        }
        let version = u32::from_le_bytes(le4(&header[HDR_VERSION]));
        if version != FORMAT_VERSION {
            return Err(SylvaError::CorruptionOwned(format!(
                "unsupported storage format version {version}"
            )));
        }
        let file_block_size = u32::from_le_bytes(le4(&header[HDR_BLOCK_SIZE]));
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&file_block_size) {
            return Err(SylvaError::Corruption("stored block size out of range"));
        }
        if file_block_size != block_size {
            warn!(
                configured = block_size,
                stored = file_block_size,
                "storage.file.block_size_mismatch"
            );
        }
        let root = u64::from_le_bytes(le8(&header[HDR_ROOT]));
        if root != ROOT_BLOCK {
            return Err(SylvaError::Corruption("unexpected root block"));
        }
        let bs = u64::from(file_block_size);
        if len % bs != 0 {
            warn!(file_len = len, block_size = bs, "storage.file.partial_tail_block");
        }
        let block_count = (len / bs).max(ROOT_BLOCK + 1);
        let storage = Self {
            path,
            io,
            block_size: file_block_size as usize,
            read_only,
            state: Mutex::new(FileState {
                free: BTreeSet::new(),
                block_count,
            }),
        };
        let free = storage.rebuild_free_list(block_count)?;
        debug!(
            path = %storage.path.display(),
            blocks = block_count,
            free = free.len(),
            "storage.file.opened"
        );
        storage.state.lock().free = free;
        Ok(storage)
    }

    /// Path of the block file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size as u32
    }

    /// Number of blocks in the file, including the header.
    pub fn block_count(&self) -> u64 {
        self.state.lock().block_count
    }

    /// Number of blocks available for reuse.
    pub fn free_blocks(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Handles of every block that heads a checksum-valid image, in file order.
    ///
    /// Used by recovery; it does not consult the tree structure at all.
    pub fn scan_heads(&self) -> Result<Vec<StorageHandle>> {
        let count = self.block_count();
        let mut heads = Vec::new();
        for block in ROOT_BLOCK..count {
            match self.read_block(block) {
                Ok((hdr, _)) if hdr.kind == KIND_HEAD && hdr.len > 0 => {
                    heads.push(StorageHandle(block))
                }
                Ok(_) => {}
                Err(err) if err.is_corruption() => {
                    trace!(block, error = %err, "storage.file.scan_skip");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(heads)
    }

    fn payload_capacity(&self) -> usize {
        self.block_size - BLK_PAYLOAD
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(SylvaError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn write_file_header(&self) -> Result<()> {
        let mut block = vec![0u8; self.block_size];
        block[HDR_MAGIC].copy_from_slice(&MAGIC);
        block[HDR_VERSION].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        block[HDR_BLOCK_SIZE].copy_from_slice(&(self.block_size as u32).to_le_bytes());
        block[HDR_ROOT].copy_from_slice(&ROOT_BLOCK.to_le_bytes());
        let crc = Crc32::of(&block[..HDR_CRC.start]);
        block[HDR_CRC].copy_from_slice(&crc.to_le_bytes());
        self.io.write_at(0, &block)
    }

    fn offset(&self, block: u64) -> u64 {
        block * self.block_size as u64
    }

    fn write_block(&self, block: u64, kind: u8, next: u64, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= self.payload_capacity());
        let mut buf = vec![0u8; self.block_size];
        buf[BLK_KIND] = kind;
        buf[BLK_LEN].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        buf[BLK_NEXT].copy_from_slice(&next.to_le_bytes());
        buf[BLK_PAYLOAD..BLK_PAYLOAD + payload.len()].copy_from_slice(payload);
        let crc = block_crc32(block, kind, &buf[BLK_LEN.start..BLK_PAYLOAD + payload.len()]);
        buf[BLK_CRC].copy_from_slice(&crc.to_le_bytes());
        self.io.write_at(self.offset(block), &buf)
    }

    fn read_block_header(&self, block: u64) -> Result<BlockHeader> {
        let mut hdr = [0u8; BLK_PAYLOAD];
        self.io.read_at(self.offset(block), &mut hdr)?;
        Ok(BlockHeader {
            kind: hdr[BLK_KIND],
            len: u32::from_le_bytes(le4(&hdr[BLK_LEN])) as usize,
            next: u64::from_le_bytes(le8(&hdr[BLK_NEXT])),
        })
    }

    fn read_block(&self, block: u64) -> Result<(BlockHeader, Vec<u8>)> {
        let mut buf = vec![0u8; self.block_size];
        self.io.read_at(self.offset(block), &mut buf)?;
        let kind = buf[BLK_KIND];
        let len = u32::from_le_bytes(le4(&buf[BLK_LEN])) as usize;
        if len > self.payload_capacity() {
            return Err(SylvaError::CorruptionOwned(format!(
                "block {block} length {len} exceeds payload capacity"
            )));
        }
        if kind != KIND_FREE {
            let stored = u32::from_le_bytes(le4(&buf[BLK_CRC]));
            if block_crc32(block, kind, &buf[BLK_LEN.start..BLK_PAYLOAD + len]) != stored {
                return Err(SylvaError::CorruptionOwned(format!(
                    "block {block} checksum mismatch"
                )));
            }
        }
        let next = u64::from_le_bytes(le8(&buf[BLK_NEXT]));
        buf.truncate(BLK_PAYLOAD + len);
        buf.drain(..BLK_PAYLOAD);
        Ok((BlockHeader { kind, len, next }, buf))
    }

    fn chain_tail(&self, head: u64) -> Result<Vec<u64>> {
        let count = self.block_count();
        let mut blocks = Vec::new();
        let mut next = self.read_block_header(head)?.next;
        while next != 0 {
            if next >= count || blocks.len() as u64 >= count {
                return Err(SylvaError::CorruptionOwned(format!(
                    "broken block chain starting at {head}"
                )));
            }
            blocks.push(next);
            next = self.read_block_header(next)?.next;
        }
        Ok(blocks)
    }

    fn rebuild_free_list(&self, block_count: u64) -> Result<BTreeSet<u64>> {
        let mut used = vec![false; block_count as usize];
        used[0] = true;
        used[ROOT_BLOCK as usize] = true;
        for block in ROOT_BLOCK..block_count {
            let hdr = match self.read_block_header(block) {
                Ok(hdr) => hdr,
                Err(err) if crate::primitives::io::is_unexpected_eof(&err) => break,
                Err(err) => return Err(err),
            };
            if hdr.kind != KIND_HEAD {
                continue;
            }
            used[block as usize] = true;
            let mut next = hdr.next;
            let mut steps = 0u64;
            while next != 0 && next < block_count && steps < block_count {
                used[next as usize] = true;
                next = self.read_block_header(next)?.next;
                steps += 1;
            }
        }
        Ok(used
            .iter()
            .enumerate()
            .filter(|(_, in_use)| !**in_use)
            .map(|(block, _)| block as u64)
            .collect())
    }

    fn allocate(&self) -> u64 {
        let mut state = self.state.lock();
        if let Some(block) = state.free.pop_first() {
            return block;
        }
        let block = state.block_count;
        state.block_count += 1;
        block
    }

    fn release(&self, blocks: &[u64]) -> Result<()> {
        for &block in blocks {
            self.write_block(block, KIND_FREE, 0, &[])?;
        }
        self.state.lock().free.extend(blocks.iter().copied());
        Ok(())
    }
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[..4]);
    out
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

impl NodeStorage for FileStorage {
    fn open_root(&self) -> Result<(StorageHandle, bool)> {
        let hdr = self.read_block_header(ROOT_BLOCK)?;
        Ok((StorageHandle(ROOT_BLOCK), hdr.kind != KIND_HEAD || hdr.len == 0))
    }

    fn create(&self) -> Result<StorageHandle> {
        self.ensure_writable()?;
        let block = self.allocate();
        self.write_block(block, KIND_HEAD, 0, &[])?;
        trace!(block, "storage.file.create");
        Ok(StorageHandle(block))
    }

    fn try_get_node(&self, handle: StorageHandle) -> Result<Option<Vec<u8>>> {
        if handle.0 == 0 || handle.0 >= self.block_count() {
            return Err(SylvaError::CorruptionOwned(format!(
                "handle {handle} outside the storage file"
            )));
        }
        let (head, mut image) = self.read_block(handle.0)?;
        if head.kind != KIND_HEAD {
            return Err(SylvaError::CorruptionOwned(format!(
                "handle {handle} does not head a node image"
            )));
        }
        if head.len == 0 {
            return Ok(None);
        }
        let limit = self.block_count();
        let mut next = head.next;
        let mut steps = 0u64;
        while next != 0 {
            steps += 1;
            if next >= limit || steps > limit {
                return Err(SylvaError::CorruptionOwned(format!(
                    "broken block chain for {handle}"
                )));
            }
            let (hdr, chunk) = self.read_block(next)?;
            if hdr.kind != KIND_CONTINUATION {
                return Err(SylvaError::CorruptionOwned(format!(
                    "block {next} in chain of {handle} is not a continuation"
                )));
            }
            image.extend_from_slice(&chunk);
            next = hdr.next;
        }
        Ok(Some(image))
    }

    fn update(&self, handle: StorageHandle, image: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let cap = self.payload_capacity();
        let mut old_tail = self.chain_tail(handle.0)?;
        let chunks: Vec<&[u8]> = if image.is_empty() {
            vec![image]
        } else {
            image.chunks(cap).collect()
        };
        let needed = chunks.len() - 1;
        let mut tail: Vec<u64> = Vec::with_capacity(needed);
        while tail.len() < needed {
            match old_tail.first() {
                Some(_) => tail.push(old_tail.remove(0)),
                None => tail.push(self.allocate()),
            }
        }
        for (i, chunk) in chunks.iter().enumerate().skip(1).rev() {
            let next = tail.get(i).copied().unwrap_or(0);
            self.write_block(tail[i - 1], KIND_CONTINUATION, next, chunk)?;
        }
        self.write_block(handle.0, KIND_HEAD, tail.first().copied().unwrap_or(0), chunks[0])?;
        self.release(&old_tail)?;
        trace!(%handle, bytes = image.len(), blocks = chunks.len(), "storage.file.update");
        Ok(())
    }

    fn destroy(&self, handle: StorageHandle) -> Result<()> {
        self.ensure_writable()?;
        if handle.0 == ROOT_BLOCK {
            return Err(SylvaError::Invalid("the root holder cannot be destroyed"));
        }
        let mut blocks = vec![handle.0];
        blocks.extend(self.chain_tail(handle.0)?);
        self.release(&blocks)?;
        trace!(%handle, blocks = blocks.len(), "storage.file.destroy");
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.ensure_writable()?;
        {
            let mut state = self.state.lock();
            state.free.clear();
            state.block_count = ROOT_BLOCK + 1;
        }
        self.io.truncate(self.offset(ROOT_BLOCK + 1))?;
        self.write_file_header()?;
        self.write_block(ROOT_BLOCK, KIND_HEAD, 0, &[])?;
        debug!(path = %self.path.display(), "storage.file.reset");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.write_file_header()?;
        self.io.sync_all()?;
        debug!(path = %self.path.display(), "storage.file.commit");
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}
