#![forbid(unsafe_code)]
//! Value-level write-ahead transaction log.
//!
//! The log is a headerless sequence of frames, one per committed tree
//! transaction:
//!
//! ```text
//! 0xbb | len: u32 LE | payload (len bytes) | crc32(payload): u32 LE | 0xee | len: u32 LE
//! ```
//!
//! The payload is a list of `op: u8 | key | value?` records
//! (`1 = add`, `2 = update`, `3 = remove`). A frame is accepted only if both
//! markers, both lengths and the CRC agree; the first frame that fails any
//! check ends the log and everything from it onwards is truncated.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::primitives::io::{is_unexpected_eof, FileIo, StdFileIo};
use crate::storage::btree::{KeyCodec, ValCodec};
use crate::types::{Checksum, Crc32, Result, SylvaError};

const FRAME_START: u8 = 0xbb;
const FRAME_END: u8 = 0xee;
const FRAME_HEAD_LEN: usize = 5;
const FRAME_TAIL_LEN: usize = 9;
const MAX_FRAME_PAYLOAD: u32 = u32::MAX - 64;

const OP_ADD: u8 = 1;
const OP_UPDATE: u8 = 2;
const OP_REMOVE: u8 = 3;

/// What to do with log content found when a tree is opened.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExistingLogAction {
    /// Leave the log alone.
    Ignore,
    /// Re-apply the logged operations to the tree.
    Replay,
    /// Replay, then commit the tree so the log can be truncated.
    ReplayAndCommit,
    /// Discard the log.
    Truncate,
    /// Same as [`ExistingLogAction::ReplayAndCommit`].
    #[default]
    Default,
}

impl ExistingLogAction {
    /// Resolves `Default` to the concrete action.
    pub fn resolve(self) -> Self {
        match self {
            ExistingLogAction::Default => ExistingLogAction::ReplayAndCommit,
            other => other,
        }
    }
}

/// Configuration for a tree's transaction log.
#[derive(Clone, Debug)]
pub struct TransactionLogOptions {
    /// Path of the log file.
    pub file_name: PathBuf,
    /// Action applied to pre-existing log content on open.
    pub existing_log_action: ExistingLogAction,
    /// Size in bytes after which the tree commits automatically.
    pub transaction_log_limit: Option<u64>,
    /// Whether each committed transaction is fsynced.
    pub sync_on_commit: bool,
}

impl TransactionLogOptions {
    /// Creates options for a log at `file_name` with default behaviour.
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            existing_log_action: ExistingLogAction::Default,
            transaction_log_limit: None,
            sync_on_commit: true,
        }
    }

    /// Sets the action applied to existing log content.
    pub fn existing_log_action(mut self, action: ExistingLogAction) -> Self {
        self.existing_log_action = action;
        self
    }

    /// Sets the automatic commit threshold.
    pub fn transaction_log_limit(mut self, bytes: u64) -> Self {
        self.transaction_log_limit = Some(bytes);
        self
    }

    /// Enables or disables fsync per committed transaction.
    pub fn sync_on_commit(mut self, enabled: bool) -> Self {
        self.sync_on_commit = enabled;
        self
    }
}

/// One logged value operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOp<K, V> {
    /// A key was inserted.
    Add(K, V),
    /// An existing key received a new value.
    Update(K, V),
    /// A key was removed.
    Remove(K),
}

impl<K, V> LogOp<K, V> {
    /// The key this operation touches.
    pub fn key(&self) -> &K {
        match self {
            LogOp::Add(k, _) | LogOp::Update(k, _) | LogOp::Remove(k) => k,
        }
    }
}

/// Buffered operations of one in-flight log transaction.
#[derive(Debug, Default)]
pub struct LogToken {
    payload: Vec<u8>,
    ops: usize,
}

impl LogToken {
    /// Number of operations buffered so far.
    pub fn len(&self) -> usize {
        self.ops
    }

    /// Returns true if nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.ops == 0
    }
}

/// Counters describing log activity.
#[derive(Clone, Debug, Default)]
pub struct LogStats {
    /// Frames appended since open.
    pub frames_appended: u64,
    /// Bytes appended since open.
    pub bytes_appended: u64,
    /// Number of fsyncs issued.
    pub syncs: u64,
    /// Frames read back by replay.
    pub frames_replayed: u64,
    /// Bytes discarded because a frame was torn or failed its CRC.
    pub bytes_truncated: u64,
}

struct LogState {
    append_offset: u64,
    checkpoint_offset: u64,
    stats: LogStats,
}

/// Write-ahead log of value operations for one tree.
pub struct TransactionLog<K: KeyCodec, V: ValCodec> {
    path: PathBuf,
    io: Arc<dyn FileIo>,
    sync_on_commit: bool,
    state: Mutex<LogState>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> TransactionLog<K, V> {
    /// Opens or creates the log file, cutting off any torn tail.
    pub fn open(options: &TransactionLogOptions) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&options.file_name)?);
        Self::with_io(options.file_name.clone(), io, options.sync_on_commit)
    }

    /// Opens a log over an arbitrary [`FileIo`].
    pub fn with_io(path: PathBuf, io: Arc<dyn FileIo>, sync_on_commit: bool) -> Result<Self> {
        let len = io.len()?;
        let mut reader = FrameReader::new(Arc::clone(&io), len);
        while reader.next_frame()?.is_some() {}
        let valid = reader.valid_up_to();
        let mut stats = LogStats::default();
        if valid < len {
            warn!(
                path = %path.display(),
                valid_up_to = valid,
                file_len = len,
                "log.open.truncated_tail"
            );
            io.truncate(valid)?;
            stats.bytes_truncated = len - valid;
        }
        debug!(path = %path.display(), size = valid, "log.open");
        Ok(Self {
            path,
            io,
            sync_on_commit,
            state: Mutex::new(LogState {
                append_offset: valid,
                checkpoint_offset: 0,
                stats,
            }),
            _marker: PhantomData,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts a new transaction.
    pub fn begin_transaction(&self) -> LogToken {
        LogToken::default()
    }

    /// Records an insert.
    pub fn add_value(&self, token: &mut LogToken, key: &K, value: &V) {
        token.payload.push(OP_ADD);
        K::encode_key(key, &mut token.payload);
        V::encode_val(value, &mut token.payload);
        token.ops += 1;
    }

    /// Records an update of an existing key.
    pub fn update_value(&self, token: &mut LogToken, key: &K, value: &V) {
        token.payload.push(OP_UPDATE);
        K::encode_key(key, &mut token.payload);
        V::encode_val(value, &mut token.payload);
        token.ops += 1;
    }

    /// Records a removal.
    pub fn remove_value(&self, token: &mut LogToken, key: &K) {
        token.payload.push(OP_REMOVE);
        K::encode_key(key, &mut token.payload);
        token.ops += 1;
    }

    /// Appends the transaction as one frame.
    pub fn commit_transaction(&self, token: LogToken) -> Result<()> {
        if token.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(&token.payload)?;
        let mut state = self.state.lock();
        self.io.write_at(state.append_offset, &frame)?;
        if self.sync_on_commit {
            self.io.sync_all()?;
            state.stats.syncs += 1;
        }
        state.append_offset += frame.len() as u64;
        state.stats.frames_appended += 1;
        state.stats.bytes_appended += frame.len() as u64;
        debug!(ops = token.ops, bytes = frame.len(), "log.commit");
        Ok(())
    }

    /// Discards a transaction without writing anything.
    pub fn rollback_transaction(&self, token: LogToken) {
        debug!(ops = token.ops, "log.rollback");
    }

    /// Re-applies every logged operation in order.
    pub fn replay_log<F>(&self, apply: F) -> Result<u64>
    where
        F: FnMut(LogOp<K, V>) -> Result<()>,
    {
        let end = self.state.lock().append_offset;
        self.replay_range(end, apply)
    }

    /// Re-applies logged operations up to the last checkpoint.
    pub fn replay_to_checkpoint<F>(&self, apply: F) -> Result<u64>
    where
        F: FnMut(LogOp<K, V>) -> Result<()>,
    {
        let end = self.state.lock().checkpoint_offset;
        self.replay_range(end, apply)
    }

    fn replay_range<F>(&self, end: u64, mut apply: F) -> Result<u64>
    where
        F: FnMut(LogOp<K, V>) -> Result<()>,
    {
        let mut reader = FrameReader::new(Arc::clone(&self.io), end);
        let mut ops = 0u64;
        let mut frames = 0u64;
        while let Some(payload) = reader.next_frame()? {
            frames += 1;
            let mut src = payload.as_slice();
            while !src.is_empty() {
                apply(decode_op::<K, V>(&mut src)?)?;
                ops += 1;
            }
        }
        let valid = reader.valid_up_to();
        if valid < end {
            warn!(valid_up_to = valid, end, "log.replay.truncated");
            let mut state = self.state.lock();
            self.io.truncate(valid)?;
            state.stats.bytes_truncated += state.append_offset.saturating_sub(valid);
            state.append_offset = valid;
            state.checkpoint_offset = state.checkpoint_offset.min(valid);
        }
        self.state.lock().stats.frames_replayed += frames;
        debug!(frames, ops, "log.replay");
        Ok(ops)
    }

    /// Folds the log into an ordered sequence.
    ///
    /// `existing` must already be ordered by `comparer`. Logged operations
    /// override existing entries with an equal key; the latest operation on a
    /// key wins.
    pub fn merge_log<I, C>(&self, comparer: C, existing: I) -> Result<Vec<(K, V)>>
    where
        I: IntoIterator<Item = (K, V)>,
        C: Fn(&K, &K) -> Ordering,
    {
        let mut logged: Vec<(usize, LogOp<K, V>)> = Vec::new();
        self.replay_log(|op| {
            logged.push((logged.len(), op));
            Ok(())
        })?;
        logged.sort_by(|a, b| comparer(a.1.key(), b.1.key()).then(a.0.cmp(&b.0)));
        let mut latest: Vec<LogOp<K, V>> = Vec::with_capacity(logged.len());
        for (_, op) in logged {
            match latest.last_mut() {
                Some(last) if comparer(last.key(), op.key()) == Ordering::Equal => *last = op,
                _ => latest.push(op),
            }
        }

        let mut merged = Vec::new();
        let mut pending = latest.into_iter().peekable();
        for (key, value) in existing {
            while let Some(op) = pending.peek() {
                if comparer(op.key(), &key) != Ordering::Less {
                    break;
                }
                if let Some(LogOp::Add(k, v) | LogOp::Update(k, v)) = pending.next() {
                    merged.push((k, v));
                }
            }
            match pending.peek() {
                Some(op) if comparer(op.key(), &key) == Ordering::Equal => {
                    if let Some(LogOp::Add(k, v) | LogOp::Update(k, v)) = pending.next() {
                        merged.push((k, v));
                    }
                }
                _ => merged.push((key, value)),
            }
        }
        for op in pending {
            if let LogOp::Add(k, v) | LogOp::Update(k, v) = op {
                merged.push((k, v));
            }
        }
        Ok(merged)
    }

    /// Empties the log.
    pub fn truncate_log(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.io.truncate(0)?;
        self.io.sync_all()?;
        state.append_offset = 0;
        state.checkpoint_offset = 0;
        debug!(path = %self.path.display(), "log.truncate");
        Ok(())
    }

    /// Rewrites the log as a single transaction adding `entries`, and marks
    /// the result as the checkpoint.
    pub fn compact<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut token = self.begin_transaction();
        for (key, value) in entries {
            self.add_value(&mut token, &key, &value);
        }
        let frame = if token.is_empty() {
            Vec::new()
        } else {
            encode_frame(&token.payload)?
        };
        let mut state = self.state.lock();
        self.io.truncate(0)?;
        if !frame.is_empty() {
            self.io.write_at(0, &frame)?;
        }
        self.io.sync_all()?;
        state.stats.syncs += 1;
        state.append_offset = frame.len() as u64;
        state.checkpoint_offset = state.append_offset;
        debug!(ops = token.ops, bytes = frame.len(), "log.compact");
        Ok(())
    }

    /// Drops everything written after the last checkpoint.
    pub fn truncate_to_checkpoint(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.io.truncate(state.checkpoint_offset)?;
        state.append_offset = state.checkpoint_offset;
        Ok(())
    }

    /// Marks the current end of the log as the checkpoint.
    pub fn mark_checkpoint(&self) {
        let mut state = self.state.lock();
        state.checkpoint_offset = state.append_offset;
    }

    /// Offset of the last checkpoint.
    pub fn checkpoint_offset(&self) -> u64 {
        self.state.lock().checkpoint_offset
    }

    /// Current size of the log in bytes.
    pub fn size(&self) -> u64 {
        self.state.lock().append_offset
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> LogStats {
        self.state.lock().stats.clone()
    }
}

fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_PAYLOAD)
        .ok_or(SylvaError::Invalid("log transaction too large"))?;
    let mut frame = Vec::with_capacity(payload.len() + FRAME_HEAD_LEN + FRAME_TAIL_LEN);
    frame.push(FRAME_START);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&Crc32::of(payload).to_le_bytes());
    frame.push(FRAME_END);
    frame.extend_from_slice(&len.to_le_bytes());
    Ok(frame)
}

fn decode_op<K: KeyCodec, V: ValCodec>(src: &mut &[u8]) -> Result<LogOp<K, V>> {
    let Some((&op, rest)) = src.split_first() else {
        return Err(SylvaError::Corruption("log op truncated"));
    };
    *src = rest;
    match op {
        OP_ADD => {
            let key = K::decode_key(src)?;
            Ok(LogOp::Add(key, V::decode_val(src)?))
        }
        OP_UPDATE => {
            let key = K::decode_key(src)?;
            Ok(LogOp::Update(key, V::decode_val(src)?))
        }
        OP_REMOVE => Ok(LogOp::Remove(K::decode_key(src)?)),
        _ => Err(SylvaError::Corruption("unknown log op")),
    }
}

/// Sequential frame reader; stops at the first invalid frame.
struct FrameReader {
    io: Arc<dyn FileIo>,
    offset: u64,
    end: u64,
    valid_up_to: u64,
}

impl FrameReader {
    fn new(io: Arc<dyn FileIo>, end: u64) -> Self {
        Self {
            io,
            offset: 0,
            end,
            valid_up_to: 0,
        }
    }

    fn read(&self, off: u64, dst: &mut [u8]) -> Result<bool> {
        if off + dst.len() as u64 > self.end {
            return Ok(false);
        }
        match self.io.read_at(off, dst) {
            Ok(()) => Ok(true),
            Err(err) if is_unexpected_eof(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.offset >= self.end {
            return Ok(None);
        }
        let mut head = [0u8; FRAME_HEAD_LEN];
        if !self.read(self.offset, &mut head)? || head[0] != FRAME_START {
            return Ok(self.stop());
        }
        let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]);
        let payload_off = self.offset + FRAME_HEAD_LEN as u64;
        if len > MAX_FRAME_PAYLOAD
            || payload_off + u64::from(len) + FRAME_TAIL_LEN as u64 > self.end
        {
            return Ok(self.stop());
        }
        let mut payload = vec![0u8; len as usize];
        if !self.read(payload_off, &mut payload)? {
            return Ok(self.stop());
        }
        let mut tail = [0u8; FRAME_TAIL_LEN];
        if !self.read(payload_off + u64::from(len), &mut tail)? {
            return Ok(self.stop());
        }
        let stored_crc = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let footer_len = u32::from_le_bytes([tail[5], tail[6], tail[7], tail[8]]);
        if tail[4] != FRAME_END || footer_len != len || Crc32::of(&payload) != stored_crc {
            return Ok(self.stop());
        }
        self.offset = payload_off + u64::from(len) + FRAME_TAIL_LEN as u64;
        self.valid_up_to = self.offset;
        Ok(Some(payload))
    }

    fn stop(&mut self) -> Option<Vec<u8>> {
        self.offset = self.end;
        None
    }

    fn valid_up_to(&self) -> u64 {
        self.valid_up_to
    }
}
