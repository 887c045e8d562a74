#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};

use crate::types::{Result, SylvaError};

/// Positioned file I/O used by the block store and the transaction log.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes file data and metadata to disk.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
fn pread(file: &File, off: u64, dst: &mut [u8]) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, dst, off)
}

#[cfg(unix)]
fn pwrite(file: &File, off: u64, src: &[u8]) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, src, off)
}

// `seek_read`/`seek_write` may transfer less than asked for.
#[cfg(windows)]
fn pread(file: &File, off: u64, dst: &mut [u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut done = 0;
    while done < dst.len() {
        match file.seek_read(&mut dst[done..], off + done as u64)? {
            0 => return Err(ErrorKind::UnexpectedEof.into()),
            n => done += n,
        }
    }
    Ok(())
}

#[cfg(windows)]
fn pwrite(file: &File, off: u64, src: &[u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut done = 0;
    while done < src.len() {
        match file.seek_write(&src[done..], off + done as u64)? {
            0 => return Err(ErrorKind::WriteZero.into()),
            n => done += n,
        }
    }
    Ok(())
}

/// Standard file I/O over a shared `File`.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates a file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(SylvaError::from)?;
        Ok(Self::new(file))
    }

    /// Opens an existing file without write access.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(SylvaError::from)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        pread(self.file(), off, dst).map_err(SylvaError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        pwrite(self.file(), off, src).map_err(SylvaError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.file().sync_all().map_err(SylvaError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata().map_err(SylvaError::from)?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.file().set_len(len).map_err(SylvaError::from)
    }
}

/// Returns true when an error is a short read at end of file.
pub fn is_unexpected_eof(err: &SylvaError) -> bool {
    matches!(err, SylvaError::Io(inner) if inner.kind() == ErrorKind::UnexpectedEof)
}

/// Maps `NotFound` I/O errors to `None`.
pub(crate) fn not_found_to_none<T>(res: io::Result<T>) -> Result<Option<T>> {
    match res {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SylvaError::from(err)),
    }
}
