#![forbid(unsafe_code)]
//! CRC32 helpers shared by block storage and the transaction log.

/// Incremental checksum state.
pub trait Checksum: Default {
    /// Feeds more bytes in.
    fn update(&mut self, bytes: &[u8]) -> &mut Self;

    /// Checksum of everything fed so far; the state is left untouched.
    fn value(&self) -> u32;

    /// One-shot checksum of `bytes`.
    fn of(bytes: &[u8]) -> u32 {
        let mut state = Self::default();
        state.update(bytes);
        state.value()
    }
}

/// CRC32 (IEEE) backed by `crc32fast`.
#[derive(Clone, Default)]
pub struct Crc32(crc32fast::Hasher);

impl Checksum for Crc32 {
    fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    fn value(&self) -> u32 {
        self.0.clone().finalize()
    }
}

/// Checksum of one storage block. The block number and kind are mixed in so
/// a block copied to the wrong place fails verification.
pub fn block_crc32(block_no: u64, kind: u8, covered: &[u8]) -> u32 {
    Crc32::default()
        .update(&block_no.to_be_bytes())
        .update(&[kind])
        .update(covered)
        .value()
}
