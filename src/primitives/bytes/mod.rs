#![forbid(unsafe_code)]
//! Varint and slice-reading helpers shared by the node serializer, codecs and the log.

pub mod var {
    //! Unsigned LEB128 varints and ZigZag signed integers.

    use crate::types::{Result, SylvaError};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint, advancing `src` past it.
    pub fn decode_u64(src: &mut &[u8]) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let Some((&byte, rest)) = src.split_first() else {
                return Err(SylvaError::Corruption("varint truncated"));
            };
            *src = rest;
            let payload = u64::from(byte & 0x7f);
            if i == 9 && payload > 1 {
                return Err(SylvaError::Corruption("varint overflows 64 bits"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(SylvaError::Corruption("varint longer than 10 bytes"))
    }

    /// Encodes an i64 as a ZigZag varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        encode_u64(zigzag, out);
    }

    /// Decodes a ZigZag varint.
    pub fn decode_i64(src: &mut &[u8]) -> Result<i64> {
        let zigzag = decode_u64(src)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }

    /// Decodes a varint that must fit a `usize` length.
    pub fn decode_len(src: &mut &[u8]) -> Result<usize> {
        let len = decode_u64(src)?;
        usize::try_from(len).map_err(|_| SylvaError::Corruption("length exceeds usize"))
    }
}

pub mod buf {
    //! Fallible reads from the front of a byte slice.

    use crate::types::{Result, SylvaError};

    /// Splits `n` bytes off the front of `src`.
    pub fn take<'a>(src: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
        if src.len() < n {
            return Err(SylvaError::Corruption("buffer shorter than encoded length"));
        }
        let (head, tail) = src.split_at(n);
        *src = tail;
        Ok(head)
    }

    /// Reads one byte.
    pub fn read_u8(src: &mut &[u8]) -> Result<u8> {
        Ok(take(src, 1)?[0])
    }

    /// Reads a fixed-size array.
    pub fn read_array<const N: usize>(src: &mut &[u8]) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(take(src, N)?);
        Ok(out)
    }

    /// Reads a boolean encoded as a single 0/1 byte.
    pub fn read_bool(src: &mut &[u8]) -> Result<bool> {
        match read_u8(src)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SylvaError::Corruption("invalid boolean byte")),
        }
    }
}
