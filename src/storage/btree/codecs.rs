//! Key and value encodings.
//!
//! Entries are concatenated inside a serialized node and inside a log frame,
//! so decoders consume exactly their own bytes from the front of the slice.

use crate::primitives::bytes::{buf, var};
use crate::types::{Result, SylvaError};

/// Trait implemented by key types stored in the tree.
pub trait KeyCodec: Sized + Clone + Send + Sync + 'static {
    /// Appends the encoded key to `out`.
    fn encode_key(key: &Self, out: &mut Vec<u8>);

    /// Decodes a key from the front of `src`, advancing it.
    fn decode_key(src: &mut &[u8]) -> Result<Self>;
}

/// Trait implemented by value types stored in the tree.
pub trait ValCodec: Sized + Clone + Send + Sync + 'static {
    /// Appends the encoded value to `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    /// Decodes a value from the front of `src`, advancing it.
    fn decode_val(src: &mut &[u8]) -> Result<Self>;
}

macro_rules! fixed_width_codec {
    ($($ty:ty),*) => {
        $(
            impl KeyCodec for $ty {
                fn encode_key(key: &Self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&key.to_be_bytes());
                }

                fn decode_key(src: &mut &[u8]) -> Result<Self> {
                    Ok(<$ty>::from_be_bytes(buf::read_array(src)?))
                }
            }

            impl ValCodec for $ty {
                fn encode_val(value: &Self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&value.to_be_bytes());
                }

                fn decode_val(src: &mut &[u8]) -> Result<Self> {
                    Ok(<$ty>::from_be_bytes(buf::read_array(src)?))
                }
            }
        )*
    };
}

fixed_width_codec!(u32, u64, i32, i64);

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    var::encode_u64(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

fn decode_bytes<'a>(src: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = var::decode_len(src)?;
    buf::take(src, len)
}

impl KeyCodec for Vec<u8> {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        encode_bytes(key, out);
    }

    fn decode_key(src: &mut &[u8]) -> Result<Self> {
        Ok(decode_bytes(src)?.to_vec())
    }
}

impl ValCodec for Vec<u8> {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        encode_bytes(value, out);
    }

    fn decode_val(src: &mut &[u8]) -> Result<Self> {
        Ok(decode_bytes(src)?.to_vec())
    }
}

impl KeyCodec for String {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        encode_bytes(key.as_bytes(), out);
    }

    fn decode_key(src: &mut &[u8]) -> Result<Self> {
        let bytes = decode_bytes(src)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SylvaError::Corruption("key is not utf-8"))
    }
}

impl ValCodec for String {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        encode_bytes(value.as_bytes(), out);
    }

    fn decode_val(src: &mut &[u8]) -> Result<Self> {
        let bytes = decode_bytes(src)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SylvaError::Corruption("value is not utf-8"))
    }
}

impl ValCodec for bool {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.push(u8::from(*value));
    }

    fn decode_val(src: &mut &[u8]) -> Result<Self> {
        buf::read_bool(src)
    }
}

impl ValCodec for () {
    fn encode_val(_value: &Self, _out: &mut Vec<u8>) {}

    fn decode_val(_src: &mut &[u8]) -> Result<Self> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenated_entries_decode_in_order() {
        let mut out = Vec::new();
        u64::encode_key(&7, &mut out);
        String::encode_val(&"seven".to_string(), &mut out);
        i32::encode_key(&-3, &mut out);
        <Vec<u8>>::encode_val(&vec![1, 2, 3], &mut out);
        bool::encode_val(&true, &mut out);

        let mut src = out.as_slice();
        assert_eq!(u64::decode_key(&mut src).unwrap(), 7);
        assert_eq!(String::decode_val(&mut src).unwrap(), "seven");
        assert_eq!(i32::decode_key(&mut src).unwrap(), -3);
        assert_eq!(<Vec<u8>>::decode_val(&mut src).unwrap(), vec![1, 2, 3]);
        assert!(bool::decode_val(&mut src).unwrap());
        assert!(src.is_empty());
    }

    #[test]
    fn unit_value_is_zero_width() {
        let mut out = Vec::new();
        <()>::encode_val(&(), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn truncated_string_is_corruption() {
        let mut out = Vec::new();
        String::encode_key(&"abcdef".to_string(), &mut out);
        out.truncate(4);
        let mut src = out.as_slice();
        assert!(String::decode_key(&mut src).unwrap_err().is_corruption());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut out = Vec::new();
        <Vec<u8>>::encode_key(&vec![0xff, 0xfe], &mut out);
        let mut src = out.as_slice();
        assert!(String::decode_key(&mut src).is_err());
    }
}
