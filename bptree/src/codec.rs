//! Byte encodings for keys and values stored in snapshots.
//!
//! Snapshots store every key and value as a length-prefixed byte string. The
//! `NodeCodec` trait defines how a type maps to and from those bytes. Byte
//! strings and strings are stored verbatim; integers use a fixed-width
//! little-endian encoding and reject any other length on decode.

/// A type that can be written into and read back from a snapshot.
pub trait NodeCodec: Sized {
    /// Append the encoded form of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decode a value from exactly `bytes`.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;
}

impl NodeCodec for Vec<u8> {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bytes.to_vec())
    }
}

impl NodeCodec for String {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

macro_rules! fixed_width_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl NodeCodec for $ty {
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
                    let array = bytes.try_into().map_err(|_| CodecError::WrongLength {
                        expected: std::mem::size_of::<$ty>(),
                        actual: bytes.len(),
                    })?;
                    Ok(<$ty>::from_le_bytes(array))
                }
            }
        )*
    };
}

fixed_width_codec!(u32, u64, i32, i64);

/// Errors that can occur while decoding a key or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A fixed-width value had the wrong number of bytes.
    WrongLength { expected: usize, actual: usize },
    /// A string value was not valid UTF-8.
    InvalidUtf8,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongLength { expected, actual } => {
                write!(f, "expected {expected} encoded bytes, found {actual}")
            }
            Self::InvalidUtf8 => write!(f, "encoded string is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<T: NodeCodec>(value: &T) -> Vec<u8> {
        let mut out = Vec::new();
        value.encode(&mut out);
        out
    }

    #[test]
    fn test_bytes_are_stored_verbatim() {
        let key = b"user:42".to_vec();
        assert_eq!(encoded(&key), b"user:42");
        assert_eq!(Vec::<u8>::decode(b"").expect("decode empty"), Vec::<u8>::new());
    }

    #[test]
    fn test_u64_is_little_endian() {
        assert_eq!(encoded(&0x0102_0304_0506_0708_u64), [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(
            u64::decode(&[8, 7, 6, 5, 4, 3, 2, 1]).expect("decode"),
            0x0102_0304_0506_0708
        );
    }

    #[test]
    fn test_fixed_width_rejects_short_input() {
        let err = u64::decode(&[1, 2, 3]).expect_err("short input should fail");
        assert_eq!(
            err,
            CodecError::WrongLength {
                expected: 8,
                actual: 3
            }
        );
        assert_eq!(err.to_string(), "expected 8 encoded bytes, found 3");
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let err = String::decode(&[0xff, 0xfe]).expect_err("invalid utf-8");
        assert_eq!(err, CodecError::InvalidUtf8);
    }

    #[test]
    fn test_negative_integers() {
        assert_eq!(i64::decode(&encoded(&-7_i64)).expect("decode"), -7);
        assert_eq!(i32::decode(&encoded(&i32::MIN)).expect("decode"), i32::MIN);
    }
}
