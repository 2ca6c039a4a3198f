use std::fmt;
use std::sync::{Arc, OnceLock};

use super::ConversionError;

/// Ordered sequence of bits. A bitstring whose length is a multiple of 8 is a
/// binary and can be read as bytes or, when it holds UTF-8, as text.
#[derive(Clone)]
pub struct Bitstring {
    inner: Arc<Repr>,
}

enum Repr {
    Text(Box<str>),
    Bytes {
        bytes: Box<[u8]>,
        bit_len: usize,
        // UTF-8 view decoded on first request and kept for the life of the value.
        text: OnceLock<Option<Box<str>>>,
    },
}

impl Bitstring {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Repr::Text(text.into().into_boxed_str())),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into().into_boxed_slice();
        let bit_len = bytes.len() * 8;
        Self::from_parts(bytes, bit_len)
    }

    /// Builds a bitstring of `bit_len` bits packed most-significant-bit first.
    /// Unused low bits of the final byte are cleared.
    pub fn from_bits(bit_len: usize, bytes: impl Into<Vec<u8>>) -> Result<Self, ConversionError> {
        let mut bytes = bytes.into();
        if bytes.len() != bit_len.div_ceil(8) {
            return Err(ConversionError::BitLength {
                bit_len,
                byte_len: bytes.len(),
            });
        }

        let rem = bit_len % 8;
        if rem != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= 0xFF_u8 << (8 - rem);
            }
        }

        Ok(Self::from_parts(bytes.into_boxed_slice(), bit_len))
    }

    /// Builds a bitstring from one `0`/`1` value per bit.
    pub fn from_bit_values(bits: &[u8]) -> Result<Self, ConversionError> {
        let mut bytes = vec![0_u8; bits.len().div_ceil(8)];
        for (index, bit) in bits.iter().enumerate() {
            match bit {
                0 => {}
                1 => bytes[index / 8] |= 0x80 >> (index % 8),
                other => return Err(ConversionError::InvalidBit(*other)),
            }
        }

        Ok(Self::from_parts(bytes.into_boxed_slice(), bits.len()))
    }

    fn from_parts(bytes: Box<[u8]>, bit_len: usize) -> Self {
        Self {
            inner: Arc::new(Repr::Bytes {
                bytes,
                bit_len,
                text: OnceLock::new(),
            }),
        }
    }

    pub fn bit_len(&self) -> usize {
        match &*self.inner {
            Repr::Text(text) => text.len() * 8,
            Repr::Bytes { bit_len, .. } => *bit_len,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.bit_len() % 8 == 0
    }

    /// Backing bytes. For a non-binary the last byte is partially used.
    pub fn bytes(&self) -> &[u8] {
        match &*self.inner {
            Repr::Text(text) => text.as_bytes(),
            Repr::Bytes { bytes, .. } => &bytes[..],
        }
    }

    pub fn bits(&self) -> impl Iterator<Item = u8> + '_ {
        let bytes = self.bytes();
        (0..self.bit_len()).map(move |index| (bytes[index / 8] >> (7 - index % 8)) & 1)
    }

    /// UTF-8 view of a binary, or `None` for non-binaries and invalid UTF-8.
    pub fn text(&self) -> Option<&str> {
        match &*self.inner {
            Repr::Text(text) => Some(&text[..]),
            Repr::Bytes {
                bytes,
                bit_len,
                text,
            } => {
                if bit_len % 8 != 0 {
                    return None;
                }
                text.get_or_init(|| {
                    std::str::from_utf8(bytes)
                        .ok()
                        .map(|text| text.to_owned().into_boxed_str())
                })
                .as_deref()
            }
        }
    }

    pub fn to_text(&self) -> Result<&str, ConversionError> {
        if !self.is_binary() {
            return Err(ConversionError::NotBinary {
                bit_len: self.bit_len(),
            });
        }
        self.text().ok_or(ConversionError::InvalidUtf8)
    }

    /// Joins bitstrings at bit granularity.
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Bitstring>) -> Bitstring {
        let parts: Vec<&Bitstring> = parts.into_iter().collect();

        if parts.iter().all(|part| part.is_binary()) {
            let bytes: Vec<u8> = parts
                .iter()
                .flat_map(|part| part.bytes().iter().copied())
                .collect();
            return Bitstring::from_bytes(bytes);
        }

        let total: usize = parts.iter().map(|part| part.bit_len()).sum();
        let mut bytes = vec![0_u8; total.div_ceil(8)];
        let mut offset = 0;
        for bit in parts.iter().flat_map(|part| part.bits()) {
            if bit == 1 {
                bytes[offset / 8] |= 0x80 >> (offset % 8);
            }
            offset += 1;
        }

        Self::from_parts(bytes.into_boxed_slice(), total)
    }

    /// URL percent-encoding of the bytes. Encoding an already encoded value
    /// encodes its `%` signs again.
    pub fn percent_encode(&self) -> Result<String, ConversionError> {
        if !self.is_binary() {
            return Err(ConversionError::NotBinary {
                bit_len: self.bit_len(),
            });
        }
        Ok(urlencoding::encode_binary(self.bytes()).into_owned())
    }
}

impl PartialEq for Bitstring {
    fn eq(&self, other: &Self) -> bool {
        self.bit_len() == other.bit_len() && self.bytes() == other.bytes()
    }
}

impl Eq for Bitstring {}

impl fmt::Debug for Bitstring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text() {
            Some(text) => f.debug_tuple("Bitstring").field(&text).finish(),
            None => f
                .debug_struct("Bitstring")
                .field("bit_len", &self.bit_len())
                .field("bytes", &self.bytes())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_bytes_with_same_content_are_equal() {
        let from_text = Bitstring::from_text("abc");
        let from_bytes = Bitstring::from_bytes(b"abc".to_vec());
        assert_eq!(from_text, from_bytes);
        assert_eq!(from_text.bit_len(), 24);
        assert_eq!(from_bytes.text(), Some("abc"));
    }

    #[test]
    fn text_view_is_cached_per_value() {
        let bits = Bitstring::from_bytes("żółw".as_bytes().to_vec());
        let first = bits.text().expect("utf8") as *const str;
        let clone = bits.clone();
        let second = clone.text().expect("utf8") as *const str;
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_utf8_has_no_text() {
        let bits = Bitstring::from_bytes(vec![0xFF, 0xFE]);
        assert!(bits.is_binary());
        assert_eq!(bits.text(), None);
        assert_eq!(bits.to_text(), Err(ConversionError::InvalidUtf8));
    }

    #[test]
    fn from_bits_masks_unused_bits() {
        let bits = Bitstring::from_bits(3, vec![0b1011_1111]).expect("3 bits");
        assert!(!bits.is_binary());
        assert_eq!(bits.bytes(), &[0b1010_0000]);
        assert_eq!(bits.bits().collect::<Vec<_>>(), vec![1, 0, 1]);
        assert_eq!(
            bits.to_text(),
            Err(ConversionError::NotBinary { bit_len: 3 })
        );
    }

    #[test]
    fn from_bits_checks_buffer_size() {
        let err = Bitstring::from_bits(9, vec![0xFF]).expect_err("too short");
        assert_eq!(
            err,
            ConversionError::BitLength {
                bit_len: 9,
                byte_len: 1
            }
        );
    }

    #[test]
    fn from_bit_values_rejects_non_bits() {
        let bits = Bitstring::from_bit_values(&[1, 1, 0, 1]).expect("bits");
        assert_eq!(bits, Bitstring::from_bits(4, vec![0b1101_0000]).expect("bits"));
        assert_eq!(
            Bitstring::from_bit_values(&[1, 2]),
            Err(ConversionError::InvalidBit(2))
        );
    }

    #[test]
    fn concat_joins_at_bit_granularity() {
        let a = Bitstring::from_bit_values(&[1, 0, 1]).expect("a");
        let b = Bitstring::from_bit_values(&[1, 1, 1, 1, 1]).expect("b");
        let joined = Bitstring::concat([&a, &b]);
        assert!(joined.is_binary());
        assert_eq!(joined.bytes(), &[0b1011_1111]);

        let text = Bitstring::concat([&Bitstring::from_text("ab"), &Bitstring::from_text("c")]);
        assert_eq!(text.text(), Some("abc"));
    }

    #[test]
    fn percent_encoding_is_not_idempotent() {
        let once = Bitstring::from_text("a b&c").percent_encode().expect("encode");
        assert_eq!(once, "a%20b%26c");
        let twice = Bitstring::from_text(once).percent_encode().expect("encode");
        assert_eq!(twice, "a%2520b%2526c");
    }
}
