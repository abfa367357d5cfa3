//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! The encoder and decoder each own a dynamic table and are bound to one
//! connection. Strings are written Huffman-coded whenever that is strictly
//! shorter than the raw octets.

mod decoder;
mod encoder;
mod table;

pub use decoder::HpackDecoder;
pub use encoder::HpackEncoder;
pub use table::{DynamicTable, STATIC_TABLE};

use crate::error::HpackDecodingError;
use crate::huffman;

/// Per-entry overhead counted against the dynamic table size (RFC 7541 Section 4.1).
pub const ENTRY_OVERHEAD: usize = 32;

/// A header field as raw octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl H2Header {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of this field as a dynamic table entry.
    pub fn size(&self) -> usize {
        entry_size(&self.name, &self.value)
    }
}

pub(crate) fn entry_size(name: &[u8], value: &[u8]) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

/// Write `value` as an HPACK integer with an `prefix_bits`-bit prefix.
/// The bits of `mask` above the prefix are kept in the first byte.
pub fn encode_integer(buf: &mut Vec<u8>, mask: u8, prefix_bits: u8, value: usize) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        buf.push(mask | value as u8);
        return;
    }

    buf.push(mask | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        buf.push((rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
    buf.push(rest as u8);
}

/// Exact number of bytes [`encode_integer`] writes for `value`.
pub fn integer_size(prefix_bits: u8, value: usize) -> usize {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        return 1;
    }
    let mut rest = value - max_prefix;
    let mut size = 2;
    while rest >= 0x80 {
        rest >>= 7;
        size += 1;
    }
    size
}

/// Decode an integer with an `prefix_bits`-bit prefix from the start of `buf`.
/// Returns the value and the number of bytes consumed. Values above
/// `u32::MAX` are rejected.
pub fn decode_integer(buf: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackDecodingError> {
    let first = *buf.first().ok_or(HpackDecodingError::IntegerUnterminated)?;
    let max_prefix = (1u64 << prefix_bits) - 1;
    let mut value = first as u64 & max_prefix;
    if value < max_prefix {
        return Ok((value as usize, 1));
    }

    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate().skip(1) {
        if shift > 28 {
            return Err(HpackDecodingError::IntegerOverflow);
        }
        value += ((b & 0x7F) as u64) << shift;
        if value > u32::MAX as u64 {
            return Err(HpackDecodingError::IntegerOverflow);
        }
        if b & 0x80 == 0 {
            return Ok((value as usize, i + 1));
        }
        shift += 7;
    }

    Err(HpackDecodingError::IntegerUnterminated)
}

/// Write a string literal, Huffman-coded if that is strictly shorter.
pub fn encode_string(buf: &mut Vec<u8>, s: &[u8]) {
    let huffman_len = huffman::encoded_length(s);
    if huffman_len < s.len() {
        encode_integer(buf, 0x80, 7, huffman_len);
        huffman::encode(s, buf);
    } else {
        encode_integer(buf, 0x00, 7, s.len());
        buf.extend_from_slice(s);
    }
}

/// Exact number of bytes [`encode_string`] writes for `s`.
pub fn string_size(s: &[u8]) -> usize {
    let len = huffman::encoded_length(s).min(s.len());
    integer_size(7, len) + len
}

/// Decode a string literal from the start of `buf`.
/// Returns the octets and the number of bytes consumed.
pub fn decode_string(buf: &[u8]) -> Result<(Vec<u8>, usize), HpackDecodingError> {
    let huffman_coded = buf.first().is_some_and(|b| b & 0x80 != 0);
    let (len, n) = decode_integer(buf, 7)?;
    let end = n
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or(HpackDecodingError::StringTooShort)?;

    let raw = &buf[n..end];
    let s = if huffman_coded {
        let mut out = Vec::with_capacity(raw.len() * 8 / 5);
        huffman::decode(raw, &mut out)?;
        out
    } else {
        raw.to_vec()
    };
    Ok((s, end))
}
