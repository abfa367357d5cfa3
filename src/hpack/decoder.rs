//! Header block decoder.

use tracing::trace;

use super::table::DynamicTable;
use super::{decode_integer, decode_string, entry_size, H2Header};
use crate::error::HpackDecodingError;

/// HPACK decoder bound to one connection's inbound header blocks.
///
/// Decoding errors leave the dynamic table in an undefined state relative to
/// the peer's encoder, so every error is fatal to the connection.
#[derive(Debug, Clone)]
pub struct HpackDecoder {
    table: DynamicTable,
    /// Largest table size the peer may switch to, i.e. what we advertised.
    max_allowed_table_size: usize,
    max_header_list_size: usize,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new(crate::frame::DEFAULT_HEADER_TABLE_SIZE)
    }
}

impl HpackDecoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            max_allowed_table_size: max_table_size,
            max_header_list_size: usize::MAX,
        }
    }

    /// Change the upper bound for size updates sent by the peer.
    pub fn set_max_allowed_table_size(&mut self, size: usize) {
        self.max_allowed_table_size = size;
    }

    /// Reject blocks whose decoded header list is larger than `size`.
    pub fn set_max_header_list_size(&mut self, size: usize) {
        self.max_header_list_size = size;
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Decode a complete header block, calling `on_header` for each field in order.
    pub fn decode<F>(&mut self, block: &[u8], mut on_header: F) -> Result<(), HpackDecodingError>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let mut pos = 0;
        let mut list_size = 0usize;
        let mut seen_field = false;

        while pos < block.len() {
            let buf = &block[pos..];
            let first = buf[0];

            if first & 0xE0 == 0x20 {
                if seen_field {
                    return Err(HpackDecodingError::LateTableSizeUpdate);
                }
                let (size, n) = decode_integer(buf, 5)?;
                if size > self.max_allowed_table_size {
                    return Err(HpackDecodingError::TableSizeExceeded {
                        requested: size,
                        max: self.max_allowed_table_size,
                    });
                }
                trace!(size, "dynamic table size update");
                self.table.resize(size);
                pos += n;
                continue;
            }

            seen_field = true;

            let (name, value, n) = if first & 0x80 != 0 {
                let (index, n) = decode_integer(buf, 7)?;
                let (name, value) = self
                    .table
                    .lookup(index)
                    .ok_or(HpackDecodingError::IndexOutOfBounds(index))?;
                trace!(index, "indexed field");
                (name.to_vec(), value.to_vec(), n)
            } else if first & 0x40 != 0 {
                let (name, value, n) = self.read_literal(buf, 6)?;
                trace!("literal with incremental indexing");
                self.table.insert(H2Header::new(name.clone(), value.clone()));
                (name, value, n)
            } else {
                // 0000xxxx without indexing, 0001xxxx never indexed
                trace!(never_indexed = first & 0x10 != 0, "literal without indexing");
                self.read_literal(buf, 4)?
            };

            list_size = list_size.saturating_add(entry_size(&name, &value));
            if list_size > self.max_header_list_size {
                return Err(HpackDecodingError::HeaderListTooLarge {
                    max: self.max_header_list_size,
                });
            }

            on_header(&name, &value);
            pos += n;
        }

        Ok(())
    }

    /// Decode a complete header block into a list.
    pub fn decode_to_vec(&mut self, block: &[u8]) -> Result<Vec<H2Header>, HpackDecodingError> {
        let mut headers = Vec::new();
        self.decode(block, |name, value| headers.push(H2Header::new(name, value)))?;
        Ok(headers)
    }

    fn read_literal(&self, buf: &[u8], prefix_bits: u8) -> Result<(Vec<u8>, Vec<u8>, usize), HpackDecodingError> {
        let (index, mut pos) = decode_integer(buf, prefix_bits)?;

        let name = if index == 0 {
            let (name, n) = decode_string(&buf[pos..])?;
            pos += n;
            name
        } else {
            self.table
                .lookup(index)
                .ok_or(HpackDecodingError::IndexOutOfBounds(index))?
                .0
                .to_vec()
        };

        let (value, n) = decode_string(&buf[pos..])?;
        Ok((name, value, pos + n))
    }
}
