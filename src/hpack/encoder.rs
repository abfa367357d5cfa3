//! Header block encoder.

use tracing::trace;

use super::table::{DynamicTable, Match};
use super::{encode_integer, encode_string, integer_size, H2Header};

/// Header names whose values are written never-indexed unless the caller
/// says otherwise.
const SENSITIVE_HEADERS: [&[u8]; 3] = [b"authorization", b"proxy-authorization", b"cookie"];

/// HPACK encoder bound to one connection's outbound header blocks.
///
/// Exact matches in the static or dynamic table are emitted as indexed
/// fields, name matches as literals with an indexed name, and everything else
/// as a literal with incremental indexing.
#[derive(Debug, Clone)]
pub struct HpackEncoder {
    table: DynamicTable,
    /// Smallest size set since the last block, and the latest one.
    pending_size_update: Option<(usize, usize)>,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new(crate::frame::DEFAULT_HEADER_TABLE_SIZE)
    }
}

impl HpackEncoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            pending_size_update: None,
        }
    }

    /// Change the dynamic table size. The update is signalled at the start
    /// of the next encoded field.
    pub fn set_max_table_size(&mut self, max_table_size: usize) {
        self.table.resize(max_table_size);
        self.pending_size_update = Some(match self.pending_size_update {
            Some((min, _)) => (min.min(max_table_size), max_table_size),
            None => (max_table_size, max_table_size),
        });
    }

    /// Number of entries in the dynamic table.
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    pub fn is_sensitive(name: &[u8]) -> bool {
        SENSITIVE_HEADERS.contains(&name)
    }

    fn write_pending_size_update(&mut self, buf: &mut Vec<u8>) {
        if let Some((min, last)) = self.pending_size_update.take() {
            if min < last {
                encode_integer(buf, 0x20, 5, min);
            }
            encode_integer(buf, 0x20, 5, last);
            trace!(min, last, "dynamic table size update");
        }
    }

    /// Bytes the next block's leading size update will take, if any.
    pub fn pending_size_update_len(&self) -> usize {
        match self.pending_size_update {
            Some((min, last)) if min < last => integer_size(5, min) + integer_size(5, last),
            Some((_, last)) => integer_size(5, last),
            None => 0,
        }
    }

    /// Upper bound on the bytes [`encode_header`](Self::encode_header) writes
    /// for this field, ignoring any pending size update.
    pub fn estimate_header_size(name: &[u8], value: &[u8]) -> usize {
        1 + integer_size(7, name.len()) + name.len() + integer_size(7, value.len()) + value.len()
    }

    /// Encode one header field.
    pub fn encode_header(&mut self, buf: &mut Vec<u8>, name: &[u8], value: &[u8], sensitive: bool) {
        self.write_pending_size_update(buf);

        let found = self.table.find(name, value);

        if sensitive {
            trace!(name = %String::from_utf8_lossy(name), "literal never indexed");
            match found {
                Match::Full(index) | Match::Name(index) => encode_integer(buf, 0x10, 4, index),
                Match::None => {
                    buf.push(0x10);
                    encode_string(buf, name);
                }
            }
            encode_string(buf, value);
            return;
        }

        match found {
            Match::Full(index) => {
                trace!(index, "indexed field");
                encode_integer(buf, 0x80, 7, index);
            }
            Match::Name(index) => {
                trace!(index, "literal with incremental indexing, indexed name");
                encode_integer(buf, 0x40, 6, index);
                encode_string(buf, value);
                self.table.insert(H2Header::new(name, value));
            }
            Match::None => {
                trace!(name = %String::from_utf8_lossy(name), "literal with incremental indexing, new name");
                buf.push(0x40);
                encode_string(buf, name);
                encode_string(buf, value);
                self.table.insert(H2Header::new(name, value));
            }
        }
    }

    /// Encode the four request pseudo-headers.
    pub fn encode_request(&mut self, buf: &mut Vec<u8>, method: &str, scheme: &str, authority: &str, path: &str) {
        self.encode_header(buf, b":method", method.as_bytes(), false);
        self.encode_header(buf, b":scheme", scheme.as_bytes(), false);
        self.encode_header(buf, b":authority", authority.as_bytes(), false);
        self.encode_header(buf, b":path", path.as_bytes(), false);
    }

    pub fn encode_response_status(&mut self, buf: &mut Vec<u8>, status: u16) {
        self.encode_header(buf, b":status", status.to_string().as_bytes(), false);
    }

    /// Encode a list of headers, marking well-known credentials never-indexed.
    pub fn encode_headers(&mut self, buf: &mut Vec<u8>, headers: &[H2Header]) {
        for h in headers {
            self.encode_header(buf, &h.name, &h.value, Self::is_sensitive(&h.name));
        }
    }
}
