//! Static and dynamic header tables (RFC 7541 Section 2.3).

use std::collections::VecDeque;

use tracing::trace;

use super::H2Header;

/// RFC 7541 Appendix A. Index 1 is the first entry.
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Result of searching the combined index space for a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Match {
    /// Name and value both match.
    Full(usize),
    /// Only the name matches.
    Name(usize),
    None,
}

/// FIFO of header fields bounded by the sum of their entry sizes.
/// Index 0 is the most recently inserted entry.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<H2Header>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Insert at the front, evicting the oldest entries until it fits.
    /// An entry larger than the whole table empties it and is not stored.
    pub fn insert(&mut self, header: H2Header) {
        let cost = header.size();
        if cost > self.max_size {
            trace!(cost, max_size = self.max_size, "entry larger than dynamic table, clearing");
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict_to(self.max_size - cost);
        self.size += cost;
        self.entries.push_front(header);
    }

    pub fn get(&self, index: usize) -> Option<&H2Header> {
        self.entries.get(index)
    }

    /// Change the size budget, evicting as needed.
    pub fn resize(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    fn evict_to(&mut self, budget: usize) {
        while self.size > budget {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry sizes currently held.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Look up an entry in the combined index space: 1..=61 is the static
    /// table, 62 onwards the dynamic table.
    pub(crate) fn lookup(&self, index: usize) -> Option<(&[u8], &[u8])> {
        match index {
            0 => None,
            1..=61 => {
                let (name, value) = STATIC_TABLE[index - 1];
                Some((name.as_bytes(), value.as_bytes()))
            }
            _ => self
                .get(index - STATIC_TABLE.len() - 1)
                .map(|h| (h.name.as_slice(), h.value.as_slice())),
        }
    }

    /// Find the best reference to `name: value` in the combined index space.
    pub(crate) fn find(&self, name: &[u8], value: &[u8]) -> Match {
        let mut name_match = None;

        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if n.as_bytes() == name {
                if v.as_bytes() == value {
                    return Match::Full(i + 1);
                }
                name_match.get_or_insert(i + 1);
            }
        }

        for (i, h) in self.entries.iter().enumerate() {
            if h.name == name {
                let index = STATIC_TABLE.len() + 1 + i;
                if h.value == value {
                    return Match::Full(index);
                }
                name_match.get_or_insert(index);
            }
        }

        name_match.map_or(Match::None, Match::Name)
    }
}
