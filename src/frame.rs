//! HTTP/2 frame wire format.
//!
//! The 9-byte frame header, the fixed-size payload layouts and the exact byte
//! lengths used to pre-size output buffers before anything is written.
//!
//! Reference: RFC 7540 Section 4 and 6

use tracing::trace;

use crate::error::{Error, ErrorCode, Result};

/// Stream identifier: 31 bits, the high bit is reserved.
pub type StreamId = u32;

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

pub const FRAME_HEADER_SIZE: usize = 9;
pub const INT_FIELD_LENGTH: usize = 4;
pub const SETTING_ENTRY_LENGTH: usize = 6;
pub const PING_PAYLOAD_LENGTH: usize = 8;
/// Stream dependency (4 bytes) + weight (1 byte)
pub const PRIORITY_FIELDS_LENGTH: usize = 5;
pub const WINDOW_UPDATE_FRAME_LENGTH: usize = FRAME_HEADER_SIZE + INT_FIELD_LENGTH;
pub const RST_STREAM_FRAME_LENGTH: usize = FRAME_HEADER_SIZE + INT_FIELD_LENGTH;
pub const PING_FRAME_LENGTH: usize = FRAME_HEADER_SIZE + PING_PAYLOAD_LENGTH;

pub const DEFAULT_INITIAL_WINDOW_SIZE: i32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16_384;
pub const MAX_FRAME_SIZE_UPPER_BOUND: usize = (1 << 24) - 1;
pub const DEFAULT_HEADER_TABLE_SIZE: usize = 4_096;
pub const MAX_WINDOW_SIZE: i32 = i32::MAX;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.len() >= CONNECTION_PREFACE.len() && &data[..CONNECTION_PREFACE.len()] == CONNECTION_PREFACE
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,      // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,   // 31 bits (high bit reserved)
}

impl FrameHeader {
    pub fn new(length: usize, frame_type: u8, flags: u8, stream_id: StreamId) -> Self {
        Self {
            length: length as u32,
            frame_type,
            flags,
            stream_id,
        }
    }

    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let frame_type = data[3];
        let flags = data[4];
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7FFF_FFFF;

        Some(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    /// Append the 9 header bytes to `buf`.
    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        self.encode_into(&mut bytes);
        buf.extend_from_slice(&bytes);
    }

    /// Overwrite 9 bytes of `buf` starting at `offset`.
    ///
    /// Used to back-patch a header whose payload length is only known after
    /// the payload has been encoded. Panics if `buf` is too short, which is a
    /// caller bug: the slot is always reserved first.
    pub fn write_at(&self, buf: &mut [u8], offset: usize) {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        self.encode_into(&mut bytes);
        buf[offset..offset + FRAME_HEADER_SIZE].copy_from_slice(&bytes);
    }

    fn encode_into(&self, out: &mut [u8; FRAME_HEADER_SIZE]) {
        let length = self.length.to_be_bytes();
        out[0..3].copy_from_slice(&length[1..4]);
        out[3] = self.frame_type;
        out[4] = self.flags;
        out[5..9].copy_from_slice(&(self.stream_id & 0x7FFF_FFFF).to_be_bytes());
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.length as usize
    }

    /// Check if END_STREAM flag is set
    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    /// Check if END_HEADERS flag is set
    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_padded(&self) -> bool {
        self.flags & flags::PADDED != 0
    }

    pub fn has_priority(&self) -> bool {
        self.flags & flags::PRIORITY != 0
    }
}

/// Priority fields of a HEADERS or PRIORITY frame. Parsed and reported, never
/// acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub dependency: StreamId,
    pub exclusive: bool,
    pub weight: u8,
}

impl Priority {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < PRIORITY_FIELDS_LENGTH {
            return None;
        }
        let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        Some(Self {
            dependency: raw & 0x7FFF_FFFF,
            exclusive: raw & 0x8000_0000 != 0,
            weight: data[4],
        })
    }
}

/// SETTINGS parameters. `None` means "not present in the frame".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    /// Parse a SETTINGS payload. Unknown identifiers are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() % SETTING_ENTRY_LENGTH != 0 {
            return Err(Error::bad_length("SETTINGS", payload.len()));
        }
        let mut settings = Settings::default();
        for entry in payload.chunks_exact(SETTING_ENTRY_LENGTH) {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
            settings.set(id, value)?;
        }
        Ok(settings)
    }

    fn set(&mut self, id: u16, value: u32) -> Result<()> {
        match id {
            settings_id::HEADER_TABLE_SIZE => self.header_table_size = Some(value),
            settings_id::ENABLE_PUSH => {
                if value > 1 {
                    return Err(Error::protocol(format!("invalid SETTINGS_ENABLE_PUSH value {value}")));
                }
                self.enable_push = Some(value);
            }
            settings_id::MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(value),
            settings_id::INITIAL_WINDOW_SIZE => {
                if value > MAX_WINDOW_SIZE as u32 {
                    return Err(Error::FlowControl(format!(
                        "SETTINGS_INITIAL_WINDOW_SIZE {value} exceeds 2^31-1"
                    )));
                }
                self.initial_window_size = Some(value);
            }
            settings_id::MAX_FRAME_SIZE => {
                let size = value as usize;
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_UPPER_BOUND).contains(&size) {
                    return Err(Error::protocol(format!("invalid SETTINGS_MAX_FRAME_SIZE value {value}")));
                }
                self.max_frame_size = Some(value);
            }
            settings_id::MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(value),
            _ => trace!(id, value, "ignoring unknown setting"),
        }
        Ok(())
    }

    /// The (identifier, value) pairs present, in identifier order.
    pub fn entries(&self) -> Vec<(u16, u32)> {
        [
            (settings_id::HEADER_TABLE_SIZE, self.header_table_size),
            (settings_id::ENABLE_PUSH, self.enable_push),
            (settings_id::MAX_CONCURRENT_STREAMS, self.max_concurrent_streams),
            (settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size),
            (settings_id::MAX_FRAME_SIZE, self.max_frame_size),
            (settings_id::MAX_HEADER_LIST_SIZE, self.max_header_list_size),
        ]
        .into_iter()
        .filter_map(|(id, value)| value.map(|v| (id, v)))
        .collect()
    }

    /// Size of the whole SETTINGS frame, header included.
    pub fn frame_size(&self) -> usize {
        FRAME_HEADER_SIZE + SETTING_ENTRY_LENGTH * self.entries().len()
    }
}

/// Write a SETTINGS frame carrying every present parameter.
pub fn write_settings(buf: &mut Vec<u8>, settings: &Settings) {
    let entries = settings.entries();
    FrameHeader::new(SETTING_ENTRY_LENGTH * entries.len(), frame_type::SETTINGS, 0, 0).write(buf);
    for (id, value) in entries {
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

/// Write a SETTINGS ACK frame
pub fn write_settings_ack(buf: &mut Vec<u8>) {
    FrameHeader::new(0, frame_type::SETTINGS, flags::ACK, 0).write(buf);
}

/// Write a WINDOW_UPDATE frame to replenish flow control window.
/// stream_id=0 updates connection-level window, otherwise stream-level
pub fn write_window_update(buf: &mut Vec<u8>, stream_id: StreamId, increment: u32) {
    FrameHeader::new(INT_FIELD_LENGTH, frame_type::WINDOW_UPDATE, 0, stream_id).write(buf);
    buf.extend_from_slice(&(increment & 0x7FFF_FFFF).to_be_bytes());
}

/// Write a PING frame, or its acknowledgement when `ack` is set.
pub fn write_ping(buf: &mut Vec<u8>, payload: [u8; PING_PAYLOAD_LENGTH], ack: bool) {
    let flags = if ack { flags::ACK } else { 0 };
    FrameHeader::new(PING_PAYLOAD_LENGTH, frame_type::PING, flags, 0).write(buf);
    buf.extend_from_slice(&payload);
}

pub fn write_rst_stream(buf: &mut Vec<u8>, stream_id: StreamId, code: ErrorCode) {
    FrameHeader::new(INT_FIELD_LENGTH, frame_type::RST_STREAM, 0, stream_id).write(buf);
    buf.extend_from_slice(&u32::from(code).to_be_bytes());
}

/// Write a GOAWAY frame with optional opaque debug data.
pub fn write_goaway(buf: &mut Vec<u8>, last_stream_id: StreamId, code: ErrorCode, debug: &[u8]) {
    FrameHeader::new(2 * INT_FIELD_LENGTH + debug.len(), frame_type::GOAWAY, 0, 0).write(buf);
    buf.extend_from_slice(&(last_stream_id & 0x7FFF_FFFF).to_be_bytes());
    buf.extend_from_slice(&u32::from(code).to_be_bytes());
    buf.extend_from_slice(debug);
}

/// Write the header of a DATA frame; the caller appends `payload_size` bytes.
pub fn write_data_frame_header(buf: &mut Vec<u8>, stream_id: StreamId, payload_size: usize, end_stream: bool) {
    let flags = if end_stream { flags::END_STREAM } else { 0 };
    FrameHeader::new(payload_size, frame_type::DATA, flags, stream_id).write(buf);
}

/// Size of a DATA frame without padding.
pub fn data_frame_size(payload_size: usize) -> usize {
    FRAME_HEADER_SIZE + payload_size
}
