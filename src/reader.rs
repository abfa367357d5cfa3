//! Resumable HTTP/2 frame reader.
//!
//! Feed raw bytes in whatever chunks the transport delivers; every complete
//! frame is validated and reported through a [`FrameListener`]. Header blocks
//! are reassembled across CONTINUATION frames and HPACK-decoded here, so
//! listeners see individual header fields.

use tracing::trace;

use crate::error::{Error, ErrorCode, Result};
use crate::frame::{
    frame_type, FrameHeader, Priority, Settings, StreamId, CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE,
    FRAME_HEADER_SIZE, INT_FIELD_LENGTH, PING_PAYLOAD_LENGTH, PRIORITY_FIELDS_LENGTH,
};
use crate::hpack::HpackDecoder;

/// Maximum accumulated header block size (256 KB).
/// Bounds memory used by a HEADERS frame followed by endless CONTINUATIONs.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Receives decoded frames.
///
/// Returning an error stops reading; the error is returned from
/// [`FrameReader::read_frames`].
pub trait FrameListener {
    /// `padding` counts every payload byte that is not data, including the
    /// pad length field, so that `data.len() + padding` is the flow-controlled size.
    fn on_data(&mut self, stream_id: StreamId, data: &[u8], padding: usize, end_of_stream: bool) -> Result<()>;

    /// A complete header block arrived; its fields follow through
    /// [`on_header`](Self::on_header), then [`on_headers_end`](Self::on_headers_end).
    fn on_headers(
        &mut self,
        stream_id: StreamId,
        priority: Option<Priority>,
        padding: usize,
        end_of_stream: bool,
    ) -> Result<()>;

    fn on_header(&mut self, name: &[u8], value: &[u8]) -> Result<()>;

    fn on_headers_end(&mut self, stream_id: StreamId, end_of_stream: bool) -> Result<()>;

    fn on_priority(&mut self, _stream_id: StreamId, _priority: Priority) -> Result<()> {
        Ok(())
    }

    fn on_rst_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<()>;

    fn on_settings(&mut self, settings: Settings) -> Result<()>;

    fn on_settings_ack(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_ping(&mut self, payload: [u8; PING_PAYLOAD_LENGTH]) -> Result<()>;

    fn on_ping_ack(&mut self, _payload: [u8; PING_PAYLOAD_LENGTH]) -> Result<()> {
        Ok(())
    }

    fn on_goaway(&mut self, last_stream_id: StreamId, code: ErrorCode, debug: &[u8]) -> Result<()>;

    fn on_window_update(&mut self, stream_id: StreamId, increment: u32) -> Result<()>;

    fn on_push_promise(&mut self, _stream_id: StreamId, _promised_stream_id: StreamId) -> Result<()> {
        Err(Error::NotSupported("server push"))
    }

    /// Unknown frame types must be ignored (RFC 7540 Section 4.1).
    fn on_unknown_frame(&mut self, _header: &FrameHeader, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// A header block waiting for CONTINUATION frames.
#[derive(Debug)]
struct PendingHeaders {
    stream_id: StreamId,
    priority: Option<Priority>,
    padding: usize,
    end_of_stream: bool,
    block: Vec<u8>,
}

#[derive(Debug)]
pub struct FrameReader {
    /// Bytes of an incomplete frame carried over between reads.
    buffer: Vec<u8>,
    decoder: HpackDecoder,
    max_frame_size: usize,
    /// Bytes of the client preface still to be checked.
    preface_remaining: usize,
    pending_headers: Option<PendingHeaders>,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(HpackDecoder::default())
    }
}

impl FrameReader {
    pub fn new(decoder: HpackDecoder) -> Self {
        Self {
            buffer: Vec::new(),
            decoder,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            preface_remaining: 0,
            pending_headers: None,
        }
    }

    /// Require the input to start with the client connection preface.
    pub fn expect_preface(mut self, expect: bool) -> Self {
        self.preface_remaining = if expect { CONNECTION_PREFACE.len() } else { 0 };
        self
    }

    /// Largest frame payload accepted, as advertised in our SETTINGS.
    pub fn set_max_frame_size(&mut self, size: usize) {
        self.max_frame_size = size;
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn decoder(&self) -> &HpackDecoder {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut HpackDecoder {
        &mut self.decoder
    }

    /// Bytes buffered waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read every complete frame in the buffered input plus `data`.
    ///
    /// Errors are connection errors: the reader state is unusable afterwards.
    pub fn read_frames<L: FrameListener>(&mut self, data: &[u8], listener: &mut L) -> Result<()> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(data);

        let consumed = self.process(&buffer, listener)?;
        buffer.drain(..consumed);
        self.buffer = buffer;
        Ok(())
    }

    fn process<L: FrameListener>(&mut self, input: &[u8], listener: &mut L) -> Result<usize> {
        let mut pos = 0;

        if self.preface_remaining > 0 {
            let offset = CONNECTION_PREFACE.len() - self.preface_remaining;
            let n = self.preface_remaining.min(input.len());
            if input[..n] != CONNECTION_PREFACE[offset..offset + n] {
                return Err(Error::protocol("invalid connection preface"));
            }
            self.preface_remaining -= n;
            pos = n;
            if self.preface_remaining > 0 {
                return Ok(pos);
            }
        }

        while let Some(header) = FrameHeader::parse(&input[pos..]) {
            let length = header.length as usize;
            if length > self.max_frame_size {
                return Err(Error::frame_size(length, self.max_frame_size));
            }

            let total_size = header.total_size();
            if input.len() - pos < total_size {
                break;
            }

            let payload = &input[pos + FRAME_HEADER_SIZE..pos + total_size];
            trace!(
                frame_type = header.frame_type,
                flags = header.flags,
                stream_id = header.stream_id,
                length,
                "frame"
            );
            self.handle_frame(&header, payload, listener)?;
            pos += total_size;
        }

        Ok(pos)
    }

    fn handle_frame<L: FrameListener>(&mut self, header: &FrameHeader, payload: &[u8], listener: &mut L) -> Result<()> {
        if let Some(pending) = &self.pending_headers {
            if header.frame_type != frame_type::CONTINUATION {
                return Err(Error::protocol(format!(
                    "frame type {} while header block on stream {} is incomplete",
                    header.frame_type, pending.stream_id
                )));
            }
        }

        match header.frame_type {
            frame_type::DATA => {
                require_stream(header, "DATA")?;
                let (data, padding) = strip_padding(header, payload, "DATA")?;
                listener.on_data(header.stream_id, data, padding, header.is_end_stream())
            }
            frame_type::HEADERS => {
                require_stream(header, "HEADERS")?;
                let (mut block, padding) = strip_padding(header, payload, "HEADERS")?;
                let priority = if header.has_priority() {
                    let priority = Priority::parse(block)
                        .ok_or_else(|| Error::protocol("HEADERS frame too short for priority fields"))?;
                    block = &block[PRIORITY_FIELDS_LENGTH..];
                    Some(priority)
                } else {
                    None
                };

                let pending = PendingHeaders {
                    stream_id: header.stream_id,
                    priority,
                    padding,
                    end_of_stream: header.is_end_stream(),
                    block: block.to_vec(),
                };
                if header.is_end_headers() {
                    self.dispatch_headers(pending, listener)
                } else {
                    check_header_block_size(pending.block.len())?;
                    self.pending_headers = Some(pending);
                    Ok(())
                }
            }
            frame_type::CONTINUATION => {
                let Some(mut pending) = self.pending_headers.take() else {
                    return Err(Error::protocol(format!(
                        "unexpected CONTINUATION frame for stream {}",
                        header.stream_id
                    )));
                };
                if pending.stream_id != header.stream_id {
                    return Err(Error::protocol(format!(
                        "CONTINUATION for stream {} but pending headers on stream {}",
                        header.stream_id, pending.stream_id
                    )));
                }
                check_header_block_size(pending.block.len() + payload.len())?;
                pending.block.extend_from_slice(payload);
                if header.is_end_headers() {
                    self.dispatch_headers(pending, listener)
                } else {
                    self.pending_headers = Some(pending);
                    Ok(())
                }
            }
            frame_type::PRIORITY => {
                require_stream(header, "PRIORITY")?;
                if payload.len() != PRIORITY_FIELDS_LENGTH {
                    return Err(Error::bad_length("PRIORITY", payload.len()));
                }
                match Priority::parse(payload) {
                    Some(priority) => listener.on_priority(header.stream_id, priority),
                    None => Err(Error::bad_length("PRIORITY", payload.len())),
                }
            }
            frame_type::RST_STREAM => {
                require_stream(header, "RST_STREAM")?;
                let code = read_u32(payload, "RST_STREAM")?;
                listener.on_rst_stream(header.stream_id, ErrorCode::from_u32(code))
            }
            frame_type::SETTINGS => {
                require_connection(header, "SETTINGS")?;
                if header.is_ack() {
                    if !payload.is_empty() {
                        return Err(Error::bad_length("SETTINGS ACK", payload.len()));
                    }
                    listener.on_settings_ack()
                } else {
                    let settings = Settings::decode(payload)?;
                    listener.on_settings(settings)
                }
            }
            frame_type::PUSH_PROMISE => {
                let (rest, _) = strip_padding(header, payload, "PUSH_PROMISE")?;
                let promised = read_u32(rest.get(..INT_FIELD_LENGTH).unwrap_or(rest), "PUSH_PROMISE")?;
                listener.on_push_promise(header.stream_id, promised & 0x7FFF_FFFF)
            }
            frame_type::PING => {
                require_connection(header, "PING")?;
                let payload: [u8; PING_PAYLOAD_LENGTH] = payload
                    .try_into()
                    .map_err(|_| Error::bad_length("PING", payload.len()))?;
                if header.is_ack() {
                    listener.on_ping_ack(payload)
                } else {
                    listener.on_ping(payload)
                }
            }
            frame_type::GOAWAY => {
                require_connection(header, "GOAWAY")?;
                if payload.len() < 2 * INT_FIELD_LENGTH {
                    return Err(Error::bad_length("GOAWAY", payload.len()));
                }
                let last_stream_id = read_u32(&payload[..4], "GOAWAY")? & 0x7FFF_FFFF;
                let code = read_u32(&payload[4..8], "GOAWAY")?;
                listener.on_goaway(last_stream_id, ErrorCode::from_u32(code), &payload[8..])
            }
            frame_type::WINDOW_UPDATE => {
                let increment = read_u32(payload, "WINDOW_UPDATE")? & 0x7FFF_FFFF;
                if increment == 0 {
                    return Err(Error::protocol(format!(
                        "WINDOW_UPDATE with zero increment on stream {}",
                        header.stream_id
                    )));
                }
                listener.on_window_update(header.stream_id, increment)
            }
            _ => listener.on_unknown_frame(header, payload),
        }
    }

    fn dispatch_headers<L: FrameListener>(&mut self, pending: PendingHeaders, listener: &mut L) -> Result<()> {
        listener.on_headers(pending.stream_id, pending.priority, pending.padding, pending.end_of_stream)?;
        let headers = self.decoder.decode_to_vec(&pending.block)?;
        trace!(stream_id = pending.stream_id, fields = headers.len(), "header block decoded");
        for h in &headers {
            listener.on_header(&h.name, &h.value)?;
        }
        listener.on_headers_end(pending.stream_id, pending.end_of_stream)
    }
}

fn require_stream(header: &FrameHeader, frame: &str) -> Result<()> {
    if header.stream_id == 0 {
        return Err(Error::protocol(format!("{frame} frame on stream 0")));
    }
    Ok(())
}

fn require_connection(header: &FrameHeader, frame: &str) -> Result<()> {
    if header.stream_id != 0 {
        return Err(Error::protocol(format!("{frame} frame on stream {}", header.stream_id)));
    }
    Ok(())
}

fn check_header_block_size(size: usize) -> Result<()> {
    if size > MAX_HEADER_BLOCK_SIZE {
        return Err(Error::protocol(format!(
            "header block too large ({size} bytes, max {MAX_HEADER_BLOCK_SIZE})"
        )));
    }
    Ok(())
}

/// Exactly four bytes as a big-endian integer.
fn read_u32(payload: &[u8], frame: &str) -> Result<u32> {
    let bytes: [u8; INT_FIELD_LENGTH] = payload
        .try_into()
        .map_err(|_| Error::bad_length(frame, payload.len()))?;
    Ok(u32::from_be_bytes(bytes))
}

/// Split off the PADDED fields. Returns the content and the number of
/// padding bytes including the pad length field.
fn strip_padding<'a>(header: &FrameHeader, payload: &'a [u8], frame: &str) -> Result<(&'a [u8], usize)> {
    if !header.is_padded() {
        return Ok((payload, 0));
    }
    let Some((&pad_length, rest)) = payload.split_first() else {
        return Err(Error::protocol(format!("PADDED {frame} frame with no payload")));
    };
    let pad_length = pad_length as usize;
    if pad_length > rest.len() {
        return Err(Error::protocol(format!("invalid padding length in {frame} frame")));
    }
    Ok((&rest[..rest.len() - pad_length], pad_length + 1))
}
