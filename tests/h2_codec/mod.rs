//! Frame wire format and frame reader tests

use h2_mux::{
    flags, frame_type, ErrorCode, FrameHeader, FrameListener, HpackEncoder, Priority, Result, Settings,
    StreamId,
};

mod reader_processing;

/// One listener callback, as seen by [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Data {
        stream_id: StreamId,
        data: Vec<u8>,
        padding: usize,
        end_stream: bool,
    },
    Headers {
        stream_id: StreamId,
        priority: Option<Priority>,
        fields: Vec<(String, String)>,
        end_stream: bool,
    },
    Priority(StreamId, Priority),
    RstStream(StreamId, ErrorCode),
    Settings(Settings),
    SettingsAck,
    Ping([u8; 8]),
    PingAck([u8; 8]),
    GoAway {
        last_stream_id: StreamId,
        code: ErrorCode,
        debug: Vec<u8>,
    },
    WindowUpdate(StreamId, u32),
    Unknown(u8),
}

#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub(crate) events: Vec<Event>,
    fields: Vec<(String, String)>,
    headers: Option<(StreamId, Option<Priority>)>,
}

impl FrameListener for Recorder {
    fn on_data(&mut self, stream_id: StreamId, data: &[u8], padding: usize, end_of_stream: bool) -> Result<()> {
        self.events.push(Event::Data {
            stream_id,
            data: data.to_vec(),
            padding,
            end_stream: end_of_stream,
        });
        Ok(())
    }

    fn on_headers(
        &mut self,
        stream_id: StreamId,
        priority: Option<Priority>,
        _padding: usize,
        _end_of_stream: bool,
    ) -> Result<()> {
        self.headers = Some((stream_id, priority));
        Ok(())
    }

    fn on_header(&mut self, name: &[u8], value: &[u8]) -> Result<()> {
        self.fields.push((
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
        Ok(())
    }

    fn on_headers_end(&mut self, stream_id: StreamId, end_of_stream: bool) -> Result<()> {
        let (started, priority) = self.headers.take().expect("on_headers before on_headers_end");
        assert_eq!(started, stream_id);
        self.events.push(Event::Headers {
            stream_id,
            priority,
            fields: std::mem::take(&mut self.fields),
            end_stream: end_of_stream,
        });
        Ok(())
    }

    fn on_priority(&mut self, stream_id: StreamId, priority: Priority) -> Result<()> {
        self.events.push(Event::Priority(stream_id, priority));
        Ok(())
    }

    fn on_rst_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        self.events.push(Event::RstStream(stream_id, code));
        Ok(())
    }

    fn on_settings(&mut self, settings: Settings) -> Result<()> {
        self.events.push(Event::Settings(settings));
        Ok(())
    }

    fn on_settings_ack(&mut self) -> Result<()> {
        self.events.push(Event::SettingsAck);
        Ok(())
    }

    fn on_ping(&mut self, payload: [u8; 8]) -> Result<()> {
        self.events.push(Event::Ping(payload));
        Ok(())
    }

    fn on_ping_ack(&mut self, payload: [u8; 8]) -> Result<()> {
        self.events.push(Event::PingAck(payload));
        Ok(())
    }

    fn on_goaway(&mut self, last_stream_id: StreamId, code: ErrorCode, debug: &[u8]) -> Result<()> {
        self.events.push(Event::GoAway {
            last_stream_id,
            code,
            debug: debug.to_vec(),
        });
        Ok(())
    }

    fn on_window_update(&mut self, stream_id: StreamId, increment: u32) -> Result<()> {
        self.events.push(Event::WindowUpdate(stream_id, increment));
        Ok(())
    }

    fn on_unknown_frame(&mut self, header: &FrameHeader, _payload: &[u8]) -> Result<()> {
        self.events.push(Event::Unknown(header.frame_type));
        Ok(())
    }
}

/// A raw frame: 9-byte header followed by `payload`.
pub(crate) fn frame(frame_type: u8, flags: u8, stream_id: StreamId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    FrameHeader::new(payload.len(), frame_type, flags, stream_id).write(&mut buf);
    buf.extend_from_slice(payload);
    buf
}

/// An HPACK block for `GET https://example.com/`, encoded with a fresh table.
pub(crate) fn request_block() -> Vec<u8> {
    let mut block = Vec::new();
    HpackEncoder::default().encode_request(&mut block, "GET", "https", "example.com", "/");
    block
}

pub(crate) fn request_fields() -> Vec<(String, String)> {
    [
        (":method", "GET"),
        (":scheme", "https"),
        (":authority", "example.com"),
        (":path", "/"),
    ]
    .iter()
    .map(|(n, v)| (n.to_string(), v.to_string()))
    .collect()
}

pub(crate) fn headers_frame(stream_id: StreamId, flags: u8, block: &[u8]) -> Vec<u8> {
    frame(frame_type::HEADERS, flags, stream_id, block)
}

pub(crate) const END_HEADERS: u8 = flags::END_HEADERS;
