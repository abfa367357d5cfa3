//! Sans-I/O HTTP/2 connections.
//!
//! [`ClientConnection`] ties the frame reader, the HPACK codec and the flow
//! and stream controllers together; [`ServerConnection`](crate::server::ServerConnection)
//! runs the same machinery facing the other way. The caller moves bytes:
//! inbound bytes go to [`receive`](ClientConnection::receive), and after
//! [`flush`](ClientConnection::flush) the outbound bytes are drained with
//! [`take_output`](ClientConnection::take_output).

use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, ErrorCode, HpackEncodingError, RequestError, Result};
use crate::flow::{FlowController, StreamWriter};
use crate::frame::{
    self, flags, frame_type, FrameHeader, Priority, Settings, StreamId, CONNECTION_PREFACE,
    DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE,
    PING_PAYLOAD_LENGTH, WINDOW_UPDATE_FRAME_LENGTH,
};
use crate::hpack::{H2Header, HpackDecoder, HpackEncoder, ENTRY_OVERHEAD};
use crate::reader::{FrameListener, FrameReader};
use crate::stream::{HasStream, Stream, StreamController};

/// Largest stream id a client may open.
const MAX_STREAM_ID: StreamId = 0x7FFF_FFFF;

/// A request, as sent by a client or received by a server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub headers: Vec<H2Header>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(
        method: impl Into<String>,
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            scheme: scheme.into(),
            authority: authority.into(),
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(scheme: impl Into<String>, authority: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new("GET", scheme, authority, path)
    }

    pub fn header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(H2Header::new(name, value));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first regular header field called `name`.
    pub fn header_value(&self, name: &str) -> Option<&[u8]> {
        find_header(&self.headers, name)
    }

    fn encode_headers(&self, encoder: &mut HpackEncoder, buf: &mut Vec<u8>) {
        encoder.encode_request(buf, &self.method, &self.scheme, &self.authority, &self.path);
        encoder.encode_headers(buf, &self.headers);
    }

    /// Header list size as defined for SETTINGS_MAX_HEADER_LIST_SIZE.
    fn header_list_size(&self) -> usize {
        let pseudo = [
            (":method", &self.method),
            (":scheme", &self.scheme),
            (":authority", &self.authority),
            (":path", &self.path),
        ];
        pseudo
            .iter()
            .map(|(name, value)| name.len() + value.len() + ENTRY_OVERHEAD)
            .chain(self.headers.iter().map(H2Header::size))
            .sum()
    }
}

/// A response, as received by a client or sent by a server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<H2Header>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(H2Header::new(name, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        find_header(&self.headers, name)
    }

    pub(crate) fn encode_headers(&self, encoder: &mut HpackEncoder, buf: &mut Vec<u8>) {
        encoder.encode_response_status(buf, self.status);
        encoder.encode_headers(buf, &self.headers);
    }

    pub(crate) fn header_list_size(&self) -> usize {
        let status = ":status".len() + self.status.to_string().len() + ENTRY_OVERHEAD;
        status + self.headers.iter().map(H2Header::size).sum::<usize>()
    }
}

fn find_header<'a>(headers: &'a [H2Header], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name == name.as_bytes())
        .map(|h| h.value.as_slice())
}

/// Outbound side shared with the stream writers.
pub(crate) struct Outbound {
    pub(crate) encoder: HpackEncoder,
    pub(crate) bytes: Vec<u8>,
    /// Peer's SETTINGS_MAX_FRAME_SIZE.
    pub(crate) max_frame_size: usize,
    /// Streams a writer is done with during the current flush.
    pub(crate) done: Vec<StreamId>,
}

impl Outbound {
    /// Upper bound of a HEADERS frame carrying `fields`.
    pub(crate) fn estimate_headers_frame_size<'a>(
        &self,
        fields: impl IntoIterator<Item = (&'a [u8], &'a [u8])>,
    ) -> usize {
        let fields: usize = fields
            .into_iter()
            .map(|(name, value)| HpackEncoder::estimate_header_size(name, value))
            .sum();
        FRAME_HEADER_SIZE + self.encoder.pending_size_update_len() + fields
    }

    /// Append a HEADERS frame holding the block `encode` produces.
    ///
    /// The block is encoded on a copy of the encoder, which replaces the
    /// shared one only when the block fits in a single frame; otherwise `buf`
    /// is left as it was.
    pub(crate) fn write_headers_frame<F>(
        &mut self,
        buf: &mut Vec<u8>,
        stream_id: StreamId,
        end_of_stream: bool,
        encode: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut HpackEncoder, &mut Vec<u8>),
    {
        let header_index = buf.len();
        buf.resize(header_index + FRAME_HEADER_SIZE, 0);
        let mut encoder = self.encoder.clone();
        encode(&mut encoder, buf);

        let size = buf.len() - header_index - FRAME_HEADER_SIZE;
        if size > self.max_frame_size {
            buf.truncate(header_index);
            return Err(HpackEncodingError::HeaderBlockTooLarge {
                size,
                max_frame_size: self.max_frame_size,
            }
            .into());
        }
        self.encoder = encoder;

        let flags = flags::END_HEADERS | if end_of_stream { flags::END_STREAM } else { 0 };
        FrameHeader::new(size, frame_type::HEADERS, flags, stream_id).write_at(buf, header_index);
        trace!(stream_id, size, end_of_stream, "HEADERS written");
        Ok(())
    }

    pub(crate) fn write_data_frame(
        &mut self,
        buf: &mut Vec<u8>,
        stream: &Stream,
        payload_size: usize,
        end_of_stream: bool,
    ) -> Result<()> {
        let payload = stream.remaining_data().get(..payload_size).ok_or_else(|| {
            Error::FlowControl(format!("stream {} has less than {payload_size} bytes left", stream.id))
        })?;
        frame::write_data_frame_header(buf, stream.id, payload_size, end_of_stream);
        buf.extend_from_slice(payload);
        Ok(())
    }
}

/// Connection state both roles share: settings, windows, output and the
/// stream map.
pub(crate) struct Endpoint<S> {
    pub(crate) config: ConnectionConfig,
    pub(crate) flow: FlowController,
    pub(crate) streams: StreamController<S>,
    pub(crate) outbound: Outbound,
    pub(crate) peer_settings: Settings,
    pub(crate) peer_max_concurrent_streams: Option<usize>,
    pub(crate) peer_max_header_list_size: usize,
    /// Inbound connection window.
    local_window: i32,
    /// Stream whose header block is being read.
    pub(crate) current_headers: Option<StreamId>,
    pub(crate) closed: bool,
}

impl<S: HasStream> Endpoint<S> {
    /// The frame reader and the endpoint, with our SETTINGS and a connection
    /// WINDOW_UPDATE queued for output. A client leads with the preface; a
    /// server expects it.
    pub(crate) fn start(config: ConnectionConfig, client: bool) -> (FrameReader, Self) {
        let mut decoder = HpackDecoder::new(config.header_table_size);
        decoder.set_max_header_list_size(config.max_header_list_size as usize);
        let mut reader = FrameReader::new(decoder).expect_preface(!client);
        reader.set_max_frame_size(config.max_frame_size);

        let settings = config.settings();
        let mut bytes =
            Vec::with_capacity(CONNECTION_PREFACE.len() + settings.frame_size() + WINDOW_UPDATE_FRAME_LENGTH);
        if client {
            bytes.extend_from_slice(CONNECTION_PREFACE);
        }
        frame::write_settings(&mut bytes, &settings);
        if config.initial_local_window > DEFAULT_INITIAL_WINDOW_SIZE {
            let increment = config.initial_local_window - DEFAULT_INITIAL_WINDOW_SIZE;
            frame::write_window_update(&mut bytes, 0, increment as u32);
        }
        debug!(client, ?settings, "connection started");

        // The peer's decoder starts at the protocol default; shrinking is signalled in-band.
        let mut encoder = HpackEncoder::new(DEFAULT_HEADER_TABLE_SIZE);
        if config.header_table_size < DEFAULT_HEADER_TABLE_SIZE {
            encoder.set_max_table_size(config.header_table_size);
        }

        let local_window = config.initial_local_window.max(DEFAULT_INITIAL_WINDOW_SIZE);
        let endpoint = Self {
            outbound: Outbound {
                encoder,
                bytes,
                max_frame_size: DEFAULT_MAX_FRAME_SIZE,
                done: Vec::new(),
            },
            config,
            flow: FlowController::new(),
            streams: StreamController::new(),
            peer_settings: Settings::default(),
            peer_max_concurrent_streams: None,
            peer_max_header_list_size: usize::MAX,
            local_window,
            current_headers: None,
            closed: false,
        };
        (reader, endpoint)
    }

    fn window_update_threshold(&self) -> i32 {
        self.config.initial_local_window / 2
    }

    /// Charge inbound DATA to the connection window, topping it up once it
    /// drops below half.
    pub(crate) fn consume_connection_window(&mut self, length: usize) -> Result<()> {
        self.local_window -= length as i32;
        if self.local_window < 0 {
            return Err(Error::FlowControl(format!(
                "peer overran the connection window by {} bytes",
                -self.local_window
            )));
        }

        let initial = self.config.initial_local_window;
        if self.local_window < self.window_update_threshold() {
            let increment = initial - self.local_window;
            self.local_window = initial;
            frame::write_window_update(&mut self.outbound.bytes, 0, increment as u32);
            debug!(increment, "connection WINDOW_UPDATE sent");
        }
        Ok(())
    }

    /// Charge inbound DATA to a stream's window. A stream the peer has ended
    /// is not topped up.
    pub(crate) fn consume_stream_window(&mut self, id: StreamId, length: usize, end_of_stream: bool) -> Result<()> {
        let threshold = self.window_update_threshold();
        let initial = self.config.initial_local_window;

        let stream = self.streams.existing_stream(id)?.stream_mut();
        stream.local_window -= length as i32;
        if stream.local_window < 0 {
            return Err(Error::FlowControl(format!("peer overran the window of stream {id}")));
        }
        if !end_of_stream && stream.local_window < threshold {
            let increment = initial - stream.local_window;
            stream.local_window = initial;
            frame::write_window_update(&mut self.outbound.bytes, id, increment as u32);
            debug!(stream_id = id, increment, "stream WINDOW_UPDATE sent");
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        if let Some(size) = settings.max_frame_size {
            self.outbound.max_frame_size = size as usize;
            self.flow.remote_max_frame_size(size as usize);
        }
        if let Some(max) = settings.max_concurrent_streams {
            self.peer_max_concurrent_streams = Some(max as usize);
        }
        if let Some(initial) = settings.initial_window_size {
            let initial = initial as i32;
            let delta = initial - self.flow.remote_initial_stream_window();
            self.flow.remote_initial_stream_window_size_update(initial);
            if self.config.retroactive_initial_window && delta != 0 {
                self.flow.apply_initial_window_delta(&mut self.streams, delta)?;
            }
        }
        if let Some(size) = settings.header_table_size {
            self.outbound
                .encoder
                .set_max_table_size((size as usize).min(self.config.header_table_size));
        }
        if let Some(max) = settings.max_header_list_size {
            self.peer_max_header_list_size = max as usize;
        }

        let merged = &mut self.peer_settings;
        for (value, slot) in [
            (settings.header_table_size, &mut merged.header_table_size),
            (settings.enable_push, &mut merged.enable_push),
            (settings.max_concurrent_streams, &mut merged.max_concurrent_streams),
            (settings.initial_window_size, &mut merged.initial_window_size),
            (settings.max_frame_size, &mut merged.max_frame_size),
            (settings.max_header_list_size, &mut merged.max_header_list_size),
        ] {
            if value.is_some() {
                *slot = value;
            }
        }
        Ok(())
    }

    /// Apply and acknowledge the peer's SETTINGS.
    pub(crate) fn settings_received(&mut self, settings: &Settings) -> Result<()> {
        debug!(?settings, "SETTINGS");
        self.apply_settings(settings)?;
        frame::write_settings_ack(&mut self.outbound.bytes);
        Ok(())
    }

    pub(crate) fn ping_received(&mut self, payload: [u8; PING_PAYLOAD_LENGTH]) {
        trace!("PING");
        frame::write_ping(&mut self.outbound.bytes, payload, true);
    }

    /// Apply a WINDOW_UPDATE. Updates for streams we no longer track are
    /// dropped when the stream existed at some point (`known`).
    pub(crate) fn window_update_received(&mut self, stream_id: StreamId, increment: u32, known: bool) -> Result<()> {
        debug!(stream_id, increment, "WINDOW_UPDATE");
        let increment = increment as i32;
        if stream_id == 0 {
            return self.flow.remote_connection_window_update(increment);
        }
        match self.streams.get_mut(stream_id) {
            Some(stream) => self.flow.remote_stream_window_update(stream, increment),
            None if known => Ok(()),
            None => Err(Error::protocol(format!("WINDOW_UPDATE for idle stream {stream_id}"))),
        }
    }

    /// Stop tracking a stream and tell the peer.
    pub(crate) fn reset_stream(&mut self, id: StreamId, code: ErrorCode) -> Option<S> {
        self.flow.remove(id);
        frame::write_rst_stream(&mut self.outbound.bytes, id, code);
        self.streams.remove_stream(id)
    }

    /// Run one flow-control pass. Streams the writer marked done leave the
    /// stream map afterwards.
    pub(crate) fn flush<W: StreamWriter<Outbound, S>>(&mut self, writer: &mut W) -> Result<()> {
        let result = self.flow.flush(&mut self.outbound, &mut self.streams, writer);
        for id in std::mem::take(&mut self.outbound.done) {
            self.streams.remove_stream(id);
        }
        result
    }
}

struct ClientStream {
    stream: Stream,
    request: Request,
    response: Response,
    on_complete: Option<ResponseCallback>,
}

/// Called once with the outcome of an accepted request.
pub type ResponseCallback = Box<dyn FnOnce(std::result::Result<Response, RequestError>)>;

impl ClientStream {
    fn complete(&mut self, result: std::result::Result<Response, RequestError>) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(result);
        }
    }
}

impl HasStream for ClientStream {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }
}

/// Encodes request HEADERS and DATA frames for the flow controller.
struct RequestWriter;

impl StreamWriter<Outbound, ClientStream> for RequestWriter {
    fn estimate_initial_headers_frame_size(&mut self, ctx: &mut Outbound, stream: &ClientStream) -> usize {
        let request = &stream.request;
        let pseudo: [(&[u8], &[u8]); 4] = [
            (b":method", request.method.as_bytes()),
            (b":scheme", request.scheme.as_bytes()),
            (b":authority", request.authority.as_bytes()),
            (b":path", request.path.as_bytes()),
        ];
        ctx.estimate_headers_frame_size(
            pseudo
                .into_iter()
                .chain(request.headers.iter().map(|h| (h.name.as_slice(), h.value.as_slice()))),
        )
    }

    fn estimate_data_frame_size(&mut self, _ctx: &mut Outbound, _stream: &ClientStream, payload_size: usize) -> usize {
        frame::data_frame_size(payload_size)
    }

    fn write_start(&mut self, _ctx: &mut Outbound, size_hint: usize) -> Vec<u8> {
        Vec::with_capacity(size_hint)
    }

    fn write_initial_headers_frame(
        &mut self,
        ctx: &mut Outbound,
        buf: &mut Vec<u8>,
        stream: &mut ClientStream,
        end_of_stream: bool,
    ) -> Result<()> {
        let request = &stream.request;
        ctx.write_headers_frame(buf, stream.stream.id, end_of_stream, |encoder, block| {
            request.encode_headers(encoder, block)
        })
    }

    fn write_data_frame(
        &mut self,
        ctx: &mut Outbound,
        buf: &mut Vec<u8>,
        stream: &mut ClientStream,
        payload_size: usize,
        end_of_stream: bool,
    ) -> Result<()> {
        ctx.write_data_frame(buf, &stream.stream, payload_size, end_of_stream)
    }

    fn write_end(&mut self, ctx: &mut Outbound, mut buf: Vec<u8>) {
        ctx.bytes.append(&mut buf);
    }

    fn stream_end(&mut self, _ctx: &mut Outbound, stream: &mut ClientStream) {
        // The stream stays open until the response ends.
        debug!(stream_id = stream.stream.id, "request sent");
    }

    fn stream_failed(&mut self, ctx: &mut Outbound, stream: &mut ClientStream, error: Error) {
        warn!(stream_id = stream.stream.id, %error, "request failed before sending");
        stream.complete(Err(error.into()));
        ctx.done.push(stream.stream.id);
    }
}

/// Everything except the reader, so the reader can report into it.
struct ClientState {
    endpoint: Endpoint<ClientStream>,
    next_stream_id: StreamId,
}

impl ClientState {
    /// Whether `id` belongs to a stream we opened at some point.
    fn was_opened(&self, id: StreamId) -> bool {
        id % 2 == 1 && id < self.next_stream_id
    }

    fn complete_stream(&mut self, id: StreamId) {
        if let Some(mut stream) = self.endpoint.streams.remove_stream(id) {
            self.endpoint.flow.remove(id);
            debug!(stream_id = id, status = stream.response.status, "response complete");
            let response = std::mem::take(&mut stream.response);
            stream.complete(Ok(response));
        }
    }

    /// Fail every outstanding stream once and stop accepting work.
    fn fail_all(&mut self, error: RequestError) {
        self.endpoint.closed = true;
        let streams = self.endpoint.streams.drain();
        if !streams.is_empty() {
            warn!(streams = streams.len(), %error, "failing outstanding streams");
        }
        for mut stream in streams {
            self.endpoint.flow.remove(stream.stream.id);
            stream.complete(Err(error.clone()));
        }
    }

    fn fail_connection(&mut self, error: &Error) {
        if self.endpoint.closed {
            return;
        }
        warn!(%error, "connection error, sending GOAWAY");
        frame::write_goaway(
            &mut self.endpoint.outbound.bytes,
            0,
            error.code(),
            error.to_string().as_bytes(),
        );
        self.fail_all(RequestError::Protocol(error.code()));
    }
}

impl FrameListener for ClientState {
    fn on_data(&mut self, stream_id: StreamId, data: &[u8], padding: usize, end_of_stream: bool) -> Result<()> {
        trace!(stream_id, len = data.len(), padding, end_of_stream, "DATA");
        let length = data.len() + padding;
        self.endpoint.consume_connection_window(length)?;
        self.endpoint
            .consume_stream_window(stream_id, length, end_of_stream)?;
        self.endpoint
            .streams
            .existing_stream(stream_id)?
            .response
            .body
            .extend_from_slice(data);
        if end_of_stream {
            self.complete_stream(stream_id);
        }
        Ok(())
    }

    fn on_headers(
        &mut self,
        stream_id: StreamId,
        _priority: Option<Priority>,
        _padding: usize,
        end_of_stream: bool,
    ) -> Result<()> {
        trace!(stream_id, end_of_stream, "HEADERS");
        self.endpoint.streams.existing_stream(stream_id)?;
        self.endpoint.current_headers = Some(stream_id);
        Ok(())
    }

    fn on_header(&mut self, name: &[u8], value: &[u8]) -> Result<()> {
        let id = self
            .endpoint
            .current_headers
            .ok_or_else(|| Error::protocol("header field outside a header block"))?;
        let response = &mut self.endpoint.streams.existing_stream(id)?.response;

        if name.first() == Some(&b':') {
            if name != b":status" {
                return Err(Error::protocol(format!(
                    "invalid response pseudo-header {}",
                    String::from_utf8_lossy(name)
                )));
            }
            response.status = std::str::from_utf8(value)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::protocol(format!("invalid :status {}", String::from_utf8_lossy(value))))?;
        } else {
            response.headers.push(H2Header::new(name, value));
        }
        Ok(())
    }

    fn on_headers_end(&mut self, stream_id: StreamId, end_of_stream: bool) -> Result<()> {
        self.endpoint.current_headers = None;
        if end_of_stream {
            self.complete_stream(stream_id);
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        debug!(stream_id, %code, "RST_STREAM");
        match self.endpoint.streams.remove_stream(stream_id) {
            Some(mut stream) => {
                self.endpoint.flow.remove(stream_id);
                stream.complete(Err(RequestError::Reset(code)));
                Ok(())
            }
            None if self.was_opened(stream_id) => Ok(()),
            None => Err(Error::protocol(format!("RST_STREAM for idle stream {stream_id}"))),
        }
    }

    fn on_settings(&mut self, settings: Settings) -> Result<()> {
        self.endpoint.settings_received(&settings)
    }

    fn on_settings_ack(&mut self) -> Result<()> {
        debug!("SETTINGS ACK");
        Ok(())
    }

    fn on_ping(&mut self, payload: [u8; PING_PAYLOAD_LENGTH]) -> Result<()> {
        self.endpoint.ping_received(payload);
        Ok(())
    }

    fn on_goaway(&mut self, last_stream_id: StreamId, code: ErrorCode, debug_data: &[u8]) -> Result<()> {
        let debug_data = String::from_utf8_lossy(debug_data);
        warn!(last_stream_id, %code, %debug_data, "GOAWAY, closing connection");
        self.fail_all(RequestError::GoAway { last_stream_id, code });
        Ok(())
    }

    fn on_window_update(&mut self, stream_id: StreamId, increment: u32) -> Result<()> {
        let known = self.was_opened(stream_id);
        self.endpoint.window_update_received(stream_id, increment, known)
    }
}

/// Client side of one HTTP/2 connection.
pub struct ClientConnection {
    reader: FrameReader,
    state: ClientState,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("active_streams", &self.state.endpoint.streams.streams())
            .field("next_stream_id", &self.state.next_stream_id)
            .field("closed", &self.state.endpoint.closed)
            .finish()
    }
}

impl ClientConnection {
    /// A new connection with the preface, our SETTINGS and a connection
    /// WINDOW_UPDATE queued for output.
    pub fn new(config: ConnectionConfig) -> Self {
        let (reader, endpoint) = Endpoint::start(config, true);
        Self {
            reader,
            state: ClientState {
                endpoint,
                next_stream_id: 1,
            },
        }
    }

    /// Start a request. The stream is written on the next [`flush`](Self::flush);
    /// `on_complete` later receives the response or the failure.
    ///
    /// Requests that cannot be started are rejected here and `on_complete` is
    /// dropped without being called.
    pub fn send<F>(&mut self, mut request: Request, on_complete: F) -> std::result::Result<StreamId, RequestError>
    where
        F: FnOnce(std::result::Result<Response, RequestError>) + 'static,
    {
        let state = &mut self.state;
        let endpoint = &mut state.endpoint;
        if endpoint.closed || state.next_stream_id > MAX_STREAM_ID {
            return Err(RequestError::ConnectionClosed);
        }

        let limit = endpoint
            .config
            .max_concurrent_streams
            .min(endpoint.peer_max_concurrent_streams.unwrap_or(usize::MAX));
        if endpoint.streams.streams() >= limit {
            debug!(limit, "max concurrent streams reached");
            return Err(RequestError::MaxConcurrentStreams { limit });
        }

        let list_size = request.header_list_size();
        if list_size > endpoint.peer_max_header_list_size {
            return Err(RequestError::Encoding(HpackEncodingError::HeaderListTooLarge {
                size: list_size,
                max: endpoint.peer_max_header_list_size,
            }));
        }

        // Requests queued ahead of this one may still change the table by
        // flush time, which then fails just this stream.
        let mut trial = endpoint.outbound.encoder.clone();
        let mut block = Vec::new();
        request.encode_headers(&mut trial, &mut block);
        if block.len() > endpoint.outbound.max_frame_size {
            return Err(RequestError::Encoding(HpackEncodingError::HeaderBlockTooLarge {
                size: block.len(),
                max_frame_size: endpoint.outbound.max_frame_size,
            }));
        }

        let id = state.next_stream_id;
        state.next_stream_id += 2;

        let body = std::mem::take(&mut request.body);
        let mut stream = ClientStream {
            stream: Stream::new(id, body).with_local_window(endpoint.config.initial_local_window),
            request,
            response: Response::default(),
            on_complete: Some(Box::new(on_complete)),
        };
        endpoint.flow.start(&mut stream);
        endpoint
            .streams
            .add_stream(stream)
            .map_err(|e| RequestError::Protocol(e.code()))?;

        debug!(stream_id = id, "stream started");
        Ok(id)
    }

    /// Feed bytes read from the transport.
    ///
    /// A returned error is fatal: a GOAWAY is queued, every outstanding
    /// stream is failed and the connection is closed.
    pub fn receive(&mut self, data: &[u8]) -> Result<()> {
        if self.state.endpoint.closed {
            return Err(Error::ConnectionClosed);
        }
        self.reader.read_frames(data, &mut self.state).map_err(|e| {
            self.state.fail_connection(&e);
            e
        })
    }

    /// Write whatever the flow-control windows allow into the output buffer.
    ///
    /// A request whose header block no longer fits in a frame fails on its
    /// own; an error returned here is fatal.
    pub fn flush(&mut self) -> Result<()> {
        let state = &mut self.state;
        state.endpoint.flush(&mut RequestWriter).map_err(|e| {
            state.fail_connection(&e);
            e
        })
    }

    /// Drain the bytes to be written to the transport.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.state.endpoint.outbound.bytes)
    }

    pub fn has_output(&self) -> bool {
        !self.state.endpoint.outbound.bytes.is_empty()
    }

    /// Close locally: fail outstanding streams and queue GOAWAY(NO_ERROR).
    pub fn close(&mut self) {
        if self.state.endpoint.closed {
            return;
        }
        frame::write_goaway(&mut self.state.endpoint.outbound.bytes, 0, ErrorCode::NoError, &[]);
        self.state.fail_all(RequestError::ConnectionClosed);
    }

    /// The transport is gone: fail outstanding streams, nothing more to send.
    pub fn transport_closed(&mut self) {
        self.state.endpoint.outbound.bytes.clear();
        self.state.fail_all(RequestError::ConnectionClosed);
    }

    pub fn is_closed(&self) -> bool {
        self.state.endpoint.closed
    }

    pub fn active_streams(&self) -> usize {
        self.state.endpoint.streams.streams()
    }

    pub fn remote_connection_window(&self) -> i32 {
        self.state.endpoint.flow.remote_connection_window()
    }

    /// Every SETTINGS value the peer has sent so far.
    pub fn peer_settings(&self) -> &Settings {
        &self.state.endpoint.peer_settings
    }
}
