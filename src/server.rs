//! Sans-I/O HTTP/2 server connection.
//!
//! The peer's streams are read into [`Request`]s; each one is handed out by
//! [`take_requests`](ServerConnection::take_requests) once its END_STREAM
//! arrives and answered with [`respond`](ServerConnection::respond). Responses
//! go out under the client's flow-control windows on the next
//! [`flush`](ServerConnection::flush).

use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Endpoint, Outbound, Request, Response};
use crate::error::{Error, ErrorCode, HpackEncodingError, Result, StreamError};
use crate::flow::StreamWriter;
use crate::frame::{self, Priority, Settings, StreamId, PING_PAYLOAD_LENGTH};
use crate::hpack::H2Header;
use crate::reader::{FrameListener, FrameReader};
use crate::stream::{HasStream, Stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The request is still arriving.
    Receiving,
    /// The request ended and waits for [`ServerConnection::respond`].
    AwaitingResponse,
    Responding,
}

struct ServerStream {
    stream: Stream,
    phase: Phase,
    request: Request,
    /// Status and headers of the response; the body lives in `stream`.
    response: Response,
    /// Why the request is malformed, reported once its header block ends.
    malformed: Option<String>,
}

impl HasStream for ServerStream {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }
}

/// Encodes response HEADERS and DATA frames for the flow controller.
struct ResponseWriter;

impl StreamWriter<Outbound, ServerStream> for ResponseWriter {
    fn estimate_initial_headers_frame_size(&mut self, ctx: &mut Outbound, stream: &ServerStream) -> usize {
        let status = stream.response.status.to_string();
        let fields = std::iter::once((b":status".as_slice(), status.as_bytes())).chain(
            stream
                .response
                .headers
                .iter()
                .map(|h| (h.name.as_slice(), h.value.as_slice())),
        );
        ctx.estimate_headers_frame_size(fields)
    }

    fn estimate_data_frame_size(&mut self, _ctx: &mut Outbound, _stream: &ServerStream, payload_size: usize) -> usize {
        frame::data_frame_size(payload_size)
    }

    fn write_start(&mut self, _ctx: &mut Outbound, size_hint: usize) -> Vec<u8> {
        Vec::with_capacity(size_hint)
    }

    fn write_initial_headers_frame(
        &mut self,
        ctx: &mut Outbound,
        buf: &mut Vec<u8>,
        stream: &mut ServerStream,
        end_of_stream: bool,
    ) -> Result<()> {
        let response = &stream.response;
        ctx.write_headers_frame(buf, stream.stream.id, end_of_stream, |encoder, block| {
            response.encode_headers(encoder, block)
        })
    }

    fn write_data_frame(
        &mut self,
        ctx: &mut Outbound,
        buf: &mut Vec<u8>,
        stream: &mut ServerStream,
        payload_size: usize,
        end_of_stream: bool,
    ) -> Result<()> {
        ctx.write_data_frame(buf, &stream.stream, payload_size, end_of_stream)
    }

    fn write_end(&mut self, ctx: &mut Outbound, mut buf: Vec<u8>) {
        ctx.bytes.append(&mut buf);
    }

    fn stream_end(&mut self, ctx: &mut Outbound, stream: &mut ServerStream) {
        debug!(stream_id = stream.stream.id, status = stream.response.status, "response sent");
        ctx.done.push(stream.stream.id);
    }

    fn stream_failed(&mut self, ctx: &mut Outbound, stream: &mut ServerStream, error: Error) {
        warn!(stream_id = stream.stream.id, %error, "response failed, resetting stream");
        frame::write_rst_stream(&mut ctx.bytes, stream.stream.id, ErrorCode::InternalError);
        ctx.done.push(stream.stream.id);
    }
}

struct ServerState {
    endpoint: Endpoint<ServerStream>,
    /// Highest stream id the peer has opened.
    last_stream_id: StreamId,
    /// Streams whose request ended, in arrival order.
    ready: Vec<StreamId>,
    /// The current header block belongs to a refused stream.
    discard_headers: bool,
    /// The current header block is a trailer section.
    trailers: bool,
    /// A regular field was seen in the current header block.
    regular_seen: bool,
}

impl ServerState {
    /// Whether `id` names a stream the peer opened and that is gone now.
    fn was_opened(&self, id: StreamId) -> bool {
        id % 2 == 1 && id <= self.last_stream_id
    }

    fn request_received(&mut self, id: StreamId) -> Result<()> {
        let stream = self.endpoint.streams.existing_stream(id)?;
        stream.phase = Phase::AwaitingResponse;
        debug!(
            stream_id = id,
            method = %stream.request.method,
            path = %stream.request.path,
            body = stream.request.body.len(),
            "request received"
        );
        self.ready.push(id);
        Ok(())
    }

    /// Forget every stream and stop accepting work.
    fn drop_all(&mut self) {
        self.endpoint.closed = true;
        self.ready.clear();
        for stream in self.endpoint.streams.drain() {
            self.endpoint.flow.remove(stream.stream.id);
        }
    }

    fn fail_connection(&mut self, error: &Error) {
        if self.endpoint.closed {
            return;
        }
        warn!(%error, "connection error, sending GOAWAY");
        frame::write_goaway(
            &mut self.endpoint.outbound.bytes,
            self.last_stream_id,
            error.code(),
            error.to_string().as_bytes(),
        );
        self.drop_all();
    }

    fn open_stream(&mut self, id: StreamId) -> Result<()> {
        if id % 2 == 0 {
            return Err(Error::protocol(format!("client opened even stream {id}")));
        }
        if id <= self.last_stream_id {
            return Err(Error::Protocol {
                code: ErrorCode::StreamClosed,
                reason: format!("HEADERS on closed stream {id}"),
            });
        }
        self.last_stream_id = id;

        let endpoint = &mut self.endpoint;
        if endpoint.streams.streams() >= endpoint.config.max_concurrent_streams {
            debug!(stream_id = id, "max concurrent streams reached, refusing stream");
            frame::write_rst_stream(&mut endpoint.outbound.bytes, id, ErrorCode::RefusedStream);
            self.discard_headers = true;
            return Ok(());
        }

        let mut stream = Stream::new(id, Vec::new()).with_local_window(endpoint.config.initial_local_window);
        stream.remote_window = endpoint.flow.remote_initial_stream_window();
        endpoint.streams.add_stream(ServerStream {
            stream,
            phase: Phase::Receiving,
            request: Request::default(),
            response: Response::default(),
            malformed: None,
        })?;
        endpoint.current_headers = Some(id);
        debug!(stream_id = id, "stream opened");
        Ok(())
    }
}

fn text(value: &[u8]) -> Option<String> {
    std::str::from_utf8(value).ok().map(str::to_owned)
}

impl FrameListener for ServerState {
    fn on_data(&mut self, stream_id: StreamId, data: &[u8], padding: usize, end_of_stream: bool) -> Result<()> {
        trace!(stream_id, len = data.len(), padding, end_of_stream, "DATA");
        let length = data.len() + padding;
        self.endpoint.consume_connection_window(length)?;

        match self.endpoint.streams.get(stream_id).map(|s| s.phase) {
            Some(Phase::Receiving) => {}
            Some(_) => {
                return Err(Error::Protocol {
                    code: ErrorCode::StreamClosed,
                    reason: format!("DATA on stream {stream_id} after its request ended"),
                })
            }
            None if self.was_opened(stream_id) => {
                trace!(stream_id, "DATA for closed stream dropped");
                return Ok(());
            }
            None => return Err(Error::protocol(format!("DATA for idle stream {stream_id}"))),
        }

        self.endpoint
            .consume_stream_window(stream_id, length, end_of_stream)?;
        self.endpoint
            .streams
            .existing_stream(stream_id)?
            .request
            .body
            .extend_from_slice(data);
        if end_of_stream {
            self.request_received(stream_id)?;
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
        self.regular_seen = false;
        match self.endpoint.streams.get(stream_id).map(|s| s.phase) {
            None => self.open_stream(stream_id),
            Some(Phase::Receiving) if end_of_stream => {
                self.trailers = true;
                self.endpoint.current_headers = Some(stream_id);
                Ok(())
            }
            Some(Phase::Receiving) => Err(Error::protocol(format!(
                "trailers on stream {stream_id} without END_STREAM"
            ))),
            Some(_) => Err(Error::Protocol {
                code: ErrorCode::StreamClosed,
                reason: format!("HEADERS on stream {stream_id} after its request ended"),
            }),
        }
    }

    fn on_header(&mut self, name: &[u8], value: &[u8]) -> Result<()> {
        if self.discard_headers {
            return Ok(());
        }
        let id = self
            .endpoint
            .current_headers
            .ok_or_else(|| Error::protocol("header field outside a header block"))?;
        let pseudo_allowed = !self.trailers && !self.regular_seen;
        let stream = self.endpoint.streams.existing_stream(id)?;
        if stream.malformed.is_some() {
            return Ok(());
        }

        if name.first() != Some(&b':') {
            self.regular_seen = true;
            stream.request.headers.push(H2Header::new(name, value));
            return Ok(());
        }

        let request = &mut stream.request;
        let slot = match name {
            _ if !pseudo_allowed => None,
            b":method" => Some(&mut request.method),
            b":scheme" => Some(&mut request.scheme),
            b":authority" => Some(&mut request.authority),
            b":path" => Some(&mut request.path),
            _ => None,
        };
        match (slot, text(value)) {
            (Some(slot), Some(value)) if slot.is_empty() => *slot = value,
            _ => {
                stream.malformed = Some(format!(
                    "unexpected pseudo-header {}",
                    String::from_utf8_lossy(name)
                ))
            }
        }
        Ok(())
    }

    fn on_headers_end(&mut self, stream_id: StreamId, end_of_stream: bool) -> Result<()> {
        self.endpoint.current_headers = None;
        self.regular_seen = false;
        let trailers = std::mem::take(&mut self.trailers);
        if std::mem::take(&mut self.discard_headers) {
            return Ok(());
        }

        let stream = self.endpoint.streams.existing_stream(stream_id)?;
        let request = &stream.request;
        let incomplete =
            !trailers && (request.method.is_empty() || request.scheme.is_empty() || request.path.is_empty());
        let malformed = stream
            .malformed
            .take()
            .or_else(|| incomplete.then(|| "missing request pseudo-header".to_owned()));
        if let Some(reason) = malformed {
            debug!(stream_id, %reason, "malformed request, resetting stream");
            self.endpoint.reset_stream(stream_id, ErrorCode::ProtocolError);
            return Ok(());
        }

        if end_of_stream {
            self.request_received(stream_id)?;
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        debug!(stream_id, %code, "RST_STREAM");
        if self.endpoint.streams.remove_stream(stream_id).is_some() {
            self.endpoint.flow.remove(stream_id);
            self.ready.retain(|&id| id != stream_id);
            Ok(())
        } else if self.was_opened(stream_id) {
            Ok(())
        } else {
            Err(Error::protocol(format!("RST_STREAM for idle stream {stream_id}")))
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
        self.drop_all();
        Ok(())
    }

    fn on_window_update(&mut self, stream_id: StreamId, increment: u32) -> Result<()> {
        let known = self.was_opened(stream_id);
        self.endpoint.window_update_received(stream_id, increment, known)
    }
}

/// Server side of one HTTP/2 connection.
pub struct ServerConnection {
    reader: FrameReader,
    state: ServerState,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("active_streams", &self.state.endpoint.streams.streams())
            .field("last_stream_id", &self.state.last_stream_id)
            .field("closed", &self.state.endpoint.closed)
            .finish()
    }
}

impl ServerConnection {
    /// A new connection expecting the client preface, with our SETTINGS and
    /// a connection WINDOW_UPDATE queued for output.
    pub fn new(config: ConnectionConfig) -> Self {
        let (reader, endpoint) = Endpoint::start(config, false);
        Self {
            reader,
            state: ServerState {
                endpoint,
                last_stream_id: 0,
                ready: Vec::new(),
                discard_headers: false,
                trailers: false,
                regular_seen: false,
            },
        }
    }

    /// Feed bytes read from the transport.
    ///
    /// A returned error is fatal: a GOAWAY is queued, every stream is dropped
    /// and the connection is closed.
    pub fn receive(&mut self, data: &[u8]) -> Result<()> {
        if self.state.endpoint.closed {
            return Err(Error::ConnectionClosed);
        }
        self.reader.read_frames(data, &mut self.state).map_err(|e| {
            self.state.fail_connection(&e);
            e
        })
    }

    /// Requests that have fully arrived since the last call, in arrival order.
    pub fn take_requests(&mut self) -> Vec<(StreamId, Request)> {
        let state = &mut self.state;
        std::mem::take(&mut state.ready)
            .into_iter()
            .filter_map(|id| {
                let stream = state.endpoint.streams.get_mut(id)?;
                Some((id, std::mem::take(&mut stream.request)))
            })
            .collect()
    }

    /// Answer the request on `stream_id`. The response is written on the
    /// next [`flush`](Self::flush).
    ///
    /// Errors only concern this response; the connection carries on.
    pub fn respond(&mut self, stream_id: StreamId, mut response: Response) -> Result<()> {
        let endpoint = &mut self.state.endpoint;
        if endpoint.closed {
            return Err(Error::ConnectionClosed);
        }

        let list_size = response.header_list_size();
        if list_size > endpoint.peer_max_header_list_size {
            return Err(HpackEncodingError::HeaderListTooLarge {
                size: list_size,
                max: endpoint.peer_max_header_list_size,
            }
            .into());
        }

        let stream = endpoint
            .streams
            .get_mut(stream_id)
            .ok_or(StreamError::UnknownStream(stream_id))?;
        if stream.phase != Phase::AwaitingResponse {
            return Err(StreamError::ResponseNotExpected(stream_id).into());
        }

        stream.phase = Phase::Responding;
        stream.stream.set_data(std::mem::take(&mut response.body));
        stream.response = response;
        endpoint.flow.schedule(&*stream);
        debug!(stream_id, status = stream.response.status, "response queued");
        Ok(())
    }

    /// Write whatever the flow-control windows allow into the output buffer.
    ///
    /// A response whose header block does not fit in a frame resets its
    /// stream; an error returned here is fatal.
    pub fn flush(&mut self) -> Result<()> {
        let state = &mut self.state;
        state.endpoint.flush(&mut ResponseWriter).map_err(|e| {
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

    /// Close locally: drop every stream and queue GOAWAY(NO_ERROR) naming the
    /// last stream the peer opened.
    pub fn close(&mut self) {
        if self.state.endpoint.closed {
            return;
        }
        frame::write_goaway(
            &mut self.state.endpoint.outbound.bytes,
            self.state.last_stream_id,
            ErrorCode::NoError,
            &[],
        );
        self.state.drop_all();
    }

    /// The transport is gone: drop every stream, nothing more to send.
    pub fn transport_closed(&mut self) {
        self.state.endpoint.outbound.bytes.clear();
        self.state.drop_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.endpoint.closed
    }

    pub fn active_streams(&self) -> usize {
        self.state.endpoint.streams.streams()
    }

    /// Highest stream id the peer has opened.
    pub fn last_stream_id(&self) -> StreamId {
        self.state.last_stream_id
    }

    pub fn peer_settings(&self) -> &Settings {
        &self.state.endpoint.peer_settings
    }
}
