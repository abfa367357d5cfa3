//! Flow controller tests driven through a recording writer

use h2_mux::{Error, FlowController, HpackEncodingError, Stream, StreamController, StreamId, StreamWriter};
use pretty_assertions::assert_eq;

#[path = "../helpers/tracing_common.rs"]
mod tracing_common;

mod scenarios;

/// Estimates handed out by [`RecordingWriter`].
const HEADERS_ESTIMATE: usize = 64;

fn data_estimate(payload_size: usize) -> usize {
    9 + payload_size
}

/// Everything the flow controller asked the writer to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    EstimateHeaders(StreamId),
    EstimateData(StreamId, usize),
    WriteStart(usize),
    Headers(StreamId, bool),
    Data(StreamId, usize, bool),
    StreamEnd(StreamId),
    Failed(StreamId),
    WriteEnd(usize),
}

/// Per-connection context; the writer appends every DATA payload here.
#[derive(Debug, Default)]
pub(crate) struct Sink {
    pub(crate) written: Vec<(StreamId, Vec<u8>)>,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingWriter {
    pub(crate) calls: Vec<Call>,
    /// Streams whose HEADERS fail to encode.
    pub(crate) oversized: Vec<StreamId>,
}

impl StreamWriter<Sink, Stream> for RecordingWriter {
    fn estimate_initial_headers_frame_size(&mut self, _ctx: &mut Sink, stream: &Stream) -> usize {
        self.calls.push(Call::EstimateHeaders(stream.id));
        HEADERS_ESTIMATE
    }

    fn estimate_data_frame_size(&mut self, _ctx: &mut Sink, stream: &Stream, payload_size: usize) -> usize {
        self.calls.push(Call::EstimateData(stream.id, payload_size));
        data_estimate(payload_size)
    }

    fn write_start(&mut self, _ctx: &mut Sink, size_hint: usize) -> Vec<u8> {
        self.calls.push(Call::WriteStart(size_hint));
        Vec::with_capacity(size_hint)
    }

    fn write_initial_headers_frame(
        &mut self,
        _ctx: &mut Sink,
        buf: &mut Vec<u8>,
        stream: &mut Stream,
        end_of_stream: bool,
    ) -> h2_mux::Result<()> {
        self.calls.push(Call::Headers(stream.id, end_of_stream));
        if self.oversized.contains(&stream.id) {
            return Err(HpackEncodingError::HeaderBlockTooLarge {
                size: 20_000,
                max_frame_size: 16_384,
            }
            .into());
        }
        buf.extend_from_slice(&[0; HEADERS_ESTIMATE]);
        Ok(())
    }

    fn write_data_frame(
        &mut self,
        ctx: &mut Sink,
        buf: &mut Vec<u8>,
        stream: &mut Stream,
        payload_size: usize,
        end_of_stream: bool,
    ) -> h2_mux::Result<()> {
        self.calls.push(Call::Data(stream.id, payload_size, end_of_stream));
        let payload = &stream.remaining_data()[..payload_size];
        buf.extend_from_slice(&[0; 9]);
        buf.extend_from_slice(payload);
        ctx.written.push((stream.id, payload.to_vec()));
        Ok(())
    }

    fn write_end(&mut self, _ctx: &mut Sink, buf: Vec<u8>) {
        self.calls.push(Call::WriteEnd(buf.len()));
    }

    fn stream_end(&mut self, _ctx: &mut Sink, stream: &mut Stream) {
        self.calls.push(Call::StreamEnd(stream.id));
    }

    fn stream_failed(&mut self, _ctx: &mut Sink, stream: &mut Stream, error: Error) {
        assert!(matches!(error, Error::HpackEncoding(_)));
        self.calls.push(Call::Failed(stream.id));
    }
}

/// What one stream is expected to do in a flush.
#[derive(Debug, Default)]
pub(crate) struct Expect {
    id: StreamId,
    headers: Option<bool>,
    estimates: Vec<usize>,
    writes: Vec<(usize, usize, bool)>,
}

pub(crate) fn stream(id: StreamId) -> Expect {
    Expect {
        id,
        ..Expect::default()
    }
}

impl Expect {
    pub(crate) fn headers(mut self) -> Self {
        self.headers = Some(false);
        self
    }

    pub(crate) fn headers_end(mut self) -> Self {
        self.headers = Some(true);
        self
    }

    pub(crate) fn estimate(mut self, payload_size: usize) -> Self {
        self.estimates.push(payload_size);
        self
    }

    pub(crate) fn write(self, payload_size: usize) -> Self {
        self.write_times(payload_size, 1, false)
    }

    pub(crate) fn write_end(self, payload_size: usize) -> Self {
        self.write_times(payload_size, 1, true)
    }

    /// `times` frames of `payload_size`; only the last may end the stream.
    pub(crate) fn write_times(mut self, payload_size: usize, times: usize, end_of_stream: bool) -> Self {
        self.writes.push((payload_size, times, end_of_stream));
        self
    }

    fn bytes(&self) -> usize {
        self.writes.iter().map(|(size, times, _)| size * times).sum()
    }

    fn ends(&self) -> bool {
        self.headers == Some(true) || self.writes.last().is_some_and(|w| w.2)
    }
}

/// A flow controller with the streams it schedules.
pub(crate) struct Fixture {
    pub(crate) controller: FlowController,
    pub(crate) streams: StreamController<Stream>,
    pub(crate) sink: Sink,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_controller(FlowController::new())
    }

    pub(crate) fn with_controller(controller: FlowController) -> Self {
        tracing_common::setup_tracing();
        Self {
            controller,
            streams: StreamController::new(),
            sink: Sink::default(),
        }
    }

    /// Start a stream with a body of `size` distinct-ish bytes.
    pub(crate) fn start(&mut self, id: StreamId, size: usize) {
        let body = (0..size).map(|i| (i * 31 + id as usize) as u8).collect();
        let mut stream = Stream::new(id, body);
        self.controller.start(&mut stream);
        self.streams.add_stream(stream).unwrap();
    }

    pub(crate) fn remote_window(&self, id: StreamId) -> i32 {
        self.streams.get(id).unwrap().remote_window
    }

    pub(crate) fn stream_window_update(&mut self, id: StreamId, delta: i32) {
        let before = self.remote_window(id);
        let stream = self.streams.get_mut(id).unwrap();
        self.controller.remote_stream_window_update(stream, delta).unwrap();
        assert_eq!(self.remote_window(id), before + delta);
    }

    pub(crate) fn connection_window_update(&mut self, delta: i32) {
        let before = self.controller.remote_connection_window();
        let windows: Vec<(StreamId, i32)> = self.open_ids().into_iter().map(|id| (id, self.remote_window(id))).collect();

        self.controller.remote_connection_window_update(delta).unwrap();

        assert_eq!(self.controller.remote_connection_window(), before + delta);
        for (id, window) in windows {
            assert_eq!(self.remote_window(id), window, "stream {id} window changed");
        }
    }

    fn open_ids(&mut self) -> Vec<StreamId> {
        let mut ids = Vec::new();
        self.streams.for_each(|s| ids.push(s.id));
        ids
    }

    pub(crate) fn flush(&mut self) -> Vec<Call> {
        self.flush_with(RecordingWriter::default())
    }

    pub(crate) fn flush_with(&mut self, mut writer: RecordingWriter) -> Vec<Call> {
        self.controller
            .flush(&mut self.sink, &mut self.streams, &mut writer)
            .unwrap();
        writer.calls
    }

    /// Flush and check the exact writer calls, the window accounting, and
    /// that an immediate second flush does nothing.
    pub(crate) fn verify_flush(&mut self, expected: &[Expect]) {
        let connection_before = self.controller.remote_connection_window();
        let windows_before: Vec<i32> = expected.iter().map(|e| self.remote_window(e.id)).collect();

        let calls = self.flush();
        assert_eq!(calls, expected_calls(expected));

        let total: usize = expected.iter().map(Expect::bytes).sum();
        assert_eq!(
            self.controller.remote_connection_window(),
            connection_before - total as i32
        );
        for (e, before) in expected.iter().zip(windows_before) {
            assert_eq!(self.remote_window(e.id), before - e.bytes() as i32, "stream {}", e.id);
            assert_eq!(self.controller.is_registered(e.id), !e.ends(), "stream {}", e.id);
        }

        assert_eq!(self.flush(), Vec::new(), "second flush must not touch the writer");
    }
}

fn expected_calls(expected: &[Expect]) -> Vec<Call> {
    if expected.is_empty() {
        return Vec::new();
    }

    let mut calls = Vec::new();
    let mut size_hint = 0;
    for e in expected {
        if e.headers.is_some() {
            calls.push(Call::EstimateHeaders(e.id));
            size_hint += HEADERS_ESTIMATE;
        }
        for &payload_size in &e.estimates {
            calls.push(Call::EstimateData(e.id, payload_size));
        }
        size_hint += e
            .writes
            .iter()
            .map(|&(size, times, _)| data_estimate(size) * times)
            .sum::<usize>();
    }
    calls.push(Call::WriteStart(size_hint));

    for e in expected {
        if let Some(end_of_stream) = e.headers {
            calls.push(Call::Headers(e.id, end_of_stream));
        }
        for &(size, times, end_of_stream) in &e.writes {
            for i in 0..times {
                calls.push(Call::Data(e.id, size, end_of_stream && i + 1 == times));
            }
        }
        if e.ends() {
            calls.push(Call::StreamEnd(e.id));
        }
    }
    calls.push(Call::WriteEnd(size_hint));
    calls
}
