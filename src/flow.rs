//! Outbound flow control (RFC 7540 Section 5.2 and 6.9).
//!
//! The controller decides how many bytes of which stream go out on each
//! flush and delegates the actual frame encoding to a [`StreamWriter`]. Every
//! frame of a flush is sized before the first byte is written, so the writer
//! can allocate one buffer per flush.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::frame::{StreamId, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use crate::stream::{HasStream, StreamController};

/// Frame encoding seam between the flow controller and the output side.
///
/// `C` is whatever per-connection context the writer needs, `S` the stream type.
pub trait StreamWriter<C, S> {
    /// Upper bound of the size of the stream's HEADERS frame.
    fn estimate_initial_headers_frame_size(&mut self, ctx: &mut C, stream: &S) -> usize;

    /// Upper bound of the size of a DATA frame carrying `payload_size` bytes.
    fn estimate_data_frame_size(&mut self, ctx: &mut C, stream: &S, payload_size: usize) -> usize;

    /// Start a flush. `size_hint` is the sum of all estimates.
    fn write_start(&mut self, ctx: &mut C, size_hint: usize) -> Vec<u8>;

    /// Write the stream's HEADERS frame. An error that is not
    /// [connection fatal](Error::is_connection_fatal) fails only this stream:
    /// nothing may have been appended to `buf`, and the controller follows up
    /// with [`stream_failed`](Self::stream_failed).
    fn write_initial_headers_frame(
        &mut self,
        ctx: &mut C,
        buf: &mut Vec<u8>,
        stream: &mut S,
        end_of_stream: bool,
    ) -> Result<()>;

    /// Write a DATA frame with the next `payload_size` bytes of
    /// [`Stream::remaining_data`](crate::stream::Stream::remaining_data).
    fn write_data_frame(
        &mut self,
        ctx: &mut C,
        buf: &mut Vec<u8>,
        stream: &mut S,
        payload_size: usize,
        end_of_stream: bool,
    ) -> Result<()>;

    fn write_end(&mut self, ctx: &mut C, buf: Vec<u8>);

    /// The stream has written END_STREAM. The controller has dropped it from
    /// its queue; removing it from the [`StreamController`] is up to the writer.
    fn stream_end(&mut self, ctx: &mut C, stream: &mut S);

    /// The stream's HEADERS could not be written and nothing of it went out.
    /// The controller has dropped it from its queue; as with
    /// [`stream_end`](Self::stream_end), the stream map is the writer's.
    fn stream_failed(&mut self, ctx: &mut C, stream: &mut S, error: Error);
}

/// What one stream gets to write in a flush.
struct Grant {
    id: StreamId,
    headers: bool,
    bytes: usize,
}

#[derive(Debug)]
pub struct FlowController {
    remote_connection_window: i32,
    remote_initial_stream_window: i32,
    remote_max_frame_size: usize,
    /// Started streams with something left to write, in service order.
    queue: VecDeque<StreamId>,
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowController {
    pub fn new() -> Self {
        Self::with_windows(DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn with_windows(remote_connection_window: i32, remote_initial_stream_window: i32) -> Self {
        Self {
            remote_connection_window,
            remote_initial_stream_window,
            remote_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            queue: VecDeque::new(),
        }
    }

    /// Register a stream for writing and give it the initial stream window.
    pub fn start<S: HasStream>(&mut self, stream: &mut S) {
        let stream = stream.stream_mut();
        stream.remote_window = self.remote_initial_stream_window;
        trace!(stream_id = stream.id, window = stream.remote_window, "stream started");
        self.schedule(&*stream);
    }

    /// Register a stream for writing with the window it already has. Used for
    /// streams the peer opened, whose window counts from the moment they opened.
    pub fn schedule<S: HasStream>(&mut self, stream: &S) {
        let id = stream.stream().id;
        if !self.queue.contains(&id) {
            self.queue.push_back(id);
        }
    }

    /// Stop writing a stream, e.g. after it was reset.
    pub fn remove(&mut self, id: StreamId) {
        self.queue.retain(|&q| q != id);
    }

    pub fn remote_connection_window(&self) -> i32 {
        self.remote_connection_window
    }

    pub fn remote_initial_stream_window(&self) -> i32 {
        self.remote_initial_stream_window
    }

    pub fn remote_max_frame_size(&mut self, size: usize) {
        self.remote_max_frame_size = size;
    }

    pub fn max_frame_size(&self) -> usize {
        self.remote_max_frame_size
    }

    /// Number of started streams that still have something to write.
    pub fn registered(&self) -> usize {
        self.queue.len()
    }

    pub fn is_registered(&self, id: StreamId) -> bool {
        self.queue.contains(&id)
    }

    pub fn remote_connection_window_update(&mut self, delta: i32) -> Result<()> {
        self.remote_connection_window = checked_window_add(self.remote_connection_window, delta, 0)?;
        trace!(delta, window = self.remote_connection_window, "connection window update");
        Ok(())
    }

    pub fn remote_stream_window_update<S: HasStream>(&mut self, stream: &mut S, delta: i32) -> Result<()> {
        let stream = stream.stream_mut();
        stream.remote_window = checked_window_add(stream.remote_window, delta, stream.id)?;
        trace!(stream_id = stream.id, delta, window = stream.remote_window, "stream window update");
        Ok(())
    }

    /// Change the window given to streams started from now on. Streams
    /// already started keep their windows.
    pub fn remote_initial_stream_window_size_update(&mut self, initial: i32) {
        self.remote_initial_stream_window = initial;
    }

    /// Shift every open stream's window by the change in the initial window
    /// (RFC 7540 Section 6.9.2). Windows may go negative.
    pub fn apply_initial_window_delta<S: HasStream>(
        &mut self,
        streams: &mut StreamController<S>,
        delta: i32,
    ) -> Result<()> {
        let mut result = Ok(());
        streams.for_each(|s| {
            let stream = s.stream_mut();
            match checked_window_add(stream.remote_window, delta, stream.id) {
                Ok(window) => stream.remote_window = window,
                Err(e) => {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        });
        result
    }

    /// Write as much as the windows allow, in queue order.
    ///
    /// A stream that wrote data but has more left moves to the back of the
    /// queue; streams that could not write keep their place. Does nothing,
    /// and never calls the writer, when no stream can make progress.
    pub fn flush<C, S, W>(&mut self, ctx: &mut C, streams: &mut StreamController<S>, writer: &mut W) -> Result<()>
    where
        S: HasStream,
        W: StreamWriter<C, S>,
    {
        self.queue.retain(|&id| streams.contains(id));

        let max_frame = self.remote_max_frame_size;
        let mut connection_budget = self.remote_connection_window.max(0) as usize;
        let mut size_hint = 0;
        let mut grants = Vec::new();

        for &id in &self.queue {
            let Some(s) = streams.get(id) else { continue };
            let stream = s.stream();

            let headers = !stream.headers_sent();
            let bytes = stream
                .remaining_data()
                .len()
                .min(stream.remote_window.max(0) as usize)
                .min(connection_budget);

            if headers {
                size_hint += writer.estimate_initial_headers_frame_size(ctx, s);
            }
            if bytes > 0 {
                let full_frames = bytes / max_frame;
                let rest = bytes % max_frame;
                if full_frames > 0 {
                    size_hint += full_frames * writer.estimate_data_frame_size(ctx, s, max_frame);
                }
                if rest > 0 {
                    size_hint += writer.estimate_data_frame_size(ctx, s, rest);
                }
                connection_budget -= bytes;
            }
            if headers || bytes > 0 {
                grants.push(Grant { id, headers, bytes });
            }
        }

        if grants.is_empty() {
            return Ok(());
        }

        let mut buf = writer.write_start(ctx, size_hint);
        let mut written = 0;
        let mut ended = Vec::new();
        let mut requeue = Vec::new();
        let mut failed = Vec::new();

        for grant in &grants {
            let s = streams.existing_stream(grant.id)?;
            let mut end_of_stream = false;

            if grant.headers {
                end_of_stream = s.stream().remaining_data().is_empty();
                match writer.write_initial_headers_frame(ctx, &mut buf, s, end_of_stream) {
                    Ok(()) => s.stream_mut().mark_headers_sent(),
                    Err(e) if !e.is_connection_fatal() => {
                        debug!(stream_id = grant.id, error = %e, "stream failed");
                        writer.stream_failed(ctx, s, e);
                        failed.push(grant.id);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            let mut left = grant.bytes;
            while left > 0 {
                let n = left.min(max_frame);
                left -= n;
                end_of_stream = left == 0 && s.stream().remaining_data().len() == n;
                writer.write_data_frame(ctx, &mut buf, s, n, end_of_stream)?;

                let stream = s.stream_mut();
                stream.consume_data(n);
                stream.remote_window -= n as i32;
                self.remote_connection_window -= n as i32;
                written += n;
            }

            if end_of_stream {
                writer.stream_end(ctx, s);
                ended.push(grant.id);
            } else if grant.bytes > 0 {
                requeue.push(grant.id);
            }
        }

        self.queue
            .retain(|id| !ended.contains(id) && !requeue.contains(id) && !failed.contains(id));
        self.queue.extend(requeue);

        debug!(
            streams = grants.len(),
            ended = ended.len(),
            failed = failed.len(),
            bytes = written,
            size_hint,
            connection_window = self.remote_connection_window,
            "flush"
        );

        writer.write_end(ctx, buf);
        Ok(())
    }
}

fn checked_window_add(window: i32, delta: i32, stream_id: StreamId) -> Result<i32> {
    window.checked_add(delta).ok_or_else(|| {
        Error::FlowControl(format!(
            "window update of {delta} overflows window {window} on stream {stream_id}"
        ))
    })
}
