//! Streams and the per-connection stream map.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{Result, StreamError};
use crate::frame::StreamId;

/// Flow-control and outbound state of a single HTTP/2 stream.
#[derive(Debug, Clone)]
pub struct Stream {
    pub id: StreamId,
    /// Bytes the peer lets us send on this stream. Negative after a SETTINGS
    /// shrink until WINDOW_UPDATEs catch up.
    pub remote_window: i32,
    /// Bytes we let the peer send on this stream before we top it up.
    pub local_window: i32,
    data: Vec<u8>,
    data_offset: usize,
    headers_sent: bool,
}

impl Stream {
    /// A stream with an outbound body. Windows start at zero until the stream
    /// is started on a flow controller.
    pub fn new(id: StreamId, data: Vec<u8>) -> Self {
        Self {
            id,
            remote_window: 0,
            local_window: 0,
            data,
            data_offset: 0,
            headers_sent: false,
        }
    }

    /// Replace the outbound body. Only meaningful before any of it is written.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
        self.data_offset = 0;
    }

    pub fn with_local_window(mut self, local_window: i32) -> Self {
        self.local_window = local_window;
        self
    }

    /// Body bytes not yet handed to the writer.
    pub fn remaining_data(&self) -> &[u8] {
        &self.data[self.data_offset..]
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub(crate) fn mark_headers_sent(&mut self) {
        self.headers_sent = true;
    }

    pub(crate) fn consume_data(&mut self, n: usize) {
        self.data_offset = (self.data_offset + n).min(self.data.len());
    }
}

/// Access to the [`Stream`] embedded in a caller's stream type.
pub trait HasStream {
    fn stream(&self) -> &Stream;
    fn stream_mut(&mut self) -> &mut Stream;
}

impl HasStream for Stream {
    fn stream(&self) -> &Stream {
        self
    }

    fn stream_mut(&mut self) -> &mut Stream {
        self
    }
}

/// Stream id to stream map for one connection.
#[derive(Debug)]
pub struct StreamController<S> {
    streams: HashMap<StreamId, S>,
}

impl<S> Default for StreamController<S> {
    fn default() -> Self {
        Self {
            streams: HashMap::new(),
        }
    }
}

impl<S: HasStream> StreamController<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(&mut self, stream: S) -> Result<()> {
        let id = stream.stream().id;
        if self.streams.contains_key(&id) {
            return Err(StreamError::DuplicateStream(id).into());
        }
        trace!(stream_id = id, "stream added");
        self.streams.insert(id, stream);
        Ok(())
    }

    /// The stream for a frame the peer sent. An unknown id is a connection error.
    pub fn existing_stream(&mut self, id: StreamId) -> Result<&mut S> {
        self.streams
            .get_mut(&id)
            .ok_or_else(|| StreamError::UnknownStream(id).into())
    }

    pub fn get(&self, id: StreamId) -> Option<&S> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut S> {
        self.streams.get_mut(&id)
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    /// Remove a stream. Removing an absent id is a no-op.
    pub fn remove_stream(&mut self, id: StreamId) -> Option<S> {
        let removed = self.streams.remove(&id);
        if removed.is_some() {
            trace!(stream_id = id, "stream removed");
        }
        removed
    }

    /// Number of live streams.
    pub fn streams(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn for_each<F: FnMut(&mut S)>(&mut self, mut visitor: F) {
        for stream in self.streams.values_mut() {
            visitor(stream);
        }
    }

    /// Remove every stream, in ascending id order, for connection teardown.
    pub fn drain(&mut self) -> Vec<S> {
        let mut streams: Vec<(StreamId, S)> = self.streams.drain().collect();
        streams.sort_by_key(|(id, _)| *id);
        streams.into_iter().map(|(_, s)| s).collect()
    }
}
