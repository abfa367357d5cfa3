//! Connection configuration.

use crate::frame::{Settings, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_MAX_FRAME_SIZE};

/// Local window advertised for the connection and every stream: 128 MiB
/// instead of the 64 KiB protocol default, so bulk responses are not
/// throttled by WINDOW_UPDATE round trips.
pub const DEFAULT_LOCAL_WINDOW_SIZE: i32 = 128 * 1024 * 1024;

pub const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Initial connection and stream window we grant the peer.
    pub initial_local_window: i32,
    /// Cap on concurrently open outbound streams, also advertised to the peer.
    pub max_concurrent_streams: usize,
    /// Largest frame payload we accept.
    pub max_frame_size: usize,
    /// Largest decoded header list we accept.
    pub max_header_list_size: u32,
    /// HPACK dynamic table size for both directions.
    pub header_table_size: usize,
    /// Apply SETTINGS_INITIAL_WINDOW_SIZE changes to already open streams.
    pub retroactive_initial_window: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_local_window: DEFAULT_LOCAL_WINDOW_SIZE,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: u32::MAX,
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            retroactive_initial_window: false,
        }
    }
}

impl ConnectionConfig {
    pub fn with_initial_local_window(mut self, window: i32) -> Self {
        self.initial_local_window = window;
        self
    }

    pub fn with_max_concurrent_streams(mut self, max: usize) -> Self {
        self.max_concurrent_streams = max;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_max_header_list_size(mut self, size: u32) -> Self {
        self.max_header_list_size = size;
        self
    }

    pub fn with_header_table_size(mut self, size: usize) -> Self {
        self.header_table_size = size;
        self
    }

    pub fn with_retroactive_initial_window(mut self, enabled: bool) -> Self {
        self.retroactive_initial_window = enabled;
        self
    }

    /// The SETTINGS frame that advertises this configuration. Values equal to
    /// the protocol defaults are left out.
    pub fn settings(&self) -> Settings {
        let non_default = |value: u32, default: u32| (value != default).then_some(value);
        Settings {
            header_table_size: non_default(self.header_table_size as u32, DEFAULT_HEADER_TABLE_SIZE as u32),
            enable_push: Some(0),
            max_concurrent_streams: Some(self.max_concurrent_streams.min(u32::MAX as usize) as u32),
            initial_window_size: Some(self.initial_local_window as u32),
            max_frame_size: non_default(self.max_frame_size as u32, DEFAULT_MAX_FRAME_SIZE as u32),
            max_header_list_size: non_default(self.max_header_list_size, u32::MAX),
        }
    }
}
