//! Error taxonomy for the transport engine.
//!
//! Decoding errors are always connection-fatal: HPACK state is shared by every
//! stream on a connection, so one corrupted header block poisons everything
//! decoded after it. Encoding and stream bookkeeping errors are reported to the
//! stream that caused them where the connection can keep going.

use crate::frame::StreamId;

/// HTTP/2 error codes (RFC 7540 Section 7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Unknown codes carry no special meaning and are treated as `InternalError`.
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        code as u32
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// Errors raised while decoding an HPACK header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum HpackDecodingError {
    /// The buffer ended before an integer's continuation bytes did.
    #[error("integer continuation is unterminated")]
    IntegerUnterminated,
    /// The integer does not fit in 32 bits.
    #[error("integer value overflows")]
    IntegerOverflow,
    /// A string literal claims more octets than the block holds.
    #[error("string literal longer than the remaining header block")]
    StringTooShort,
    /// Trailing bits were longer than 7 or were not the EOS prefix.
    #[error("invalid Huffman padding")]
    InvalidHuffmanPadding,
    #[error("EOS symbol inside a Huffman-coded string")]
    EosInString,
    #[error("header index {0} out of bounds")]
    IndexOutOfBounds(usize),
    #[error("dynamic table size {requested} exceeds the allowed maximum {max}")]
    TableSizeExceeded { requested: usize, max: usize },
    /// Table size updates are only legal at the start of a header block.
    #[error("dynamic table size update after the first header field")]
    LateTableSizeUpdate,
    #[error("decoded header list exceeds {max} bytes")]
    HeaderListTooLarge { max: usize },
}

/// Errors raised while encoding a header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum HpackEncodingError {
    /// CONTINUATION framing is not supported, so a header block must fit in a
    /// single HEADERS frame.
    #[error("header block of {size} bytes exceeds max frame size {max_frame_size}; CONTINUATION frames are not supported")]
    HeaderBlockTooLarge { size: usize, max_frame_size: usize },
    #[error("header list of {size} bytes exceeds the peer limit of {max}")]
    HeaderListTooLarge { size: usize, max: usize },
}

/// Stream map bookkeeping errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream {0} already exists")]
    DuplicateStream(StreamId),
    #[error("unknown stream {0}")]
    UnknownStream(StreamId),
    /// A response for a stream whose request has not ended, or that was
    /// already answered.
    #[error("stream {0} is not awaiting a response")]
    ResponseNotExpected(StreamId),
}

/// Connection-level error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("protocol error ({code}): {reason}")]
    Protocol { code: ErrorCode, reason: String },

    #[error("frame of {length} bytes exceeds max frame size {max}")]
    FrameSize { length: usize, max: usize },

    #[error("flow control error: {0}")]
    FlowControl(String),

    #[error("HPACK decoding error: {0}")]
    HpackDecoding(#[from] HpackDecodingError),

    #[error("HPACK encoding error: {0}")]
    HpackEncoding(#[from] HpackEncodingError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("{0} is not supported")]
    NotSupported(&'static str),

    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            code: ErrorCode::ProtocolError,
            reason: reason.into(),
        }
    }

    pub(crate) fn frame_size(length: usize, max: usize) -> Self {
        Self::FrameSize { length, max }
    }

    /// A fixed-layout frame whose length does not match its layout.
    pub(crate) fn bad_length(frame: &str, length: usize) -> Self {
        Self::Protocol {
            code: ErrorCode::FrameSizeError,
            reason: format!("{frame} frame with invalid length {length}"),
        }
    }

    /// The error code a GOAWAY or RST_STREAM reporting this error carries.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Protocol { code, .. } => *code,
            Self::FrameSize { .. } => ErrorCode::FrameSizeError,
            Self::FlowControl(_) => ErrorCode::FlowControlError,
            Self::HpackDecoding(_) | Self::HpackEncoding(_) => ErrorCode::CompressionError,
            Self::Stream(StreamError::DuplicateStream(_)) => ErrorCode::InternalError,
            Self::Stream(StreamError::UnknownStream(_)) => ErrorCode::ProtocolError,
            Self::Stream(StreamError::ResponseNotExpected(_)) => ErrorCode::InternalError,
            Self::NotSupported(_) => ErrorCode::ProtocolError,
            Self::ConnectionClosed => ErrorCode::NoError,
        }
    }

    /// Whether the connection must be torn down after this error.
    ///
    /// Encoding errors are raised before the shared encoder state changes,
    /// so they only fail the stream being encoded.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Stream(StreamError::DuplicateStream(_) | StreamError::ResponseNotExpected(_))
                | Self::HpackEncoding(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The failure a request's completion callback receives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RequestError {
    /// The transport went away, or the connection was closed locally or after
    /// a connection error.
    #[error("connection closed")]
    ConnectionClosed,
    #[error("max concurrent streams limit ({limit}) reached")]
    MaxConcurrentStreams { limit: usize },
    #[error("header encoding failed: {0}")]
    Encoding(HpackEncodingError),
    #[error("stream reset by peer: {0}")]
    Reset(ErrorCode),
    #[error("peer sent GOAWAY (last stream {last_stream_id}, {code})")]
    GoAway { last_stream_id: StreamId, code: ErrorCode },
    #[error("protocol error: {0}")]
    Protocol(ErrorCode),
}

impl From<Error> for RequestError {
    fn from(error: Error) -> Self {
        match error {
            Error::ConnectionClosed => Self::ConnectionClosed,
            Error::HpackEncoding(e) => Self::Encoding(e),
            e => Self::Protocol(e.code()),
        }
    }
}
