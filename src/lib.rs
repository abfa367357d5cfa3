//! h2-mux: a sans-I/O HTTP/2 transport engine
//!
//! Multiplexes request/response streams over one HTTP/2 connection, enforces
//! flow-control accounting in both directions, and compresses header blocks
//! with HPACK. Every operation is a synchronous transformation of in-memory
//! state: you feed it the bytes you read and write out the bytes it produces.
//!
//! # Features
//!
//! - **Sans-I/O Design**: No async runtime, no sockets, no threads
//! - **Flow Control**: Connection and stream windows, FIFO scheduling, DATA
//!   frame splitting at the peer's max frame size
//! - **HPACK**: Static and dynamic tables, Huffman coding, every field
//!   representation on decode
//! - **Frame Reader**: Resumable across partial reads, CONTINUATION assembly,
//!   strict length and stream-id validation
//!
//! # Quick Start
//!
//! ```rust
//! use h2_mux::{ClientConnection, ConnectionConfig, Request};
//!
//! let mut conn = ClientConnection::new(ConnectionConfig::default());
//!
//! let request = Request::get("https", "example.com", "/");
//! conn.send(request, |result| match result {
//!     Ok(response) => println!("status {}", response.status),
//!     Err(e) => println!("failed: {e}"),
//! })
//! .unwrap();
//!
//! conn.flush().unwrap();
//! let bytes = conn.take_output();
//! assert!(bytes.starts_with(h2_mux::CONNECTION_PREFACE));
//!
//! // write `bytes` to the transport, pass what you read to `conn.receive(..)`
//! ```
//!
//! # Architecture
//!
//! - [`huffman`]: RFC 7541 Appendix B Huffman coding
//! - [`hpack`]: header compression on top of it
//! - [`frame`] and [`reader`]: the frame wire format
//! - [`stream`] and [`flow`]: stream bookkeeping and outbound flow control,
//!   with the [`StreamWriter`] seam for frame output
//! - [`connection`]: a client connection driving all of the above
//! - [`server`]: the server side, on the same reader and controllers
//!
//! TLS, ALPN and the transport itself are the caller's business.

pub mod config;
pub mod connection;
pub mod error;
pub mod flow;
pub mod frame;
pub mod hpack;
pub mod huffman;
pub mod reader;
pub mod server;
pub mod stream;

pub use config::{ConnectionConfig, DEFAULT_LOCAL_WINDOW_SIZE};
pub use connection::{ClientConnection, Request, Response, ResponseCallback};
pub use error::{Error, ErrorCode, HpackDecodingError, HpackEncodingError, RequestError, Result, StreamError};
pub use flow::{FlowController, StreamWriter};
pub use frame::{
    flags, frame_type, is_h2c_preface, settings_id, FrameHeader, Priority, Settings, StreamId,
    CONNECTION_PREFACE,
};
pub use hpack::{DynamicTable, H2Header, HpackDecoder, HpackEncoder};
pub use reader::{FrameListener, FrameReader, MAX_HEADER_BLOCK_SIZE};
pub use server::ServerConnection;
pub use stream::{HasStream, Stream, StreamController};
