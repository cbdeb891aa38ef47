//! Sans-IO HTTP/2 protocol core.
//!
//! This crate is the pure protocol layer of an HTTP/2 engine: the binary
//! frame codec, the HPACK header compression codec with its differential
//! encoding context, and the per-stream state machine. It performs no I/O
//! and owns no sockets -- bytes go in, frames and events come out, and the
//! embedding connection decides when anything runs.
//!
//! # Architecture
//!
//! ```text
//!   transport bytes
//!        |
//!   +----v-----------+     +-----------------+
//!   | frame::parse   |---->| stream::Stream  |--> StreamEvent
//!   +----------------+     +-----------------+
//!        |  HEADERS payloads       ^
//!   +----v-----------+            |
//!   | hpack::Decoder |------------+  decoded header lists
//!   +----------------+
//! ```
//!
//! Outbound is the mirror: the application drives [`stream::Stream::send`],
//! the stream queues [`stream::StreamEvent::Frame`] events, the connection
//! encodes header blocks with [`hpack::Encoder`] and serializes frames with
//! [`frame::Frame::generate`].
//!
//! # Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use protocol_h2::{frame, Frame, HeaderBlock, Header, Priority};
//!
//! // Serialize a request HEADERS frame...
//! let mut encoder = protocol_h2::Encoder::new(4096);
//! let mut block = Vec::new();
//! encoder
//!     .encode(
//!         &[
//!             Header::new(b":method".as_slice(), b"GET".as_slice()),
//!             Header::new(b":path".as_slice(), b"/".as_slice()),
//!         ],
//!         &mut block,
//!     )
//!     .unwrap();
//! let mut wire = BytesMut::new();
//! Frame::Headers {
//!     stream_id: 1,
//!     block: HeaderBlock::Fragment(block.into()),
//!     priority: Priority::default(),
//!     end_stream: true,
//!     end_segment: false,
//!     end_headers: true,
//!     padded: false,
//! }
//! .generate(&mut wire)
//! .unwrap();
//!
//! // ...and read it back.
//! let parsed = frame::parse(&mut wire).unwrap().unwrap();
//! assert!(matches!(parsed, Frame::Headers { stream_id: 1, .. }));
//! ```

pub mod error;
pub mod flowcontrol;
pub mod frame;
pub mod hpack;
mod huffman;
pub mod settings;
pub mod stream;

pub use error::{ErrorCode, H2Error};
pub use frame::{Frame, HeaderBlock, Priority};
pub use hpack::{Decoder, Encoder, Header};
pub use settings::Settings;
pub use stream::{Stream, StreamEvent, StreamState, Streams};
