//! HTTP/2 frame encoding/decoding.
//!
//! Frames carry a fixed 8-byte header:
//! ```text
//! +-----------------+---------------+---------------+
//! |   Length (16)   |   Type (8)    |   Flags (8)   |
//! +-+---------------+---------------+---------------+
//! |R|                Stream Identifier (31)         |
//! +-+-----------------------------------------------+
//! |                 Frame Payload ...               |
//! +-------------------------------------------------+
//! ```
//!
//! [`Frame::generate`] rejects invalid descriptors with a compression error
//! (connection fatal); [`parse`] rejects structural violations with a
//! protocol error and consumes nothing until a whole frame is buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ErrorCode, H2Error};
use crate::hpack::Header;
use crate::settings::Settings;

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD: usize = 16_383;

/// Largest legal stream identifier (31 bits).
pub const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// Weight assigned to a stream that never stated one.
pub const DEFAULT_WEIGHT: u16 = 16;

// Frame type codes.
pub const TYPE_DATA: u8 = 0x0;
pub const TYPE_HEADERS: u8 = 0x1;
pub const TYPE_PRIORITY: u8 = 0x2;
pub const TYPE_RST_STREAM: u8 = 0x3;
pub const TYPE_SETTINGS: u8 = 0x4;
pub const TYPE_PUSH_PROMISE: u8 = 0x5;
pub const TYPE_PING: u8 = 0x6;
pub const TYPE_GOAWAY: u8 = 0x7;
pub const TYPE_WINDOW_UPDATE: u8 = 0x8;
pub const TYPE_CONTINUATION: u8 = 0x9;
/// First type code of the extension range (0x10..=0xef extensible,
/// 0xf0..=0xff experimental).
pub const TYPE_EXTENSION_BASE: u8 = 0x10;

// Flag bits, assigned per type.
pub const FLAG_END_STREAM: u8 = 1 << 0;
pub const FLAG_ACK: u8 = 1 << 0;
pub const FLAG_END_SEGMENT: u8 = 1 << 1;
pub const FLAG_END_HEADERS: u8 = 1 << 2;
pub const FLAG_PADDED: u8 = 1 << 4;
pub const FLAG_PRIORITY: u8 = 1 << 5;
pub const FLAG_PRIORITY_GROUP: u8 = 1 << 5;
pub const FLAG_PRIORITY_DEPENDENCY: u8 = 1 << 6;

/// Stream dependency and weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    /// Stream this one depends on; 0 means no dependency.
    pub dependency: u32,
    /// 1..=256.
    pub weight: u16,
}

impl Default for Priority {
    fn default() -> Self {
        Self {
            exclusive: false,
            dependency: 0,
            weight: DEFAULT_WEIGHT,
        }
    }
}

impl Priority {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Payload of a HEADERS or PUSH_PROMISE frame.
///
/// The wire codec only produces and consumes [`HeaderBlock::Fragment`]; the
/// connection layer swaps in [`HeaderBlock::Decoded`] after running the
/// fragment through the HPACK decoder (and the reverse before sending), so
/// one frame type flows through the whole stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderBlock {
    Fragment(Bytes),
    Decoded(Vec<Header>),
}

impl HeaderBlock {
    fn fragment(&self) -> Result<&Bytes, H2Error> {
        match self {
            HeaderBlock::Fragment(b) => Ok(b),
            HeaderBlock::Decoded(_) => Err(H2Error::Compression(
                "header block must be HPACK-encoded before framing".into(),
            )),
        }
    }
}

/// A structured frame descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
        end_segment: bool,
        /// Payload already carries its pad-length byte and padding; the
        /// encoder passes it through verbatim and never pads on its own.
        padded: bool,
    },
    Headers {
        stream_id: u32,
        block: HeaderBlock,
        priority: Priority,
        end_stream: bool,
        end_segment: bool,
        end_headers: bool,
        padded: bool,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error: ErrorCode,
    },
    Settings {
        ack: bool,
        settings: Settings,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        block: HeaderBlock,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        payload: Bytes,
    },
    GoAway {
        last_stream_id: u32,
        error: ErrorCode,
        debug: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    /// Frame in the extensible (0x10..=0xef) or experimental (0xf0..=0xff)
    /// type range; the type code round-trips verbatim.
    Extension {
        code: u8,
        flags: u8,
        stream_id: u32,
        payload: Bytes,
    },
}

impl Frame {
    /// Stream this frame belongs to; connection-scoped frames return 0.
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Extension { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// Whether this frame ends its direction of the stream.
    pub fn end_stream(&self) -> bool {
        match self {
            Frame::Data { end_stream, .. } | Frame::Headers { end_stream, .. } => *end_stream,
            _ => false,
        }
    }

    /// Short type name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Headers { .. } => "HEADERS",
            Frame::Priority { .. } => "PRIORITY",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::PushPromise { .. } => "PUSH_PROMISE",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Continuation { .. } => "CONTINUATION",
            Frame::Extension { .. } => "EXTENSION",
        }
    }

    /// Serialize this frame, appending header and payload to `buf`.
    ///
    /// Nothing is written when validation fails.
    pub fn generate(&self, buf: &mut BytesMut) -> Result<(), H2Error> {
        let mut payload = BytesMut::new();
        let (frame_type, flags, stream_id) = match self {
            Frame::Data {
                stream_id,
                payload: data,
                end_stream,
                end_segment,
                padded,
            } => {
                check_stream_id(*stream_id)?;
                payload.extend_from_slice(data);
                let mut flags = 0;
                if *end_stream {
                    flags |= FLAG_END_STREAM;
                }
                if *end_segment {
                    flags |= FLAG_END_SEGMENT;
                }
                if *padded {
                    flags |= FLAG_PADDED;
                }
                (TYPE_DATA, flags, *stream_id)
            }
            Frame::Headers {
                stream_id,
                block,
                priority,
                end_stream,
                end_segment,
                end_headers,
                padded,
            } => {
                check_stream_id(*stream_id)?;
                let mut flags = 0;
                if *end_stream {
                    flags |= FLAG_END_STREAM;
                }
                if *end_segment {
                    flags |= FLAG_END_SEGMENT;
                }
                if *end_headers {
                    flags |= FLAG_END_HEADERS;
                }
                if *padded {
                    if !priority.is_default() {
                        return Err(H2Error::Compression(
                            "padded HEADERS payload must embed its own priority".into(),
                        ));
                    }
                    flags |= FLAG_PADDED;
                } else if !priority.is_default() {
                    flags |= FLAG_PRIORITY;
                    put_priority(&mut payload, priority)?;
                }
                payload.extend_from_slice(block.fragment()?);
                (TYPE_HEADERS, flags, *stream_id)
            }
            Frame::Priority {
                stream_id,
                priority,
            } => {
                check_stream_id(*stream_id)?;
                put_priority(&mut payload, priority)?;
                (TYPE_PRIORITY, 0, *stream_id)
            }
            Frame::RstStream { stream_id, error } => {
                check_stream_id(*stream_id)?;
                payload.put_u32(error.to_u32());
                (TYPE_RST_STREAM, 0, *stream_id)
            }
            Frame::Settings { ack, settings } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                if *ack {
                    if !settings.is_empty() {
                        return Err(H2Error::Compression(
                            "SETTINGS ack carries no payload".into(),
                        ));
                    }
                } else {
                    settings.encode(&mut payload);
                }
                (TYPE_SETTINGS, flags, 0)
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                block,
                end_headers,
            } => {
                check_stream_id(*stream_id)?;
                check_stream_id(*promised_stream_id)?;
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                payload.put_u32(promised_stream_id & MAX_STREAM_ID);
                payload.extend_from_slice(block.fragment()?);
                (TYPE_PUSH_PROMISE, flags, *stream_id)
            }
            Frame::Ping { ack, payload: data } => {
                if data.len() != 8 {
                    return Err(H2Error::Compression(format!(
                        "PING payload must be 8 bytes, got {}",
                        data.len()
                    )));
                }
                payload.extend_from_slice(data);
                (TYPE_PING, if *ack { FLAG_ACK } else { 0 }, 0)
            }
            Frame::GoAway {
                last_stream_id,
                error,
                debug,
            } => {
                check_stream_id(*last_stream_id)?;
                payload.put_u32(last_stream_id & MAX_STREAM_ID);
                payload.put_u32(error.to_u32());
                payload.extend_from_slice(debug);
                (TYPE_GOAWAY, 0, 0)
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                check_stream_id(*stream_id)?;
                if *increment == 0 || *increment > MAX_STREAM_ID {
                    return Err(H2Error::Compression(format!(
                        "window increment {increment} out of range"
                    )));
                }
                payload.put_u32(*increment & MAX_STREAM_ID);
                (TYPE_WINDOW_UPDATE, 0, *stream_id)
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                check_stream_id(*stream_id)?;
                payload.extend_from_slice(fragment);
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                (TYPE_CONTINUATION, flags, *stream_id)
            }
            Frame::Extension {
                code,
                flags,
                stream_id,
                payload: data,
            } => {
                if *code < TYPE_EXTENSION_BASE {
                    return Err(H2Error::Compression(format!(
                        "type {code:#x} is not in the extension range"
                    )));
                }
                check_stream_id(*stream_id)?;
                payload.extend_from_slice(data);
                (*code, *flags, *stream_id)
            }
        };

        if payload.len() > MAX_PAYLOAD {
            return Err(H2Error::Compression(format!(
                "payload of {} bytes exceeds the frame limit",
                payload.len()
            )));
        }
        buf.put_u16(payload.len() as u16);
        buf.put_u8(frame_type);
        buf.put_u8(flags);
        buf.put_u32(stream_id & MAX_STREAM_ID);
        buf.extend_from_slice(&payload);
        Ok(())
    }
}

fn check_stream_id(id: u32) -> Result<(), H2Error> {
    if id > MAX_STREAM_ID {
        return Err(H2Error::Compression(format!(
            "stream id {id:#x} exceeds 31 bits"
        )));
    }
    Ok(())
}

fn put_priority(payload: &mut BytesMut, priority: &Priority) -> Result<(), H2Error> {
    check_stream_id(priority.dependency)?;
    if priority.weight == 0 || priority.weight > 256 {
        return Err(H2Error::Compression(format!(
            "weight {} out of range",
            priority.weight
        )));
    }
    let mut dep = priority.dependency & MAX_STREAM_ID;
    if priority.exclusive {
        dep |= 0x8000_0000;
    }
    payload.put_u32(dep);
    payload.put_u8((priority.weight - 1) as u8);
    Ok(())
}

/// Flag bits defined for a core frame type; anything else is discarded on
/// parse.
fn valid_flags(frame_type: u8) -> u8 {
    match frame_type {
        TYPE_DATA => FLAG_END_STREAM | FLAG_END_SEGMENT | FLAG_PADDED,
        TYPE_HEADERS => {
            FLAG_END_STREAM | FLAG_END_SEGMENT | FLAG_END_HEADERS | FLAG_PADDED | FLAG_PRIORITY
        }
        TYPE_PRIORITY => FLAG_PRIORITY_GROUP | FLAG_PRIORITY_DEPENDENCY,
        TYPE_SETTINGS | TYPE_PING => FLAG_ACK,
        TYPE_PUSH_PROMISE => FLAG_END_HEADERS | FLAG_PADDED,
        TYPE_CONTINUATION => FLAG_END_HEADERS,
        _ => 0,
    }
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` without consuming anything while less than a full
/// frame is buffered; on success the header and exactly `length` payload
/// bytes are consumed. Failures consume nothing.
pub fn parse(buf: &mut BytesMut) -> Result<Option<Frame>, H2Error> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let length = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let frame_type = buf[2];
    let raw_flags = buf[3];
    let stream_id =
        u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) & MAX_STREAM_ID;
    if length > MAX_PAYLOAD {
        return Err(H2Error::Protocol(format!(
            "frame length {length} exceeds the limit"
        )));
    }
    let total = FRAME_HEADER_LEN + length;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = &buf[FRAME_HEADER_LEN..total];
    let flags = if frame_type >= TYPE_EXTENSION_BASE {
        raw_flags
    } else {
        raw_flags & valid_flags(frame_type)
    };

    let frame = match frame_type {
        TYPE_DATA => {
            require_stream(stream_id, "DATA")?;
            let data = strip_padding(payload, flags)?;
            Frame::Data {
                stream_id,
                payload: Bytes::copy_from_slice(data),
                end_stream: flags & FLAG_END_STREAM != 0,
                end_segment: flags & FLAG_END_SEGMENT != 0,
                padded: false,
            }
        }
        TYPE_HEADERS => {
            require_stream(stream_id, "HEADERS")?;
            let data = strip_padding(payload, flags)?;
            let (priority, fragment) = if flags & FLAG_PRIORITY != 0 {
                let (priority, rest) = take_priority(data, stream_id)?;
                (priority, rest)
            } else {
                (Priority::default(), data)
            };
            Frame::Headers {
                stream_id,
                block: HeaderBlock::Fragment(Bytes::copy_from_slice(fragment)),
                priority,
                end_stream: flags & FLAG_END_STREAM != 0,
                end_segment: flags & FLAG_END_SEGMENT != 0,
                end_headers: flags & FLAG_END_HEADERS != 0,
                padded: false,
            }
        }
        TYPE_PRIORITY => {
            require_stream(stream_id, "PRIORITY")?;
            if payload.len() != 5 {
                return Err(H2Error::Protocol("PRIORITY payload must be 5 bytes".into()));
            }
            let (priority, _) = take_priority(payload, stream_id)?;
            Frame::Priority {
                stream_id,
                priority,
            }
        }
        TYPE_RST_STREAM => {
            require_stream(stream_id, "RST_STREAM")?;
            if payload.len() != 4 {
                return Err(H2Error::Protocol(
                    "RST_STREAM payload must be 4 bytes".into(),
                ));
            }
            let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            Frame::RstStream {
                stream_id,
                error: ErrorCode::from_u32(code),
            }
        }
        TYPE_SETTINGS => {
            if stream_id != 0 {
                return Err(H2Error::Protocol("SETTINGS on a non-zero stream".into()));
            }
            let ack = flags & FLAG_ACK != 0;
            if ack {
                if !payload.is_empty() {
                    return Err(H2Error::Protocol("SETTINGS ack with payload".into()));
                }
                Frame::Settings {
                    ack: true,
                    settings: Settings::default(),
                }
            } else {
                Frame::Settings {
                    ack: false,
                    settings: Settings::decode(payload)?,
                }
            }
        }
        TYPE_PUSH_PROMISE => {
            require_stream(stream_id, "PUSH_PROMISE")?;
            let data = strip_padding(payload, flags)?;
            if data.len() < 4 {
                return Err(H2Error::Protocol("PUSH_PROMISE payload too short".into()));
            }
            let promised =
                u32::from_be_bytes([data[0], data[1], data[2], data[3]]) & MAX_STREAM_ID;
            Frame::PushPromise {
                stream_id,
                promised_stream_id: promised,
                block: HeaderBlock::Fragment(Bytes::copy_from_slice(&data[4..])),
                end_headers: flags & FLAG_END_HEADERS != 0,
            }
        }
        TYPE_PING => {
            if stream_id != 0 {
                return Err(H2Error::Protocol("PING on a non-zero stream".into()));
            }
            if payload.len() != 8 {
                return Err(H2Error::Protocol("PING payload must be 8 bytes".into()));
            }
            Frame::Ping {
                ack: flags & FLAG_ACK != 0,
                payload: Bytes::copy_from_slice(payload),
            }
        }
        TYPE_GOAWAY => {
            if stream_id != 0 {
                return Err(H2Error::Protocol("GOAWAY on a non-zero stream".into()));
            }
            if payload.len() < 8 {
                return Err(H2Error::Protocol("GOAWAY payload too short".into()));
            }
            let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                & MAX_STREAM_ID;
            let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
            Frame::GoAway {
                last_stream_id: last,
                error: ErrorCode::from_u32(code),
                debug: Bytes::copy_from_slice(&payload[8..]),
            }
        }
        TYPE_WINDOW_UPDATE => {
            if payload.len() != 4 {
                return Err(H2Error::Protocol(
                    "WINDOW_UPDATE payload must be 4 bytes".into(),
                ));
            }
            let increment =
                u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                    & MAX_STREAM_ID;
            if increment == 0 {
                return Err(H2Error::Protocol("WINDOW_UPDATE with zero increment".into()));
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            }
        }
        TYPE_CONTINUATION => {
            require_stream(stream_id, "CONTINUATION")?;
            Frame::Continuation {
                stream_id,
                fragment: Bytes::copy_from_slice(payload),
                end_headers: flags & FLAG_END_HEADERS != 0,
            }
        }
        code if code >= TYPE_EXTENSION_BASE => Frame::Extension {
            code,
            flags,
            stream_id,
            payload: Bytes::copy_from_slice(payload),
        },
        code => {
            return Err(H2Error::Protocol(format!("unknown frame type {code:#x}")));
        }
    };

    buf.advance(total);
    Ok(Some(frame))
}

fn require_stream(stream_id: u32, kind: &str) -> Result<(), H2Error> {
    if stream_id == 0 {
        return Err(H2Error::Protocol(format!("{kind} on stream 0")));
    }
    Ok(())
}

/// Drop the pad-length byte and trailing padding when the PADDED flag is set.
fn strip_padding(payload: &[u8], flags: u8) -> Result<&[u8], H2Error> {
    if flags & FLAG_PADDED == 0 {
        return Ok(payload);
    }
    let Some((&pad_len, rest)) = payload.split_first() else {
        return Err(H2Error::Protocol("padded frame with empty payload".into()));
    };
    let pad_len = pad_len as usize;
    if pad_len > rest.len() {
        return Err(H2Error::Protocol("padding exceeds payload".into()));
    }
    Ok(&rest[..rest.len() - pad_len])
}

/// Read a 5-byte priority prefix, rejecting self-dependency.
fn take_priority(data: &[u8], stream_id: u32) -> Result<(Priority, &[u8]), H2Error> {
    if data.len() < 5 {
        return Err(H2Error::Protocol("priority prefix too short".into()));
    }
    let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let dependency = raw & MAX_STREAM_ID;
    if dependency == stream_id {
        return Err(H2Error::Protocol(format!(
            "stream {stream_id} depends on itself"
        )));
    }
    let priority = Priority {
        exclusive: raw & 0x8000_0000 != 0,
        dependency,
        weight: u16::from(data[4]) + 1,
    };
    Ok((priority, &data[5..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: &Frame) -> Frame {
        let mut buf = BytesMut::new();
        frame.generate(&mut buf).unwrap();
        let parsed = parse(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "parse must consume the whole frame");
        parsed
    }

    #[test]
    fn data_round_trip() {
        let frame = Frame::Data {
            stream_id: 1,
            payload: Bytes::from_static(b"hello"),
            end_stream: true,
            end_segment: false,
            padded: false,
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn headers_wire_image() {
        let frame = Frame::Headers {
            stream_id: 1,
            block: HeaderBlock::Fragment(Bytes::from_static(&[0xaa; 12])),
            priority: Priority::default(),
            end_stream: true,
            end_segment: false,
            end_headers: true,
            padded: false,
        };
        let mut buf = BytesMut::new();
        frame.generate(&mut buf).unwrap();
        assert_eq!(&buf[..8], &[0x00, 0x0c, 0x01, 0x05, 0x00, 0x00, 0x00, 0x01]);
        let parsed = parse(&mut buf).unwrap().unwrap();
        match parsed {
            Frame::Headers { block, .. } => {
                assert_eq!(block, HeaderBlock::Fragment(Bytes::from_static(&[0xaa; 12])));
            }
            other => panic!("expected HEADERS, got {}", other.kind()),
        }
    }

    #[test]
    fn headers_synthesizes_priority_flag() {
        let frame = Frame::Headers {
            stream_id: 3,
            block: HeaderBlock::Fragment(Bytes::from_static(&[0x82])),
            priority: Priority {
                exclusive: true,
                dependency: 1,
                weight: 201,
            },
            end_stream: false,
            end_segment: false,
            end_headers: true,
            padded: false,
        };
        let mut buf = BytesMut::new();
        frame.generate(&mut buf).unwrap();
        assert_eq!(buf[3] & FLAG_PRIORITY, FLAG_PRIORITY);
        // Priority prefix: exclusive bit + dependency 1, weight-1 = 200.
        assert_eq!(&buf[8..13], &[0x80, 0x00, 0x00, 0x01, 200]);
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn headers_defaults_without_priority_flag() {
        let frame = Frame::Headers {
            stream_id: 5,
            block: HeaderBlock::Fragment(Bytes::from_static(&[0x82, 0x86])),
            priority: Priority::default(),
            end_stream: false,
            end_segment: false,
            end_headers: false,
            padded: false,
        };
        match round_trip(&frame) {
            Frame::Headers { priority, .. } => {
                assert_eq!(priority, Priority::default());
            }
            other => panic!("expected HEADERS, got {}", other.kind()),
        }
    }

    #[test]
    fn priority_round_trip() {
        let frame = Frame::Priority {
            stream_id: 7,
            priority: Priority {
                exclusive: false,
                dependency: 3,
                weight: 256,
            },
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn self_dependency_rejected() {
        let frame = Frame::Priority {
            stream_id: 3,
            priority: Priority {
                exclusive: false,
                dependency: 3,
                weight: 16,
            },
        };
        let mut buf = BytesMut::new();
        frame.generate(&mut buf).unwrap();
        assert!(matches!(parse(&mut buf), Err(H2Error::Protocol(_))));
    }

    #[test]
    fn rst_stream_round_trip() {
        let frame = Frame::RstStream {
            stream_id: 9,
            error: ErrorCode::Cancel,
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn settings_round_trip() {
        let frame = Frame::Settings {
            ack: false,
            settings: Settings {
                header_table_size: Some(4096),
                initial_window_size: Some(65535),
                ..Default::default()
            },
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn settings_extensible_bucket_round_trip() {
        let mut settings = Settings::default();
        settings.extensible.insert(0x42, 123);
        let frame = Frame::Settings {
            ack: false,
            settings,
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn settings_ack_round_trip() {
        let frame = Frame::Settings {
            ack: true,
            settings: Settings::default(),
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn push_promise_round_trip() {
        let frame = Frame::PushPromise {
            stream_id: 1,
            promised_stream_id: 2,
            block: HeaderBlock::Fragment(Bytes::from_static(&[0x82, 0x84])),
            end_headers: true,
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn ping_round_trip() {
        let frame = Frame::Ping {
            ack: true,
            payload: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn ping_wrong_size_rejected_at_generate() {
        let frame = Frame::Ping {
            ack: false,
            payload: Bytes::from_static(b"short"),
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            frame.generate(&mut buf),
            Err(H2Error::Compression(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn goaway_round_trip() {
        let frame = Frame::GoAway {
            last_stream_id: 17,
            error: ErrorCode::EnhanceYourCalm,
            debug: Bytes::from_static(b"calm down"),
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn window_update_round_trip() {
        let frame = Frame::WindowUpdate {
            stream_id: 1,
            increment: MAX_STREAM_ID,
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn window_update_overflow_rejected() {
        let frame = Frame::WindowUpdate {
            stream_id: 1,
            increment: MAX_STREAM_ID + 1,
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            frame.generate(&mut buf),
            Err(H2Error::Compression(_))
        ));
    }

    #[test]
    fn continuation_round_trip() {
        let frame = Frame::Continuation {
            stream_id: 1,
            fragment: Bytes::from_static(&[0x88]),
            end_headers: true,
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn extension_type_code_round_trip() {
        let frame = Frame::Extension {
            code: 0xf2,
            flags: 0x0b,
            stream_id: 11,
            payload: Bytes::from_static(b"opaque"),
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn extension_code_in_core_range_rejected() {
        let frame = Frame::Extension {
            code: 0x9,
            flags: 0,
            stream_id: 1,
            payload: Bytes::new(),
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            frame.generate(&mut buf),
            Err(H2Error::Compression(_))
        ));
    }

    #[test]
    fn short_buffer_consumes_nothing() {
        let mut buf = BytesMut::from(&[0x00u8, 0x05, 0x00, 0x00][..]);
        assert_eq!(parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 4);

        // Full header, truncated payload.
        let frame = Frame::Data {
            stream_id: 1,
            payload: Bytes::from_static(b"hello"),
            end_stream: false,
            end_segment: false,
            padded: false,
        };
        let mut full = BytesMut::new();
        frame.generate(&mut full).unwrap();
        let mut truncated = BytesMut::from(&full[..full.len() - 2]);
        assert_eq!(parse(&mut truncated).unwrap(), None);
        assert_eq!(truncated.len(), full.len() - 2);
    }

    #[test]
    fn padding_is_stripped() {
        // payload: pad_len=3, "abc", 3 pad bytes.
        let mut buf = BytesMut::new();
        buf.put_u16(7);
        buf.put_u8(TYPE_DATA);
        buf.put_u8(FLAG_PADDED);
        buf.put_u32(1);
        buf.extend_from_slice(&[3, b'a', b'b', b'c', 0, 0, 0]);
        match parse(&mut buf).unwrap().unwrap() {
            Frame::Data { payload, .. } => assert_eq!(payload, Bytes::from_static(b"abc")),
            other => panic!("expected DATA, got {}", other.kind()),
        }
    }

    #[test]
    fn overdeclared_padding_rejected() {
        // pad_len=5 but only 3 bytes follow.
        let mut buf = BytesMut::new();
        buf.put_u16(4);
        buf.put_u8(TYPE_DATA);
        buf.put_u8(FLAG_PADDED);
        buf.put_u32(1);
        buf.extend_from_slice(&[5, b'a', b'b', b'c']);
        assert!(matches!(parse(&mut buf), Err(H2Error::Protocol(_))));
    }

    #[test]
    fn data_on_stream_zero_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(0);
        buf.put_u8(TYPE_DATA);
        buf.put_u8(0);
        buf.put_u32(0);
        assert!(matches!(parse(&mut buf), Err(H2Error::Protocol(_))));
    }

    #[test]
    fn unknown_core_type_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(0);
        buf.put_u8(0x0b);
        buf.put_u8(0);
        buf.put_u32(1);
        assert!(matches!(parse(&mut buf), Err(H2Error::Protocol(_))));
    }

    #[test]
    fn reserved_stream_bit_masked() {
        let mut buf = BytesMut::new();
        buf.put_u16(4);
        buf.put_u8(TYPE_RST_STREAM);
        buf.put_u8(0);
        buf.put_u32(0x8000_0001);
        buf.put_u32(ErrorCode::NoError.to_u32());
        match parse(&mut buf).unwrap().unwrap() {
            Frame::RstStream { stream_id, .. } => assert_eq!(stream_id, 1),
            other => panic!("expected RST_STREAM, got {}", other.kind()),
        }
    }

    #[test]
    fn decoded_block_cannot_be_framed() {
        let frame = Frame::Headers {
            stream_id: 1,
            block: HeaderBlock::Decoded(vec![Header::new(
                b":method".as_slice(),
                b"GET".as_slice(),
            )]),
            priority: Priority::default(),
            end_stream: false,
            end_segment: false,
            end_headers: true,
            padded: false,
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            frame.generate(&mut buf),
            Err(H2Error::Compression(_))
        ));
    }
}
