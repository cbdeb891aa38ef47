//! Error vocabulary shared by the frame codec, HPACK, and stream layer.

use thiserror::Error;

/// Wire error codes carried by RST_STREAM and GOAWAY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
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
            _ => Self::InternalError,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// Errors produced by the protocol core.
///
/// Two classes matter to the embedding connection: [`H2Error::Compression`]
/// is connection-fatal (the encoder tables on both sides can no longer be
/// trusted); everything else is either a structural protocol violation or a
/// stream-scoped condition that an RST_STREAM settles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum H2Error {
    /// HPACK table violation or an invalid field value caught at encode
    /// time. Connection fatal.
    #[error("compression error: {0}")]
    Compression(String),
    /// Structural violation while parsing, or a disallowed stream
    /// transition.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Frame arrived on a stream that is already closed.
    #[error("stream closed")]
    StreamClosed,
    /// Stream was refused before any processing happened.
    #[error("refused stream")]
    RefusedStream,
    /// Flow-control accounting violation.
    #[error("flow control error")]
    FlowControl,
    /// Stream-scoped error carrying the code that went out in RST_STREAM.
    #[error("stream error: {0:?}")]
    Stream(ErrorCode),
    /// Internal invariant failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl H2Error {
    /// True for errors that must tear down the whole connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, H2Error::Compression(_))
    }

    /// The wire code an RST_STREAM or GOAWAY should carry for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            H2Error::Compression(_) => ErrorCode::CompressionError,
            H2Error::Protocol(_) => ErrorCode::ProtocolError,
            H2Error::StreamClosed => ErrorCode::StreamClosed,
            H2Error::RefusedStream => ErrorCode::RefusedStream,
            H2Error::FlowControl => ErrorCode::FlowControlError,
            H2Error::Stream(code) => *code,
            H2Error::Internal(_) => ErrorCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trip() {
        for v in 0u32..=0xc {
            assert_eq!(ErrorCode::from_u32(v).to_u32(), v);
        }
    }

    #[test]
    fn unknown_code_maps_to_internal() {
        assert_eq!(ErrorCode::from_u32(0xffff), ErrorCode::InternalError);
    }

    #[test]
    fn compression_is_fatal() {
        assert!(H2Error::Compression("x".into()).is_connection_fatal());
        assert!(!H2Error::StreamClosed.is_connection_fatal());
    }

    #[test]
    fn wire_codes() {
        assert_eq!(H2Error::StreamClosed.code(), ErrorCode::StreamClosed);
        assert_eq!(
            H2Error::Stream(ErrorCode::Cancel).code(),
            ErrorCode::Cancel
        );
        assert_eq!(
            H2Error::Protocol("bad".into()).code(),
            ErrorCode::ProtocolError
        );
    }
}
