//! Error types for the protocol, codec, and session layers.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Protocol-level rejection of an incoming request.
///
/// Each variant maps to a numeric code in the JSON error envelope the
/// server answers with:
///
/// ```text
/// {"code": <int>, "message": "<string>"}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The `transport` query parameter is missing or not recognized.
    #[error("Transport unknown")]
    TransportUnknown,

    /// The `sid` query parameter does not name a live session.
    #[error("Session ID unknown")]
    UnknownSid,

    /// A handshake was attempted with a method other than GET.
    #[error("Bad handshake method")]
    BadHandshakeMethod,

    /// The request is malformed in some other way.
    #[error("Bad request")]
    BadRequest,
}

impl ProtocolError {
    /// The numeric code carried in the error envelope.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::TransportUnknown => 0,
            Self::UnknownSid => 1,
            Self::BadHandshakeMethod => 2,
            Self::BadRequest => 3,
        }
    }

    /// Render the JSON error envelope body.
    #[must_use]
    pub fn envelope(self) -> String {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
        .to_string()
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "application/json")],
            self.envelope(),
        )
            .into_response()
    }
}

/// Problem while decoding a packet or payload off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The packet is empty or its type byte is outside `'0'..='6'`.
    #[error("invalid packet framing")]
    BadPacket,

    /// A payload length prefix is not a decimal integer.
    #[error("payload length prefix is not a decimal integer")]
    BadLength,

    /// A payload declares more bytes than the input contains.
    #[error("payload shorter than its declared length")]
    Truncated,

    /// The packet data is not valid UTF-8 and cannot be framed as a
    /// text frame losslessly.
    #[error("packet data is not valid UTF-8 text")]
    NotText,
}

/// Problem while operating on a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is not open; sends and receives fail deterministically.
    #[error("session is closed")]
    Closed,

    /// `close` was called on a session that is already closing or closed.
    #[error("session is already closed")]
    AlreadyClosed,

    /// An open was attempted on a session that already emitted its
    /// OPEN packet.
    #[error("session is already open")]
    AlreadyOpen,

    /// The upgrade was completed without a bound WebSocket stream.
    #[error("no websocket stream is bound to the session")]
    NotUpgraded,

    /// The operation requires a different transport than the session's
    /// current one.
    #[error("operation does not match the session transport")]
    TransportMismatch,

    /// MESSAGE data is not valid UTF-8. Both transports frame packets
    /// as UTF-8 text, so such data cannot be carried losslessly.
    #[error("message data is not valid UTF-8 text")]
    NotText,

    /// The underlying WebSocket stream failed.
    #[error("websocket I/O failure: {0}")]
    Io(#[from] axum::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_codes_match_protocol() {
        assert_eq!(ProtocolError::TransportUnknown.code(), 0);
        assert_eq!(ProtocolError::UnknownSid.code(), 1);
        assert_eq!(ProtocolError::BadHandshakeMethod.code(), 2);
        assert_eq!(ProtocolError::BadRequest.code(), 3);
    }

    #[test]
    fn envelope_body_is_exact() {
        assert_eq!(
            ProtocolError::TransportUnknown.envelope(),
            r#"{"code":0,"message":"Transport unknown"}"#
        );
        assert_eq!(
            ProtocolError::UnknownSid.envelope(),
            r#"{"code":1,"message":"Session ID unknown"}"#
        );
    }

    #[test]
    fn codec_error_displays() {
        assert_eq!(
            format!("{}", CodecError::Truncated),
            "payload shorter than its declared length"
        );
    }

    #[test]
    fn session_error_displays() {
        assert_eq!(format!("{}", SessionError::Closed), "session is closed");
        assert_eq!(
            format!("{}", SessionError::AlreadyClosed),
            "session is already closed"
        );
    }
}
