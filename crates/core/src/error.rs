//! Error types for the RTSP media pipeline.

use std::fmt;

/// Errors that can occur in the RTSP media pipeline.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`Status`](Self::Status),
///   [`UnsupportedAuth`](Self::UnsupportedAuth) are reported through the
///   session's error events and leave the session alive.
/// - **Binary framing**: [`Truncated`](Self::Truncated) for RTP/RTCP/box
///   data shorter than its header claims.
/// - **Construction**: [`MissingUri`](Self::MissingUri),
///   [`MissingPayloadType`](Self::MissingPayloadType) and
///   [`InvalidConfig`](Self::InvalidConfig) fail fast.
/// - **Transport**: [`Io`](Self::Io), surfaced by byte-stream collaborators.
///
/// Lossy-stream conditions (unknown box type, unsupported NAL unit, unknown
/// payload type) are not errors: they are logged and the data is dropped.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed RTSP, SDP, or interleaved framing.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A binary structure was shorter than required.
    #[error("truncated {what}: needed {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// The server answered a request with a 4xx/5xx status (RFC 2326 §7.1.1).
    #[error("{method} failed with status {code}")]
    Status { code: u16, method: String },

    /// A `WWW-Authenticate` challenge used a scheme other than Basic/Digest,
    /// or the server rejected the credentials we sent.
    #[error("unsupported authentication: {0}")]
    UnsupportedAuth(String),

    /// The session configuration had neither a URI nor a hostname.
    #[error("no URI or hostname configured")]
    MissingUri,

    /// The SDP did not declare a payload type for the named media.
    #[error("no payload type for {0}")]
    MissingPayloadType(String),

    /// A configuration value was rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Control or Content-Base URL could not be resolved.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid base64 in an SDP parameter set or auth payload.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Specific kind of parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no status line).
    EmptyMessage,
    /// Status line did not have the expected `RTSP/1.0 Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// A `Content-Length` header was not a number.
    InvalidContentLength,
    /// Data in the byte stream was neither `$`-framed nor an RTSP message.
    InvalidInterleaved,
    /// An SDP line was not of the form `x=value`.
    InvalidSdpLine,
    /// A `WWW-Authenticate` header was missing or unreadable.
    InvalidChallenge,
    /// An ISO BMFF box declared a size smaller than its own header.
    InvalidBoxSize,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
            Self::InvalidInterleaved => write!(f, "unexpected data in interleaved stream"),
            Self::InvalidSdpLine => write!(f, "invalid SDP line"),
            Self::InvalidChallenge => write!(f, "invalid authentication challenge"),
            Self::InvalidBoxSize => write!(f, "invalid box size"),
        }
    }
}

impl RtspError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        RtspError::Parse { kind }
    }

    pub(crate) fn truncated(what: &'static str, needed: usize, available: usize) -> Self {
        RtspError::Truncated {
            what,
            needed,
            available,
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let err = RtspError::parse(ParseErrorKind::InvalidStatusLine);
        assert_eq!(err.to_string(), "parse error: invalid status line");
    }

    #[test]
    fn display_truncated() {
        let err = RtspError::truncated("RTP header", 12, 3);
        assert_eq!(
            err.to_string(),
            "truncated RTP header: needed 12 bytes, have 3"
        );
    }
}
