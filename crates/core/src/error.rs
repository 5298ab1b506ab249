//! Error types for the RTSP client library.

use std::fmt;

use crate::protocol::{RtspMethod, StatusCode};

/// Errors that can occur in the RTSP client library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse): malformed RTSP messages or headers;
///   [`Status`](Self::Status): the server answered with an error status that
///   has no automatic recovery.
/// - **Transport**: [`Io`](Self::Io): socket/network failures while
///   connecting; [`NoResponse`](Self::NoResponse): a request that had to
///   succeed got no answer within the retry budget.
/// - **Local preconditions**: [`InvalidOperation`](Self::InvalidOperation),
///   [`Unsupported`](Self::Unsupported).
/// - **Setup**: [`InvalidLocation`](Self::InvalidLocation),
///   [`InvalidTransport`](Self::InvalidTransport),
///   [`NoOpenPort`](Self::NoOpenPort),
///   [`SessionDescription`](Self::SessionDescription).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP message or header (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The location is not an absolute `rtsp`, `rtspu` or `http` URL, or its
    /// host does not resolve.
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// The operation is not valid in the client's current state
    /// (e.g. PLAY for media that was never SETUP).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The server did not advertise the method in its `Public` header.
    #[error("server does not support {0}")]
    Unsupported(RtspMethod),

    /// A request that must succeed got no response within the retry budget.
    #[error("no response to {0}")]
    NoResponse(RtspMethod),

    /// The server answered with a status this client cannot recover from.
    #[error("{method} failed with status {status}")]
    Status {
        status: StatusCode,
        method: RtspMethod,
    },

    /// The `Transport` header of a SETUP response could not be used.
    #[error("invalid transport header: {0}")]
    InvalidTransport(String),

    /// No pair of free UDP ports was found above the configured floor.
    #[error("no open UDP port pair at or above {0}")]
    NoOpenPort(u16),

    /// DESCRIBE returned something other than a usable SDP document.
    #[error("session description error: {0}")]
    SessionDescription(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Input does not start with printable text, so it is not RTSP.
    NotText,
    /// Start line was neither `Method URI Version` nor `Version Status Reason`.
    InvalidStartLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was not a decimal number.
    InvalidContentLength,
    /// An unknown method token.
    UnknownMethod(String),
    /// A `Transport` header parameter could not be read.
    InvalidTransport,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::NotText => write!(f, "not a text message"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::UnknownMethod(m) => write!(f, "unknown method {m}"),
            Self::InvalidTransport => write!(f, "invalid Transport header"),
        }
    }
}

impl From<ParseErrorKind> for RtspError {
    fn from(kind: ParseErrorKind) -> Self {
        RtspError::Parse { kind }
    }
}

impl From<url::ParseError> for RtspError {
    fn from(e: url::ParseError) -> Self {
        RtspError::InvalidLocation(e.to_string())
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
