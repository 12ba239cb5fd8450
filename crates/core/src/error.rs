//! Error types for the RTSP relay library.

use std::fmt;

/// Errors that can occur in the RTSP relay library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`InvalidSdp`](Self::InvalidSdp).
/// - **Transport**: [`Io`](Self::Io), [`PortPoolExhausted`](Self::PortPoolExhausted).
/// - **Access**: [`PermissionDenied`](Self::PermissionDenied).
/// - **Session graph**: [`InvalidMedia`](Self::InvalidMedia),
///   [`MediaNotFound`](Self::MediaNotFound), [`MediaAlready`](Self::MediaAlready).
/// - **Negotiation**: [`InvalidTransport`](Self::InvalidTransport),
///   [`InvalidTypeData`](Self::InvalidTypeData),
///   [`InvalidMediaType`](Self::InvalidMediaType),
///   [`InterleavedError`](Self::InterleavedError).
///
/// Failures that reach a client are rendered with [`reason`](Self::reason)
/// as the status-line reason phrase.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// An access handler (or the static fallback list) rejected the request.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// [`Server::access`](crate::Server::access) was called twice for one kind.
    #[error("access handler already registered for {0:?}")]
    AccessAlreadyRegistered(String),

    /// The media session cannot be registered or used (bad role, repeated id).
    #[error("invalid media session")]
    InvalidMedia,

    /// No live publisher exists under the requested stream name.
    #[error("no live publisher for stream {0:?}")]
    MediaNotFound(String),

    /// Another publisher is already registered under the stream name.
    #[error("stream {0:?} already has a publisher")]
    MediaAlready(String),

    /// The media session was destroyed before the operation ran.
    #[error("media session destroyed: {0}")]
    MediaDestroyed(String),

    /// The owning connection is missing or already destroyed.
    #[error("owning connection is gone")]
    InvalidClient,

    /// A view session has no live target publisher (or it has no description).
    #[error("target publisher is unavailable")]
    InvalidTargetMedia,

    /// The SETUP `Transport` header was empty or lacked a required field.
    #[error("invalid transport header")]
    InvalidTransport,

    /// No SDP media entry exists for this negotiation, or the media type is
    /// absent from the session description.
    #[error("no media entry for this negotiation")]
    InvalidTypeData,

    /// SETUP requested a transport mode other than the one already fixed.
    #[error("transport mode differs from the negotiated mode")]
    InvalidMediaType,

    /// A TCP publish SETUP did not carry an `interleaved=` range.
    #[error("interleaved channel range missing from transport")]
    InterleavedError,

    /// The session description text could not be parsed.
    #[error("invalid session description: {0}")]
    InvalidSdp(String),

    /// Every port of the configured UDP range is in use.
    #[error("UDP port pool exhausted")]
    PortPoolExhausted,

    /// The configured UDP port range is empty or starts at zero.
    #[error("invalid UDP port range {start}-{end}")]
    InvalidPortRange { start: u16, end: u16 },

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl RtspError {
    /// Short token used as the reason phrase of a failure response.
    pub fn reason(&self) -> &str {
        match self {
            Self::Io(_) => "TransportError",
            Self::Parse { .. } => "Bad Request",
            Self::PermissionDenied(reason) => reason,
            Self::AccessAlreadyRegistered(_) => "AlreadyAccessValue",
            Self::InvalidMedia => "InvalidMedia",
            Self::MediaNotFound(_) => "MediaNotFound",
            Self::MediaAlready(_) => "MediaAlready",
            Self::MediaDestroyed(_) => "MediaDestroy",
            Self::InvalidClient => "InvalidClient",
            Self::InvalidTargetMedia => "InvalidTargetMedia",
            Self::InvalidTransport => "InvalidTransport",
            Self::InvalidTypeData => "InvalidTypeData",
            Self::InvalidMediaType => "InvalidMediaType",
            Self::InterleavedError => "InterleavedError",
            Self::InvalidSdp(_) => "InvalidSDP",
            Self::PortPoolExhausted => "PortPoolExhausted",
            Self::InvalidPortRange { .. } => "InvalidPortList",
            Self::AlreadyRunning => "AlreadyRunning",
        }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_tokens_are_stable() {
        assert_eq!(RtspError::MediaAlready("cam1".into()).reason(), "MediaAlready");
        assert_eq!(RtspError::InvalidTypeData.reason(), "InvalidTypeData");
        assert_eq!(RtspError::InvalidSdp("empty".into()).reason(), "InvalidSDP");
    }

    #[test]
    fn permission_denied_uses_callback_reason() {
        let err = RtspError::PermissionDenied("BadToken".into());
        assert_eq!(err.reason(), "BadToken");
        assert_eq!(err.to_string(), "permission denied: BadToken");
    }
}
