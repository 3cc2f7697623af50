//! Error types for the media transport library.

use std::fmt;

/// Errors that can occur in the media transport library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Resolution**: [`Resolution`](Self::Resolution): a name lookup failed
///   or produced no usable address.
/// - **Transport**: [`Io`](Self::Io), [`Socket`](Self::Socket): socket
///   failures; `Socket` is only raised once every alternative was tried.
/// - **Control protocol**: [`Protocol`](Self::Protocol), fatal to the
///   current session. A non-success status is
///   [`ProtocolErrorKind::ErrorStatus`].
/// - **RTP**: [`MalformedPacket`](Self::MalformedPacket),
///   [`UnsupportedFormat`](Self::UnsupportedFormat).
/// - **Lifecycle / configuration**: [`Active`](Self::Active),
///   [`NotActive`](Self::NotActive), [`InvalidConfig`](Self::InvalidConfig),
///   [`InvalidTransition`](Self::InvalidTransition).
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Name lookup failed or returned zero usable addresses.
    #[error("could not resolve {address}: {reason}")]
    Resolution { address: String, reason: String },

    /// Every resolved alternative failed for a bind/send/connect.
    #[error("{operation} failed on all {attempts} alternatives: {source}")]
    Socket {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or failed control-protocol exchange, session description
    /// or URL.
    #[error("protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// An RTP packet was too short for the fields it declares.
    #[error("malformed RTP packet: {0}")]
    MalformedPacket(&'static str),

    /// No payload type exists for the given sample format.
    #[error("no payload type for L16 {rate} Hz / {channels} channels")]
    UnsupportedFormat { rate: u32, channels: u16 },

    /// A configuration value was rejected by a setter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The setting cannot change while sockets are open.
    #[error("cannot change {0} while active")]
    Active(&'static str),

    /// The operation needs open sockets or an open control connection.
    #[error("not active")]
    NotActive,

    /// The pipeline transition is not valid from the current session phase.
    #[error("transition {transition} not allowed in phase {from}")]
    InvalidTransition { from: String, transition: String },
}

/// Specific kind of control-protocol failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was not a number or exceeds the body limit.
    InvalidContentLength,
    /// A response head grew past the size limit without ending.
    HeadTooLarge,
    /// A response head was not valid UTF-8.
    InvalidEncoding,
    /// The session description could not be parsed.
    MalformedSessionDescription(String),
    /// The location is not an `rtsp://` URL.
    InvalidUrl(String),
    /// The connection closed in the middle of a message.
    ConnectionClosed,
    /// The peer answered a request with a non-success status code.
    ErrorStatus {
        method: String,
        code: u16,
        reason: String,
    },
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
            Self::MalformedSessionDescription(line) => {
                write!(f, "malformed session description near {line:?}")
            }
            Self::InvalidUrl(url) => write!(f, "invalid url {url:?}"),
            Self::HeadTooLarge => write!(f, "response head too large"),
            Self::InvalidEncoding => write!(f, "response head is not UTF-8"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::ErrorStatus {
                method,
                code,
                reason,
            } => write!(f, "{method} answered with {code} {reason}"),
        }
    }
}

impl NetError {
    pub(crate) fn protocol(kind: ProtocolErrorKind) -> Self {
        Self::Protocol { kind }
    }
}

/// Convenience alias for `Result<T, NetError>`.
pub type Result<T> = std::result::Result<T, NetError>;
