//! Error handling

use std::io;

use http::Response;
use thiserror::Error;

use crate::protocol::frame::coding::{Control, Data};

/// Generic result type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible WebSocket channel errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Input-output error. Apart from WouldBlock, these are generally errors with the
    /// underlying connection and you should probably consider them fatal.
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),

    /// Protocol violation.
    #[error("Protocol Error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Extension negotiation failed.
    #[error("Negotiation Error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// A header value was not valid UTF-8.
    #[error("UTF-8 Error: {0}")]
    Utf8(String),

    /// - When reading: buffer capacity exhausted.
    /// - When reassembling: the message is bigger than the configured max message size.
    #[error("Capacity Error: {0}")]
    Capacity(#[from] CapacityError),

    /// The server answered the upgrade request with something other than `101`.
    #[error("HTTP Error: {}", .0.status())]
    Http(Box<Response<Option<Vec<u8>>>>),

    /// HTTP format error.
    #[error("HTTP format error: {0}")]
    HttpFormat(#[from] http::Error),

    /// Invalid URL.
    #[error("URL Error: {0}")]
    Url(#[from] UrlError),
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(value: http::header::InvalidHeaderName) -> Self {
        Error::HttpFormat(value.into())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(value: http::header::InvalidHeaderValue) -> Self {
        Error::HttpFormat(value.into())
    }
}

impl From<http::header::ToStrError> for Error {
    fn from(value: http::header::ToStrError) -> Self {
        Error::Utf8(value.to_string())
    }
}

impl From<http::status::InvalidStatusCode> for Error {
    fn from(value: http::status::InvalidStatusCode) -> Self {
        Error::HttpFormat(value.into())
    }
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        match value {
            httparse::Error::TooManyHeaders => Error::Capacity(CapacityError::TooManyHeaders),
            e => Error::Protocol(ProtocolError::HttparseError(e)),
        }
    }
}

/// Indicates the specific type/cause of a protocol error.
///
/// The `Display` text is the failure reason handed to the channel's `fail`.
#[allow(missing_copy_implementations)]
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    /// Wrong HTTP version used (the WebSocket protocol requires version 1.1 or higher).
    #[error("Unsupported HTTP version (must be at least HTTP/1.1)")]
    InvalidHttpVersion,

    /// Missing `Connection: upgrade` HTTP header.
    #[error("Missing 'Connection: upgrade' header")]
    MissingConnectionUpgradeHeader,

    /// Missing `Upgrade: websocket` HTTP header.
    #[error("Missing 'Upgrade: websocket' header")]
    MissingUpgradeHeader,

    /// The `Sec-WebSocket-Accept` header is either not present or does not specify the correct key value.
    #[error("Mismatched 'Sec-WebSocket-Accept' header")]
    AcceptKeyMismatch,

    /// The `Sec-WebSocket-Protocol` header was invalid
    #[error("SubProtocol error: {0}")]
    SecWebSocketSubProtocolError(SubProtocolError),

    /// Wrapper around a [`httparse::Error`] value.
    #[error("httparse error: {0}")]
    HttparseError(#[from] httparse::Error),

    /// Reserved bits in frame header are non-zero after extensions had their say.
    #[error("One or more reserved bits are on: reserved1 = {rsv1}, reserved2 = {rsv2}, reserved3 = {rsv3}")]
    NonZeroReservedBits {
        /// RSV1
        rsv1: u8,
        /// RSV2
        rsv2: u8,
        /// RSV3
        rsv3: u8,
    },

    /// Control frames must not be fragmented.
    #[error("Received fragmented control frame: opcode = {}", u8::from(*.0))]
    FragmentedControlFrame(Control),

    /// Control frames must have a payload of 125 bytes or less.
    #[error("Received control frame having too long payload: {0} bytes")]
    ControlFrameTooBig(u64),

    /// The client must close the connection when a masked frame is received.
    #[error("A server must not mask any frames that it sends to the client.")]
    MaskedFrameFromServer,

    /// The server must close the connection when an unmasked frame is received.
    #[error("A client must mask any frames that it sends to the server.")]
    UnmaskedFrameFromClient,

    /// Encountered an invalid opcode.
    #[error("Unrecognized frame opcode: {0}")]
    UnknownOpCode(u8),

    /// The 64-bit length field has its most significant bit set or does not fit in memory.
    #[error("WebSocket frame length too large: {0} bytes")]
    FrameTooLarge(u64),

    /// Received a continue frame despite there being nothing to continue.
    #[error("Received unexpected continuation frame.")]
    UnexpectedContinue,

    /// Received a new data frame while waiting for more fragments.
    #[error("Received start of new message but previous message is unfinished.")]
    ExpectedFragment(Data),

    /// A text message was not valid UTF-8.
    #[error("Could not decode a text frame as UTF-8.")]
    InvalidUtf8,

    /// The close frame payload had exactly one byte.
    #[error("Received a broken close frame containing an invalid size body.")]
    InvalidCloseFrame,

    /// The close frame carried 1005, 1006 or 1015.
    #[error("Received a broken close frame containing a reserved status code.")]
    ReservedCloseCode(u16),

    /// The close frame reason was not valid UTF-8.
    #[error("Received a broken close frame containing an invalid UTF-8 reason.")]
    InvalidCloseReason,

    /// Compression or decompression of a frame failed.
    #[error("{0}")]
    Compression(String),

    /// The opening handshake response never arrived in full.
    #[error("Connection closed before the opening handshake completed")]
    IncompleteHandshake,
}

/// Indicates the specific type/cause of a subprotocol header error.
#[derive(Error, Clone, PartialEq, Eq, Debug, Copy)]
pub enum SubProtocolError {
    /// Subprotocols were requested but the server picked none
    #[error("Sent non-empty 'Sec-WebSocket-Protocol' header but no response was received")]
    NoSubProtocol,

    /// The server sent a subprotocol to a client handshake request but none was requested
    #[error("Server sent a subprotocol but none was requested")]
    ServerSentSubProtocolNoneRequested,

    /// The server sent an invalid subprotocol to a client handshake request
    #[error("Server sent an invalid subprotocol")]
    InvalidSubProtocol,
}

/// Failures while negotiating extensions from the `Sec-WebSocket-Extensions` response header.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NegotiationError {
    /// The header value could not be tokenized.
    #[error("Sec-WebSocket-Extensions header is invalid: {0}")]
    MalformedHeader(String),

    /// The server answered with extensions although none were offered.
    #[error("Received unexpected Sec-WebSocket-Extensions header")]
    UnexpectedHeader,

    /// The server accepted an extension that was never offered.
    #[error("Received unexpected extension: {0}")]
    UnexpectedExtension(String),

    /// The same extension was accepted twice.
    #[error("Received duplicate {0} response")]
    DuplicateResponse(String),

    /// A parameter appeared twice in one extension.
    #[error("Duplicate parameter: {0}")]
    DuplicateParameter(String),

    /// A parameter that must be a bare token carried a value, or the value was malformed.
    #[error("Received invalid {0} parameter")]
    InvalidParameter(&'static str),

    /// A parameter that requires a value had none.
    #[error("{0} parameter must have value")]
    MissingValue(&'static str),

    /// An unrecognized parameter was present.
    #[error("Received an unexpected permessage-deflate extension parameter")]
    UnexpectedParameter,
}

/// Indicates the specific type/cause of a capacity error.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CapacityError {
    /// Too many headers provided (see [`httparse::Error::TooManyHeaders`]).
    #[error("Too many headers received")]
    TooManyHeaders,

    /// Message is bigger than the maximum allowed size.
    #[error("Payload too large: {size} > {max}")]
    MessageTooLarge {
        /// The size of the message.
        size: usize,
        /// The maximum allowed message size.
        max: usize,
    },

    /// The receive buffer cannot grow any further.
    #[error("Ran out of memory while receiving WebSocket data.")]
    ReceiveBufferFull {
        /// Bytes that would be held after appending.
        size: usize,
        /// The configured ceiling.
        max: usize,
    },
}

/// Indicates the specific type/cause of URL error.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum UrlError {
    /// The URL failed to parse.
    #[error("The URL '{0}' is invalid.")]
    Invalid(String),

    /// The URL does not include a host name.
    #[error("Missing host name in URL")]
    MissingHost,

    /// Unsupported URL scheme used (only `ws://` or `wss://` may be used).
    #[error("The URL's scheme must be either 'ws' or 'wss'. '{0}' is not allowed.")]
    UnsupportedScheme(String),

    /// Fragment identifiers have no meaning for WebSocket URLs.
    #[error("The URL contains a fragment identifier ('{0}'). Fragment identifiers are not allowed in WebSocket URLs.")]
    Fragment(String),

    /// The port is on the blocked list.
    #[error("The port {0} is not allowed.")]
    BlockedPort(u16),
}

/// Failure to load a blob, carrying the file error code reported in diagnostics.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BlobError {
    /// No blob with that identifier.
    #[error("The blob could not be found")]
    NotFound,
    /// Access was refused.
    #[error("The blob may not be read")]
    Security,
    /// The data could not be read.
    #[error("The blob could not be read")]
    NotReadable,
}

impl BlobError {
    /// The numeric file error code.
    pub fn code(self) -> i32 {
        match self {
            BlobError::NotFound => 1,
            BlobError::Security => 2,
            BlobError::NotReadable => 4,
        }
    }
}

/// Errors raised synchronously at the consumer API boundary.
///
/// These never touch connection state. The variant names follow the exception
/// classes a script-facing WebSocket object would throw.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ApiError {
    /// Malformed argument (bad URL, subprotocol, reason too long, invalid text).
    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// Argument is well formed but not allowed (close code outside the permitted range).
    #[error("InvalidAccessError: {0}")]
    InvalidAccess(String),

    /// Operation is not valid in the current ready state.
    #[error("InvalidStateError: {0}")]
    InvalidState(String),

    /// Refused by the active security policy.
    #[error("SecurityError: {0}")]
    Security(String),
}

impl From<UrlError> for ApiError {
    fn from(value: UrlError) -> Self {
        match value {
            UrlError::BlockedPort(_) => ApiError::Security(value.to_string()),
            other => ApiError::Syntax(other.to_string()),
        }
    }
}
