//! Error types for the transport engine.
//!
//! # Design Decisions
//! - Registration errors (prefixes, certificates) surface synchronously to the
//!   caller; per-connection errors never cross connection boundaries.
//! - Protocol violations keep their own variants so callers can distinguish
//!   them from transport faults; unclassified I/O faults during a message read
//!   are wrapped in `MessageReadFailed`.

use thiserror::Error;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The URI prefix could not be parsed, or names an invalid port, a path
    /// containing `%` or `//`, or a host that does not resolve to a loopback
    /// or unspecified address. Concrete interface addresses are not accepted
    /// as bind targets.
    #[error("invalid URI prefix: {0}")]
    InvalidPrefix(String),

    /// The prefix is already in use by another listener, or the endpoint is
    /// already bound with a different secure flag.
    #[error("the prefix is already in use: {0}")]
    PrefixConflict(String),

    /// No server certificate could be found for a secure endpoint.
    #[error("no server certificate could be found for port {0}")]
    CertificateNotFound(u16),

    /// The header block exceeded the maximum length before the terminator.
    #[error("the length of the header is greater than the max length")]
    HeaderTooLong,

    /// The stream ended before the header terminator was seen.
    #[error("the header could not be read from the data stream")]
    UnexpectedEof,

    /// The `Content-Length` value is non-numeric or negative.
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    /// The request line does not consist of exactly three tokens.
    #[error("invalid request line: {0:?}")]
    MalformedRequestLine(String),

    /// The status line could not be parsed.
    #[error("invalid status line: {0:?}")]
    MalformedStatusLine(String),

    /// The message read deadline expired.
    #[error("a timeout has occurred while reading a message")]
    Timeout,

    /// An I/O fault occurred while reading a message.
    #[error("an error has occurred while reading a message")]
    MessageReadFailed(#[source] std::io::Error),

    /// The serialized response header section exceeded the maximum length.
    #[error("the length of the header section is greater than the max length")]
    HeaderSectionTooLong,

    /// The response stream was already disposed.
    #[error("the response stream is disposed")]
    StreamDisposed,

    /// The operation is not supported on a write-only stream.
    #[error("the operation is not supported")]
    UnsupportedOperation,

    /// An I/O fault outside of message reading.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
