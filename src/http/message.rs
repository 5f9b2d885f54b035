//! Shared message reading and serialization.
//!
//! # Responsibilities
//! - Timeout-bounded header-block scan (CR LF CR LF terminator, 8192 cap)
//! - RFC header folding (continuation lines joined with a single space)
//! - Length-delimited body reads with bounded per-read allocations
//!
//! # Design Decisions
//! - Bytes are consumed one at a time while scanning for the terminator, so
//!   the reader never swallows bytes that belong to the body.
//! - The whole read sequence runs under one `tokio::time::timeout`; the
//!   deadline expiring drops the in-flight read and reports `Timeout`.
//! - Protocol violations surface as their own error variants; unclassified
//!   I/O faults are wrapped as `MessageReadFailed`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::http::headers::Headers;

/// Maximum accepted length of a message header block, terminator included.
pub const MAX_MESSAGE_HEADER_LEN: usize = 8192;

/// Upper bound on a single body-read allocation.
const BODY_CHUNK_LEN: usize = 1024;

/// An HTTP protocol version, ordered so `1.1 > 1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_1_0: Version = Version { major: 1, minor: 0 };
    pub const HTTP_1_1: Version = Version { major: 1, minor: 1 };
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = ();

    // Accepts the bare "x.y" form, without the "HTTP/" marker.
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        let (major, minor) = s.split_once('.').ok_or(())?;
        Ok(Version {
            major: major.parse().map_err(|_| ())?,
            minor: minor.parse().map_err(|_| ())?,
        })
    }
}

/// Parse an `HTTP/x.y` token from a request or status line.
pub(crate) fn parse_http_version(token: &str) -> Option<Version> {
    token.strip_prefix("HTTP/")?.parse().ok()
}

/// A parsed HTTP message that the shared read path can attach a body to.
pub(crate) trait HttpMessage: Sized {
    fn headers(&self) -> &Headers;
    fn set_body(&mut self, body: Vec<u8>);
}

/// Read one message: header block, line parse, then a `Content-Length`
/// delimited body when one is declared. The whole sequence is bounded by
/// `timeout`.
pub(crate) async fn read_message<R, M, F>(stream: &mut R, parse: F, timeout: Duration) -> Result<M>
where
    R: AsyncRead + Unpin,
    M: HttpMessage,
    F: FnOnce(&[String]) -> Result<M>,
{
    match tokio::time::timeout(timeout, read_message_inner(stream, parse)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

async fn read_message_inner<R, M, F>(stream: &mut R, parse: F) -> Result<M>
where
    R: AsyncRead + Unpin,
    M: HttpMessage,
    F: FnOnce(&[String]) -> Result<M>,
{
    let lines = read_header_block(stream).await?;
    let mut message = parse(&lines)?;

    let content_length = message.headers().get("Content-Length").map(str::to_owned);

    if let Some(length) = content_length {
        if !length.is_empty() {
            if let Some(body) = read_message_body(stream, &length).await? {
                message.set_body(body);
            }
        }
    }

    Ok(message)
}

/// Scan the stream one byte at a time until CR LF CR LF, then decode, fold
/// continuation lines and split into header-line strings.
pub(crate) async fn read_header_block<R>(stream: &mut R) -> Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer: Vec<u8> = Vec::with_capacity(256);

    loop {
        let byte = stream.read_u8().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof
            } else {
                Error::MessageReadFailed(e)
            }
        })?;

        buffer.push(byte);

        if buffer.ends_with(b"\r\n\r\n") {
            break;
        }

        if buffer.len() >= MAX_MESSAGE_HEADER_LEN {
            return Err(Error::HeaderTooLong);
        }
    }

    let text = String::from_utf8_lossy(&buffer);
    let folded = text.replace("\r\n ", " ").replace("\r\n\t", " ");

    Ok(folded
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Read a body of the given declared length. Lengths above the chunk bound
/// are read in bounded slices. A stream that ends early yields a short read,
/// never fabricated bytes.
pub(crate) async fn read_message_body<R>(stream: &mut R, length: &str) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len: i64 = length
        .trim()
        .parse()
        .map_err(|_| Error::InvalidContentLength(length.to_string()))?;

    if len < 0 {
        return Err(Error::InvalidContentLength(length.to_string()));
    }

    if len == 0 {
        return Ok(None);
    }

    let total = len as usize;
    let mut body = Vec::with_capacity(total.min(BODY_CHUNK_LEN));
    let mut chunk = [0u8; BODY_CHUNK_LEN];
    let mut remaining = total;

    while remaining > 0 {
        let want = remaining.min(BODY_CHUNK_LEN);
        let n = stream
            .read(&mut chunk[..want])
            .await
            .map_err(Error::MessageReadFailed)?;

        if n == 0 {
            break;
        }

        body.extend_from_slice(&chunk[..n]);
        remaining -= n;
    }

    Ok(Some(body))
}

/// Serialize a start line, header block, blank line and optional body.
pub(crate) fn serialize_message(
    start_line: &str,
    headers: &Headers,
    body: Option<&[u8]>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(start_line.len() + 64);
    out.extend_from_slice(start_line.as_bytes());
    headers.write_block(&mut out);
    out.extend_from_slice(b"\r\n");

    if let Some(body) = body {
        out.extend_from_slice(body);
    }

    out
}
