//! Response output pipeline: staging buffer, header flush, body framing.
//!
//! # Responsibilities
//! - Stage body bytes until the header line can be finalized
//! - Emit the status line and header block exactly once per response
//! - Frame the body as chunked transfer encoding or raw fixed-length bytes
//!
//! # Design Decisions
//! - A fixed-length response whose declared `Content-Length` does not match
//!   the staged body is never sent; the flush reports failure and the caller
//!   closes the connection instead of emitting a wire-inconsistent message.
//! - The stream is write-only and single-use; reads, seeks and post-disposal
//!   operations fail with explicit errors.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::http::headers::Headers;
use crate::http::message::Version;

/// Maximum accepted length of the serialized response header section.
pub const MAX_HEADER_SECTION_LEN: usize = 32768;

const LAST_CHUNK: &[u8] = b"0\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

/// Slice length used when draining oversized staging buffers.
const DRAIN_SLICE_LEN: usize = 1024;

/// The response metadata a `ResponseStream` frames onto the wire.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub version: Version,
    pub headers: Headers,
    /// Declared body length; must match the staged bytes at header-flush
    /// time unless `send_chunked` is set.
    pub content_length: Option<u64>,
    /// Use chunked transfer encoding instead of a fixed length.
    pub send_chunked: bool,
}

impl ResponseHead {
    pub fn new(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            version: Version::HTTP_1_1,
            headers: Headers::new(),
            content_length: None,
            send_chunked: false,
        }
    }

    fn status_line(&self) -> String {
        format!("HTTP/{} {} {}\r\n", self.version, self.status, self.reason)
    }

    /// The finalized header block: status line, declared framing headers,
    /// every set header, blank line.
    fn header_block(&self) -> Vec<u8> {
        let mut headers = self.headers.clone();

        if self.send_chunked {
            headers.set("Transfer-Encoding", "chunked");
        } else if let Some(length) = self.content_length {
            headers.set("Content-Length", &length.to_string());
        }

        let mut block = Vec::with_capacity(256);
        block.extend_from_slice(self.status_line().as_bytes());
        headers.write_block(&mut block);
        block.extend_from_slice(CRLF);
        block
    }
}

/// Buffers an outgoing response body and frames it onto the wire on flush.
///
/// Headers are sent at most once per response. After a non-terminal flush a
/// fresh staging buffer replaces the drained one, so the producer can keep
/// streaming body data.
pub struct ResponseStream<W: AsyncWrite + Unpin> {
    inner: W,
    head: ResponseHead,
    buffer: Vec<u8>,
    headers_sent: bool,
    chunked: bool,
    close_connection: bool,
    disposed: bool,
}

impl<W: AsyncWrite + Unpin> ResponseStream<W> {
    pub fn new(inner: W, head: ResponseHead) -> Self {
        Self {
            inner,
            head,
            buffer: Vec::new(),
            headers_sent: false,
            chunked: false,
            close_connection: false,
            disposed: false,
        }
    }

    /// Stage body bytes. Nothing reaches the wire until a flush.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.disposed {
            return Err(Error::StreamDisposed);
        }

        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// This stream is write-only.
    pub fn read(&mut self, _buffer: &mut [u8]) -> Result<usize> {
        Err(Error::UnsupportedOperation)
    }

    /// This stream is write-only.
    pub fn seek(&mut self, _position: u64) -> Result<u64> {
        Err(Error::UnsupportedOperation)
    }

    /// True once the finalized `Connection` header or a failed graceful
    /// close marked this connection for closure.
    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Flush staged body data mid-response. Only meaningful in chunked mode;
    /// a fixed-length response stays staged until close so the length check
    /// can run.
    pub async fn flush(&mut self) -> Result<bool> {
        if self.disposed {
            return Err(Error::StreamDisposed);
        }

        if !self.chunked && !self.head.send_chunked {
            return Ok(true);
        }

        self.flush_buffered(false).await
    }

    /// Close the stream. A graceful close (`force == false`) attempts the
    /// terminal flush first; when that flush reports a header mismatch the
    /// connection is marked for forced closure instead. Returns `true` when
    /// the response went out complete and consistent.
    pub async fn close(&mut self, force: bool) -> Result<bool> {
        if self.disposed {
            return Err(Error::StreamDisposed);
        }

        self.disposed = true;

        if !force && self.flush_buffered(true).await? {
            return Ok(true);
        }

        // Forced or failed close: never send the staged body, but terminate
        // the chunked framing if it already started.
        self.close_connection = true;

        if self.chunked {
            let _ = self.inner.write_all(LAST_CHUNK).await;
            let _ = self.inner.flush().await;
        }

        self.buffer.clear();
        Ok(false)
    }

    /// Send headers (once) and drain the staging buffer. Returns `false`
    /// without writing anything when a fixed-length response's staged body
    /// does not match its declared length.
    async fn flush_buffered(&mut self, closing: bool) -> Result<bool> {
        if !self.headers_sent {
            if !self.head.send_chunked {
                let declared = self.head.content_length.unwrap_or(0);
                if declared != self.buffer.len() as u64 {
                    return Ok(false);
                }
            }

            let block = self.head.header_block();
            if block.len() > MAX_HEADER_SECTION_LEN {
                return Err(Error::HeaderSectionTooLong);
            }

            self.inner.write_all(&block).await?;
            self.headers_sent = true;
            self.chunked = self.head.send_chunked;

            if self
                .head
                .headers
                .get("Connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("close"))
            {
                self.close_connection = true;
            }
        }

        let body = std::mem::take(&mut self.buffer);

        if body.len() > i32::MAX as usize {
            // Drain huge buffers in bounded slices.
            for slice in body.chunks(DRAIN_SLICE_LEN) {
                self.write_body(slice).await?;
            }
        } else if !body.is_empty() {
            self.write_body(&body).await?;
        }

        if closing && self.chunked {
            self.inner.write_all(LAST_CHUNK).await?;
        }

        self.inner.flush().await?;
        Ok(true)
    }

    async fn write_body(&mut self, data: &[u8]) -> Result<()> {
        if self.chunked {
            let size = format!("{:x}\r\n", data.len());
            self.inner.write_all(size.as_bytes()).await?;
            self.inner.write_all(data).await?;
            self.inner.write_all(CRLF).await?;
        } else {
            self.inner.write_all(data).await?;
        }

        Ok(())
    }
}
