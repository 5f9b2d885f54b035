//! HTTP response message.
//!
//! The parsing side serves the client half of the WebSocket handshake; the
//! serialization side mirrors `HttpRequest`.

use std::time::Duration;

use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::http::headers::Headers;
use crate::http::message::{self, HttpMessage, Version};

/// An HTTP response: status, reason, version, headers and optional body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    reason: String,
    version: Version,
    headers: Headers,
    body: Option<Vec<u8>>,
}

impl HttpResponse {
    pub fn new(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            version: Version::HTTP_1_1,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// The body decoded as UTF-8 text; empty when there is no body.
    pub fn body_text(&self) -> String {
        match &self.body {
            Some(body) => String::from_utf8_lossy(body).into_owned(),
            None => String::new(),
        }
    }

    /// True when this response accepts a WebSocket upgrade.
    pub fn is_upgrade_response(&self) -> bool {
        self.status == 101
            && self.headers.contains_token("Connection", "upgrade")
            && self.headers.contains_token("Upgrade", "websocket")
    }

    pub(crate) fn status_line(&self) -> String {
        format!("HTTP/{} {} {}\r\n", self.version, self.status, self.reason)
    }

    /// Parse a header block: the status line followed by header lines.
    pub fn parse(lines: &[String]) -> Result<Self> {
        let status_line = lines
            .first()
            .ok_or_else(|| Error::MalformedStatusLine(String::new()))?;

        let malformed = || Error::MalformedStatusLine(status_line.clone());

        // "HTTP/x.y code reason"; the reason phrase may itself contain
        // spaces, or be absent.
        let mut parts = status_line.splitn(3, ' ');
        let version = parts
            .next()
            .and_then(message::parse_http_version)
            .ok_or_else(malformed)?;
        let status: u16 = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(malformed)?;
        let reason = parts.next().unwrap_or_default().to_string();

        let mut headers = Headers::new();
        for line in &lines[1..] {
            headers.parse_line(line)?;
        }

        Ok(Self {
            status,
            reason,
            version,
            headers,
            body: None,
        })
    }

    /// Read one response from the stream, bounded by `timeout`.
    pub async fn read_response<R>(stream: &mut R, timeout: Duration) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        message::read_message(stream, Self::parse, timeout).await
    }

    /// Serialize to the exact wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        message::serialize_message(&self.status_line(), &self.headers, self.body.as_deref())
    }
}

impl HttpMessage for HttpResponse {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn set_body(&mut self, body: Vec<u8>) {
        self.body = Some(body);
    }
}
