//! HTTP request message.
//!
//! # Responsibilities
//! - Parse a request line plus headers into an immutable message
//! - Detect WebSocket upgrade requests
//! - Build client-side handshake requests (GET upgrade, CONNECT)

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::error::{Error, Result};
use crate::http::headers::Headers;
use crate::http::message::{self, HttpMessage, Version};
use crate::http::response::HttpResponse;

const USER_AGENT: &str = concat!("ws-transport/", env!("CARGO_PKG_VERSION"));

/// An HTTP request: method, target, version, headers and optional body.
///
/// Immutable once parsed; the decoded body text and cookie list are derived
/// views computed on demand.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: String,
    target: String,
    version: Version,
    headers: Headers,
    body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: &str, target: &str) -> Self {
        let mut headers = Headers::new();
        headers.set("User-Agent", USER_AGENT);

        Self {
            method: method.to_string(),
            target: target.to_string(),
            version: Version::HTTP_1_1,
            headers,
            body: None,
        }
    }

    /// A WebSocket opening-handshake request for the given URL.
    pub fn websocket_handshake(target: &Url) -> Self {
        let mut request = Self::new("GET", &path_and_query(target));

        let host = target.host_str().unwrap_or_default();
        let port = target.port_or_known_default().unwrap_or(80);
        let default_port = matches!(
            (target.scheme(), port),
            ("ws", 80) | ("http", 80) | ("wss", 443) | ("https", 443)
        );

        let host_value = if default_port {
            host.to_string()
        } else {
            format!("{}:{}", host, port)
        };

        request.headers.set("Host", &host_value);
        request.headers.set("Upgrade", "websocket");
        request.headers.set("Connection", "Upgrade");

        request
    }

    /// A CONNECT request for tunneling through a proxy to the given URL.
    pub fn connect(target: &Url) -> Self {
        let host = target.host_str().unwrap_or_default();
        let port = target.port_or_known_default().unwrap_or(80);
        let authority = format!("{}:{}", host, port);

        let mut request = Self::new("CONNECT", &authority);
        let host_value = if port != 80 { authority } else { host.to_string() };
        request.headers.set("Host", &host_value);

        request
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
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

    /// Name/value pairs parsed from the `Cookie` header.
    pub fn cookies(&self) -> Vec<(String, String)> {
        let Some(value) = self.headers.get("Cookie") else {
            return Vec::new();
        };

        value
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    /// True for a `GET` request newer than HTTP/1.0 whose `Connection` and
    /// `Upgrade` headers request an upgrade to `websocket`.
    pub fn is_websocket_request(&self) -> bool {
        self.method == "GET"
            && self.version > Version::HTTP_1_0
            && self.headers.contains_token("Connection", "upgrade")
            && self.headers.contains_token("Upgrade", "websocket")
    }

    pub(crate) fn request_line(&self) -> String {
        format!(
            "{} {} HTTP/{}\r\n",
            self.method, self.target, self.version
        )
    }

    /// Parse a header block: the request line (exactly three space-separated
    /// tokens) followed by header lines.
    pub fn parse(lines: &[String]) -> Result<Self> {
        let request_line = lines
            .first()
            .ok_or_else(|| Error::MalformedRequestLine(String::new()))?;

        let parts: Vec<&str> = request_line.split(' ').collect();
        if parts.len() != 3 {
            return Err(Error::MalformedRequestLine(request_line.clone()));
        }

        let version = message::parse_http_version(parts[2])
            .ok_or_else(|| Error::MalformedRequestLine(request_line.clone()))?;

        let mut headers = Headers::new();
        for line in &lines[1..] {
            headers.parse_line(line)?;
        }

        Ok(Self {
            method: parts[0].to_string(),
            target: parts[1].to_string(),
            version,
            headers,
            body: None,
        })
    }

    /// Read one request from the stream, bounded by `timeout`.
    pub async fn read_request<R>(stream: &mut R, timeout: Duration) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        message::read_message(stream, Self::parse, timeout).await
    }

    /// Serialize to the exact wire bytes: request line, headers, blank line,
    /// body when present.
    pub fn to_bytes(&self) -> Vec<u8> {
        message::serialize_message(&self.request_line(), &self.headers, self.body.as_deref())
    }

    /// Write this request and read the response, bounded by `timeout`.
    pub async fn get_response<S>(&self, stream: &mut S, timeout: Duration) -> Result<HttpResponse>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(&self.to_bytes()).await?;
        stream.flush().await?;

        HttpResponse::read_response(stream, timeout).await
    }
}

impl HttpMessage for HttpRequest {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn set_body(&mut self, body: Vec<u8>) {
        self.body = Some(body);
    }
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_request_line() {
        let request =
            HttpRequest::parse(&lines(&["GET /chat HTTP/1.1", "Host: localhost"])).unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.target(), "/chat");
        assert_eq!(request.version(), Version::HTTP_1_1);
        assert_eq!(request.headers().get("Host"), Some("localhost"));
    }

    #[test]
    fn rejects_wrong_token_count() {
        assert!(matches!(
            HttpRequest::parse(&lines(&["GET /chat"])).unwrap_err(),
            Error::MalformedRequestLine(_)
        ));
        assert!(matches!(
            HttpRequest::parse(&lines(&["GET /chat HTTP/1.1 extra"])).unwrap_err(),
            Error::MalformedRequestLine(_)
        ));
        assert!(matches!(
            HttpRequest::parse(&[]).unwrap_err(),
            Error::MalformedRequestLine(_)
        ));
    }

    #[test]
    fn websocket_detection() {
        let mut request = HttpRequest::parse(&lines(&[
            "GET /chat HTTP/1.1",
            "Connection: keep-alive, Upgrade",
            "Upgrade: websocket",
        ]))
        .unwrap();
        assert!(request.is_websocket_request());

        // Wrong method.
        request = HttpRequest::parse(&lines(&[
            "POST /chat HTTP/1.1",
            "Connection: Upgrade",
            "Upgrade: websocket",
        ]))
        .unwrap();
        assert!(!request.is_websocket_request());

        // Too old a protocol version.
        request = HttpRequest::parse(&lines(&[
            "GET /chat HTTP/1.0",
            "Connection: Upgrade",
            "Upgrade: websocket",
        ]))
        .unwrap();
        assert!(!request.is_websocket_request());
    }

    #[test]
    fn handshake_request_headers() {
        let url = Url::parse("ws://example.com:9090/chat?room=1").unwrap();
        let request = HttpRequest::websocket_handshake(&url);
        assert_eq!(request.method(), "GET");
        assert_eq!(request.target(), "/chat?room=1");
        assert_eq!(request.headers().get("Host"), Some("example.com:9090"));
        assert_eq!(request.headers().get("Upgrade"), Some("websocket"));

        let url = Url::parse("ws://example.com/chat").unwrap();
        let request = HttpRequest::websocket_handshake(&url);
        assert_eq!(request.headers().get("Host"), Some("example.com"));
    }

    #[test]
    fn cookie_view() {
        let request = HttpRequest::parse(&lines(&[
            "GET / HTTP/1.1",
            "Cookie: session=abc; theme=dark",
        ]))
        .unwrap();
        assert_eq!(
            request.cookies(),
            vec![
                ("session".to_string(), "abc".to_string()),
                ("theme".to_string(), "dark".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn round_trip_through_reader() {
        let mut original = HttpRequest::new("POST", "/submit");
        original.headers_mut().set("Host", "localhost:8080");
        original.headers_mut().set("Content-Length", "5");
        original.set_body(b"hello".to_vec());

        let bytes = original.to_bytes();
        let mut stream = Cursor::new(bytes);
        let parsed = HttpRequest::read_request(&mut stream, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(parsed.method(), original.method());
        assert_eq!(parsed.target(), original.target());
        assert_eq!(parsed.version(), original.version());
        assert_eq!(parsed.headers(), original.headers());
        assert_eq!(parsed.body(), Some(&b"hello"[..]));
    }
}
