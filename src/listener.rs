//! The application-facing listener surface.
//!
//! # Responsibilities
//! - Hold a listener's settings and declared URI prefixes
//! - Receive routed requests from the endpoint accept path
//! - Hand each request to the application with its live connection
//!
//! # Design Decisions
//! - Routed requests flow through an unbounded channel; the accept path
//!   never blocks on a slow application.
//! - The connection stays tracked until the handed-off stream drops, so a
//!   closing endpoint can still force-close in-flight upgrades.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::config::ListenerSettings;
use crate::http::{HttpRequest, ResponseHead, ResponseStream};
use crate::net::connection::{AsyncStream, ConnectionGuard};

/// A listener an application registers prefixes for and accepts requests
/// from.
///
/// An `HttpListener` owns no socket. Sockets belong to endpoint listeners,
/// which fan matched requests out to the owning `HttpListener` by prefix.
pub struct HttpListener {
    settings: ListenerSettings,
    prefixes: Mutex<Vec<String>>,
    incoming_tx: UnboundedSender<RequestContext>,
    incoming_rx: tokio::sync::Mutex<UnboundedReceiver<RequestContext>>,
}

impl HttpListener {
    pub fn new(settings: ListenerSettings) -> Arc<Self> {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            settings,
            prefixes: Mutex::new(Vec::new()),
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
        })
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    /// Declare a prefix locally without registering it. Used together with
    /// bulk registration; duplicates are ignored.
    pub fn add_prefix(&self, uri: &str) {
        let mut prefixes = self.prefixes.lock().unwrap();

        if !prefixes.iter().any(|p| p == uri) {
            prefixes.push(uri.to_string());
        }
    }

    /// The prefixes currently declared on this listener.
    pub fn prefixes(&self) -> Vec<String> {
        self.prefixes.lock().unwrap().clone()
    }

    pub(crate) fn record_prefix(&self, uri: &str) {
        self.add_prefix(uri);
    }

    pub(crate) fn forget_prefix(&self, uri: &str) {
        self.prefixes.lock().unwrap().retain(|p| p != uri);
    }

    /// Queue a routed request for the application.
    pub(crate) fn deliver(&self, context: RequestContext) {
        if self.incoming_tx.send(context).is_err() {
            tracing::debug!("Routed request dropped, listener receiver gone");
        }
    }

    /// Wait for the next routed request. Returns `None` only if the
    /// listener's sender side has been torn down.
    pub async fn accept(&self) -> Option<RequestContext> {
        self.incoming_rx.lock().await.recv().await
    }
}

impl std::fmt::Debug for HttpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpListener")
            .field("prefixes", &self.prefixes())
            .finish_non_exhaustive()
    }
}

/// A routed request together with the connection it arrived on.
///
/// The application either responds over `respond` or takes the raw stream
/// with `into_stream` to run a protocol upgrade on it.
pub struct RequestContext {
    request: HttpRequest,
    peer_addr: SocketAddr,
    secure: bool,
    stream: GuardedStream,
}

impl RequestContext {
    pub(crate) fn new(
        request: HttpRequest,
        peer_addr: SocketAddr,
        secure: bool,
        stream: Box<dyn AsyncStream>,
        guard: ConnectionGuard,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request,
            peer_addr,
            secure,
            stream: GuardedStream {
                inner: stream,
                _guard: guard,
                severed: false,
                cancelled: Box::pin(cancel.cancelled_owned()),
            },
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// True when the request arrived over TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Begin a response on this connection.
    pub fn respond(self, head: ResponseHead) -> ResponseStream<GuardedStream> {
        ResponseStream::new(self.stream, head)
    }

    /// Take the connection stream, for protocol upgrades that leave HTTP
    /// behind. Returns the parsed request alongside it.
    pub fn into_stream(self) -> (HttpRequest, GuardedStream) {
        (self.request, self.stream)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("peer_addr", &self.peer_addr)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

/// A connection stream that keeps its endpoint-listener tracking entry
/// alive until dropped.
///
/// Every poll observes the endpoint's cancellation token first, so a
/// closing endpoint severs the stream even after handoff: pending reads
/// wake and every further operation fails with `ConnectionAborted`.
pub struct GuardedStream {
    inner: Box<dyn AsyncStream>,
    _guard: ConnectionGuard,
    severed: bool,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl GuardedStream {
    fn poll_severed(&mut self, cx: &mut Context<'_>) -> bool {
        if self.severed {
            return true;
        }

        if self.cancelled.as_mut().poll(cx).is_ready() {
            self.severed = true;
            return true;
        }

        false
    }

    fn severed_error() -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "endpoint listener closed",
        )
    }
}

impl AsyncRead for GuardedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.poll_severed(cx) {
            return Poll::Ready(Err(Self::severed_error()));
        }

        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for GuardedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if self.poll_severed(cx) {
            return Poll::Ready(Err(Self::severed_error()));
        }

        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if self.poll_severed(cx) {
            return Poll::Ready(Err(Self::severed_error()));
        }

        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if self.poll_severed(cx) {
            return Poll::Ready(Err(Self::severed_error()));
        }

        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
