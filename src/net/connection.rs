//! Per-connection handling and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track live connections per endpoint listener for forced shutdown
//! - Run the TLS handshake, read the request, route it, hand it off
//!
//! # Design Decisions
//! - Parsing and I/O errors terminate only their own connection; the accept
//!   loop and sibling connections never observe them.
//! - An unrouted request is answered with a plain 404 and the connection is
//!   closed; once header parsing has failed, nothing is written back.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::endpoint::listener::EndpointListener;
use crate::http::{HttpRequest, ResponseHead, ResponseStream};
use crate::listener::RequestContext;

/// Global counter for connection IDs. Relaxed ordering is enough; only
/// uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A byte stream a connection runs over, plain TCP or TLS.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Handles for tearing one tracked connection down.
///
/// The abort handle covers the connection while its serve task owns it; the
/// cancellation token reaches the stream after handoff, when that task has
/// already finished.
#[derive(Debug)]
struct ConnectionHandle {
    abort: AbortHandle,
    cancel: CancellationToken,
}

/// The set of live connections owned by one endpoint listener.
///
/// Insertion happens on every accept and removal on every close, so the set
/// uses its own sharded map, independent of the prefix partitions.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    entries: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ConnectionId, abort: AbortHandle, cancel: CancellationToken) {
        self.entries.insert(id, ConnectionHandle { abort, cancel });
    }

    pub fn remove(&self, id: ConnectionId) {
        self.entries.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Force-close every tracked connection, without graceful flushes.
    /// Cancellation severs handed-off streams; the abort covers connections
    /// still inside their serve task.
    pub fn abort_all(&self) {
        let count = self.entries.len();

        for entry in self.entries.iter() {
            entry.value().cancel.cancel();
            entry.value().abort.abort();
        }

        self.entries.clear();

        if count > 0 {
            tracing::debug!(connections = count, "Forced connection shutdown");
        }
    }
}

/// Guard that removes a connection from its set when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    set: Arc<ConnectionSet>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn new(set: Arc<ConnectionSet>, id: ConnectionId) -> Self {
        Self { set, id }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.set.remove(self.id);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Serve one accepted socket: TLS handshake when secure, request read under
/// the configured deadline, prefix routing, then handoff or 404.
pub(crate) async fn serve_connection(
    listener: Arc<EndpointListener>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: ConnectionId,
    cancel: CancellationToken,
) {
    let guard = ConnectionGuard::new(listener.connections(), id);

    let mut stream: Box<dyn AsyncStream> = match listener.tls_acceptor() {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => Box::new(tls),
            Err(e) => {
                tracing::debug!(connection_id = %id, peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                return;
            }
        },
        None => Box::new(stream),
    };

    let request = match HttpRequest::read_request(&mut stream, listener.read_timeout()).await {
        Ok(request) => request,
        Err(e) => {
            // The client just sees a closed connection; no partial response
            // goes out once parsing has failed.
            tracing::debug!(connection_id = %id, peer_addr = %peer_addr, error = %e, "Request read failed");
            return;
        }
    };

    let url = match request_url(&listener, &request) {
        Some(url) => url,
        None => {
            tracing::debug!(connection_id = %id, target = request.target(), "Unparsable request target");
            return;
        }
    };

    match listener.try_search_http_listener(&url) {
        Some(owner) => {
            tracing::debug!(
                connection_id = %id,
                peer_addr = %peer_addr,
                path = url.path(),
                "Request routed"
            );

            owner.deliver(RequestContext::new(
                request,
                peer_addr,
                listener.is_secure(),
                stream,
                guard,
                cancel,
            ));
        }
        None => {
            tracing::debug!(connection_id = %id, path = url.path(), "No prefix matched");
            let _ = send_not_found(stream).await;
        }
    }
}

/// Build an absolute URL for routing from the request target and Host
/// header, falling back to the endpoint address.
fn request_url(listener: &EndpointListener, request: &HttpRequest) -> Option<Url> {
    let target = request.target();

    if target.starts_with("http://") || target.starts_with("https://") {
        return Url::parse(target).ok();
    }

    let scheme = if listener.is_secure() { "https" } else { "http" };
    let authority = match request.headers().get("Host") {
        Some(host) if host.contains(':') => host.to_string(),
        Some(host) => format!("{}:{}", host, listener.port()),
        None => listener.endpoint().to_string(),
    };

    Url::parse(&format!("{}://{}{}", scheme, authority, target)).ok()
}

async fn send_not_found(stream: Box<dyn AsyncStream>) -> crate::error::Result<()> {
    let mut head = ResponseHead::new(404, "Not Found");
    head.content_length = Some(0);
    head.headers.set("Connection", "close");

    let mut response = ResponseStream::new(stream, head);
    response.close(false).await?;
    Ok(())
}
