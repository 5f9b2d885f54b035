//! Per-endpoint listener: socket ownership, prefix partitions, accept loop.
//!
//! # Responsibilities
//! - Own the one listening socket bound to one `(address, port)`
//! - Maintain the three prefix partitions under lock-free copy-on-write
//! - Track live connections and force-close them on shutdown
//! - Resolve the TLS server identity when the endpoint is secure
//!
//! # Design Decisions
//! - Partition writers read-copy-modify and compare-and-swap, retrying when
//!   another writer interleaved; readers only ever load a snapshot.
//! - The accept loop spawns the connection task immediately and re-arms, so
//!   a slow TLS handshake or client never stalls subsequent accepts.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use percent_encoding::percent_decode_str;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{ListenerSettings, TransportConfig};
use crate::endpoint::manager::EndpointManager;
use crate::error::Result;
use crate::listener::HttpListener;
use crate::net::connection::{self, ConnectionId, ConnectionSet};
use crate::net::tls;
use crate::prefix::UriPrefix;

/// One registered prefix together with its owning listener.
#[derive(Clone)]
pub(crate) struct PrefixEntry {
    pub prefix: UriPrefix,
    pub owner: Arc<HttpListener>,
}

type Partition = ArcSwap<Vec<PrefixEntry>>;

/// Owns the listening socket for one endpoint and routes requests against
/// its prefix partitions.
pub struct EndpointListener {
    endpoint: SocketAddr,
    secure: bool,
    tls: Option<TlsAcceptor>,
    /// Exact-host prefixes.
    exact: Partition,
    /// Host `+`: any host.
    all: Partition,
    /// Host `*`: unhandled, matched last.
    unhandled: Partition,
    connections: Arc<ConnectionSet>,
    manager: Weak<EndpointManager>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    read_timeout: Duration,
}

impl EndpointListener {
    /// Bind the endpoint socket, resolve the TLS identity when secure, and
    /// start the accept loop. Must run inside a Tokio runtime.
    pub(crate) fn build(
        endpoint: SocketAddr,
        secure: bool,
        settings: &ListenerSettings,
        config: &TransportConfig,
        manager: &Arc<EndpointManager>,
    ) -> Result<Arc<Self>> {
        let tls = if secure {
            Some(tls::resolve_server_identity(
                endpoint.port(),
                settings.cert_folder.as_deref(),
                settings.tls_identity.as_ref(),
            )?)
        } else {
            None
        };

        let socket = bind_socket(endpoint, settings.reuse_address, config.accept_backlog)?;
        let listener = TcpListener::from_std(socket)?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            address = %local_addr,
            secure,
            backlog = config.accept_backlog,
            "Endpoint listener bound"
        );

        let this = Arc::new(Self {
            endpoint: local_addr,
            secure,
            tls,
            exact: ArcSwap::from_pointee(Vec::new()),
            all: ArcSwap::from_pointee(Vec::new()),
            unhandled: ArcSwap::from_pointee(Vec::new()),
            connections: Arc::new(ConnectionSet::new()),
            manager: Arc::downgrade(manager),
            accept_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            read_timeout: Duration::from_millis(config.header_read_timeout_ms),
        });

        let task = tokio::spawn(accept_loop(this.clone(), listener));
        *this.accept_task.lock().unwrap() = Some(task);

        Ok(this)
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub(crate) fn tls_acceptor(&self) -> Option<&TlsAcceptor> {
        self.tls.as_ref()
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub(crate) fn connections(&self) -> Arc<ConnectionSet> {
        self.connections.clone()
    }

    /// Number of live tracked connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Register a prefix. Wildcard hosts go to their partition keyed by
    /// path; exact hosts conflict with an equal prefix owned by a different
    /// listener and are idempotent for the same owner.
    pub(crate) fn add_prefix(&self, prefix: UriPrefix, owner: Arc<HttpListener>) -> Result<()> {
        let entry = PrefixEntry { prefix, owner };

        match entry.prefix.host() {
            "*" => add_special(&self.unhandled, entry),
            "+" => add_special(&self.all, entry),
            _ => self.add_exact(entry),
        }
    }

    fn add_exact(&self, entry: PrefixEntry) -> Result<()> {
        loop {
            let current = self.exact.load_full();

            if let Some(existing) = current.iter().find(|e| e.prefix == entry.prefix) {
                if Arc::ptr_eq(&existing.owner, &entry.owner) {
                    // Idempotent re-add by the same owner.
                    return Ok(());
                }

                return Err(crate::error::Error::PrefixConflict(
                    entry.prefix.to_string(),
                ));
            }

            let mut future = Vec::with_capacity(current.len() + 1);
            future.extend(current.iter().cloned());
            future.push(entry.clone());

            let previous = self.exact.compare_and_swap(&current, Arc::new(future));
            if Arc::ptr_eq(&previous, &current) {
                return Ok(());
            }
            // Another writer interleaved; retry the read-modify-write.
        }
    }

    /// Remove a prefix from its partition. Removing an unknown prefix is a
    /// no-op. When every partition ends up empty, the listener closes
    /// itself.
    pub(crate) fn remove_prefix(&self, prefix: &UriPrefix) {
        match prefix.host() {
            "*" => {
                remove_special(&self.unhandled, prefix);
            }
            "+" => {
                remove_special(&self.all, prefix);
            }
            _ => loop {
                let current = self.exact.load_full();

                let Some(index) = current.iter().position(|e| e.prefix == *prefix) else {
                    break;
                };

                let mut future: Vec<PrefixEntry> = current.iter().cloned().collect();
                future.remove(index);

                let previous = self.exact.compare_and_swap(&current, Arc::new(future));
                if Arc::ptr_eq(&previous, &current) {
                    break;
                }
            },
        }

        self.leave_if_no_prefix();
    }

    fn leave_if_no_prefix(&self) {
        if !self.exact.load().is_empty() {
            return;
        }
        if !self.all.load().is_empty() {
            return;
        }
        if !self.unhandled.load().is_empty() {
            return;
        }

        self.close();
    }

    /// Close the listening socket, force-close every tracked connection and
    /// deregister from the manager.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Aborting the accept task drops the TcpListener, which closes the
        // listening socket.
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }

        self.connections.abort_all();

        if let Some(manager) = self.manager.upgrade() {
            manager.remove_endpoint(self.endpoint);
        }

        tracing::info!(address = %self.endpoint, "Endpoint listener closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Match a request URI against the partitions: exact-host first, then
    /// `+`, then `*`. Within a group the longest path prefix wins; ties keep
    /// the first entry found at that length.
    pub fn try_search_http_listener(&self, uri: &Url) -> Option<Arc<HttpListener>> {
        let host = uri.host_str().unwrap_or_default();
        let dns = is_dns_name(host);
        let port = uri.port_or_known_default()?;

        let mut path = percent_decode_str(uri.path())
            .decode_utf8_lossy()
            .into_owned();
        if !path.ends_with('/') {
            path.push('/');
        }

        if !host.is_empty() {
            let entries = self.exact.load();
            let mut best_len = 0usize;
            let mut found: Option<Arc<HttpListener>> = None;

            for entry in entries.iter() {
                if dns {
                    let prefix_host = entry.prefix.host();
                    if is_dns_name(prefix_host) && prefix_host != host {
                        continue;
                    }
                }

                if entry.prefix.port_number() != Some(port) {
                    continue;
                }

                let prefix_path = entry.prefix.path();
                if found.is_some() && prefix_path.len() <= best_len {
                    continue;
                }

                if path.starts_with(prefix_path) {
                    best_len = prefix_path.len();
                    found = Some(entry.owner.clone());
                }
            }

            if found.is_some() {
                return found;
            }
        }

        search_special(&self.all, &path).or_else(|| search_special(&self.unhandled, &path))
    }
}

/// Copy-on-write insert into a wildcard partition; entries conflict on path.
fn add_special(partition: &Partition, entry: PrefixEntry) -> Result<()> {
    loop {
        let current = partition.load_full();

        if current
            .iter()
            .any(|e| e.prefix.path() == entry.prefix.path())
        {
            return Err(crate::error::Error::PrefixConflict(
                entry.prefix.to_string(),
            ));
        }

        let mut future = Vec::with_capacity(current.len() + 1);
        future.extend(current.iter().cloned());
        future.push(entry.clone());

        let previous = partition.compare_and_swap(&current, Arc::new(future));
        if Arc::ptr_eq(&previous, &current) {
            return Ok(());
        }
    }
}

/// Copy-on-write removal from a wildcard partition, keyed by path.
fn remove_special(partition: &Partition, prefix: &UriPrefix) -> bool {
    loop {
        let current = partition.load_full();

        let Some(index) = current.iter().position(|e| e.prefix.path() == prefix.path()) else {
            return false;
        };

        let mut future: Vec<PrefixEntry> = current.iter().cloned().collect();
        future.remove(index);

        let previous = partition.compare_and_swap(&current, Arc::new(future));
        if Arc::ptr_eq(&previous, &current) {
            return true;
        }
    }
}

/// Longest-path-prefix search within one wildcard partition.
fn search_special(partition: &Partition, path: &str) -> Option<Arc<HttpListener>> {
    let entries = partition.load();
    let mut best_len = 0usize;
    let mut found: Option<Arc<HttpListener>> = None;

    for entry in entries.iter() {
        let prefix_path = entry.prefix.path();

        if found.is_some() && prefix_path.len() <= best_len {
            continue;
        }

        if path.starts_with(prefix_path) {
            best_len = prefix_path.len();
            found = Some(entry.owner.clone());
        }
    }

    found
}

/// A host that is a name rather than an IP literal or wildcard marker.
fn is_dns_name(host: &str) -> bool {
    !host.is_empty() && host != "*" && host != "+" && host.parse::<std::net::IpAddr>().is_err()
}

fn bind_socket(
    endpoint: SocketAddr,
    reuse_address: bool,
    backlog: i32,
) -> std::io::Result<std::net::TcpListener> {
    let domain = if endpoint.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if reuse_address {
        socket.set_reuse_address(true)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&endpoint.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Accept connections until the socket closes. Accepted sockets are handed
/// to their own task immediately so the loop never waits on a connection.
async fn accept_loop(listener: Arc<EndpointListener>, socket: TcpListener) {
    loop {
        match socket.accept().await {
            Ok((stream, peer_addr)) => {
                let id = ConnectionId::new();

                tracing::trace!(connection_id = %id, peer_addr = %peer_addr, "Connection accepted");

                let cancel = CancellationToken::new();
                let task = tokio::spawn(connection::serve_connection(
                    listener.clone(),
                    stream,
                    peer_addr,
                    id,
                    cancel.clone(),
                ));
                listener.connections.insert(id, task.abort_handle(), cancel);

                // The task may have finished (and tried to deregister)
                // before the insert above landed.
                if task.is_finished() {
                    listener.connections.remove(id);
                }
            }
            Err(e) => {
                if listener.is_closed() {
                    return;
                }

                tracing::warn!(address = %listener.endpoint, error = %e, "Accept failed");
            }
        }
    }
}
