//! Shared helpers for transport integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use ws_transport::{EndpointManager, HttpListener, ListenerSettings, TransportConfig};

pub fn init() {
    ws_transport::observability::init_tracing();
}

pub fn manager() -> Arc<EndpointManager> {
    init();
    EndpointManager::new(TransportConfig::default())
}

pub fn listener() -> Arc<HttpListener> {
    HttpListener::new(ListenerSettings::default())
}

/// An ephemeral port that was free a moment ago. Tests bind it right away,
/// so collisions are unlikely enough.
pub fn free_port() -> u16 {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

pub fn endpoint(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Send raw bytes to the endpoint and read until the server closes.
pub async fn exchange(port: u16, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(endpoint(port)).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}
