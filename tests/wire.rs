//! End-to-end tests over live loopback sockets.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;
use ws_transport::{
    EndpointManager, HttpRequest, ResponseHead, TransportConfig,
};

mod common;

#[tokio::test]
async fn request_is_parsed_and_answered() {
    let manager = common::manager();
    let port = common::free_port();
    let owner = common::listener();

    manager
        .add_prefix(&format!("http://localhost:{}/app/", port), &owner)
        .unwrap();

    let server = {
        let owner = owner.clone();
        tokio::spawn(async move {
            let context = owner.accept().await.unwrap();
            assert_eq!(context.request().method(), "GET");
            assert_eq!(context.request().target(), "/app/page");
            assert!(!context.is_secure());

            let mut head = ResponseHead::new(200, "OK");
            head.content_length = Some(5);
            head.headers.set("Connection", "close");

            let mut response = context.respond(head);
            response.write(b"hello").unwrap();
            assert!(response.close(false).await.unwrap());
        })
    };

    let request = format!(
        "GET /app/page HTTP/1.1\r\nHost: localhost:{}\r\n\r\n",
        port
    );
    let wire = common::exchange(port, request.as_bytes()).await;
    server.await.unwrap();

    let text = String::from_utf8(wire).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(text.ends_with("\r\n\r\nhello"));
}

#[tokio::test]
async fn unmatched_path_gets_404() {
    let manager = common::manager();
    let port = common::free_port();
    let owner = common::listener();

    manager
        .add_prefix(&format!("http://localhost:{}/app/", port), &owner)
        .unwrap();

    let request = format!(
        "GET /elsewhere HTTP/1.1\r\nHost: localhost:{}\r\n\r\n",
        port
    );
    let wire = common::exchange(port, request.as_bytes()).await;

    let text = String::from_utf8(wire).unwrap();
    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(text.contains("Connection: close\r\n"));
}

#[tokio::test]
async fn header_deadline_closes_silent_connections() {
    ws_transport::observability::init_tracing();
    let manager = EndpointManager::new(TransportConfig {
        header_read_timeout_ms: 200,
        ..TransportConfig::default()
    });

    let port = common::free_port();
    let owner = common::listener();
    manager
        .add_prefix(&format!("http://localhost:{}/", port), &owner)
        .unwrap();

    // An incomplete header block that never reaches its terminator.
    let mut stream = TcpStream::connect(common::endpoint(port)).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

    let started = std::time::Instant::now();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();

    // Closed without any response bytes once the deadline passed.
    assert!(rest.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn chunked_response_streams_over_the_wire() {
    let manager = common::manager();
    let port = common::free_port();
    let owner = common::listener();

    manager
        .add_prefix(&format!("http://localhost:{}/stream/", port), &owner)
        .unwrap();

    let server = {
        let owner = owner.clone();
        tokio::spawn(async move {
            let context = owner.accept().await.unwrap();

            let mut head = ResponseHead::new(200, "OK");
            head.send_chunked = true;

            let mut response = context.respond(head);
            response.write(b"abc").unwrap();
            assert!(response.flush().await.unwrap());
            response.write(b"defg").unwrap();
            assert!(response.close(false).await.unwrap());
        })
    };

    let request = format!(
        "GET /stream/ HTTP/1.1\r\nHost: localhost:{}\r\n\r\n",
        port
    );
    let wire = common::exchange(port, request.as_bytes()).await;
    server.await.unwrap();

    let text = String::from_utf8(wire).unwrap();
    assert!(text.contains("Transfer-Encoding: chunked\r\n"));
    let (_, body) = text.split_once("\r\n\r\n").unwrap();
    assert_eq!(body, "3\r\nabc\r\n4\r\ndefg\r\n0\r\n\r\n");
}

#[tokio::test]
async fn upgrade_handoff_keeps_the_raw_stream() {
    let manager = common::manager();
    let port = common::free_port();
    let owner = common::listener();

    manager
        .add_prefix(&format!("ws://localhost:{}/ws/", port), &owner)
        .unwrap();
    let endpoint = manager.lookup(common::endpoint(port)).unwrap();

    let server = {
        let owner = owner.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            let context = owner.accept().await.unwrap();
            assert!(context.request().is_websocket_request());

            let (_request, mut stream) = context.into_stream();

            // The handed-off connection is still tracked by its endpoint.
            assert_eq!(endpoint.connection_count(), 1);

            stream
                .write_all(
                    b"HTTP/1.1 101 Switching Protocols\r\n\
                      Upgrade: websocket\r\n\
                      Connection: Upgrade\r\n\r\n",
                )
                .await
                .unwrap();

            let mut payload = [0u8; 4];
            stream.read_exact(&mut payload).await.unwrap();
            stream.write_all(&payload).await.unwrap();
            stream.flush().await.unwrap();
        })
    };

    let url = Url::parse(&format!("ws://localhost:{}/ws/", port)).unwrap();
    let handshake = HttpRequest::websocket_handshake(&url).to_bytes();

    let mut stream = TcpStream::connect(common::endpoint(port)).await.unwrap();
    stream.write_all(&handshake).await.unwrap();
    stream.write_all(b"ping").await.unwrap();

    let mut wire = Vec::new();
    stream.read_to_end(&mut wire).await.unwrap();
    server.await.unwrap();

    let text = String::from_utf8(wire).unwrap();
    assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(text.ends_with("ping"));

    // Dropping the stream released the tracking entry.
    assert_eq!(endpoint.connection_count(), 0);
}

#[tokio::test]
async fn closing_endpoint_severs_handed_off_connections() {
    let manager = common::manager();
    let port = common::free_port();
    let owner = common::listener();
    let uri = format!("ws://localhost:{}/ws/", port);

    manager.add_prefix(&uri, &owner).unwrap();
    let endpoint = manager.lookup(common::endpoint(port)).unwrap();

    const UPGRADE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\r\n";

    let server = {
        let owner = owner.clone();
        tokio::spawn(async move {
            let context = owner.accept().await.unwrap();
            let (_request, mut stream) = context.into_stream();

            stream.write_all(UPGRADE).await.unwrap();
            stream.flush().await.unwrap();

            // The endpoint closes while this read is pending; the stream
            // must fail rather than keep serving bytes.
            let mut payload = [0u8; 4];
            let err = stream.read_exact(&mut payload).await.unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::ConnectionAborted);
        })
    };

    let url = Url::parse(&uri).unwrap();
    let handshake = HttpRequest::websocket_handshake(&url).to_bytes();

    let mut stream = TcpStream::connect(common::endpoint(port)).await.unwrap();
    stream.write_all(&handshake).await.unwrap();

    let mut accepted = vec![0u8; UPGRADE.len()];
    stream.read_exact(&mut accepted).await.unwrap();
    assert_eq!(accepted, UPGRADE);

    // Tearing down the last prefix closes the endpoint and must sever the
    // connection that was already handed off.
    manager.remove_prefix(&uri, &owner);
    assert!(endpoint.is_closed());

    // The server side may already have torn the socket down, so the write
    // and the final read are allowed to fail; what matters is that no echo
    // ever comes back.
    let _ = stream.write_all(b"ping").await;

    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest).await;
    server.await.unwrap();

    assert!(!rest.ends_with(b"ping"));
}

#[tokio::test]
async fn request_body_is_read_before_handoff() {
    let manager = common::manager();
    let port = common::free_port();
    let owner = common::listener();

    manager
        .add_prefix(&format!("http://localhost:{}/submit/", port), &owner)
        .unwrap();

    let server = {
        let owner = owner.clone();
        tokio::spawn(async move {
            let context = owner.accept().await.unwrap();
            assert_eq!(context.request().body(), Some(&b"name=value"[..]));

            let mut head = ResponseHead::new(204, "No Content");
            head.content_length = Some(0);
            head.headers.set("Connection", "close");
            assert!(context.respond(head).close(false).await.unwrap());
        })
    };

    let request = format!(
        "POST /submit/ HTTP/1.1\r\nHost: localhost:{}\r\nContent-Length: 10\r\n\r\nname=value",
        port
    );
    let wire = common::exchange(port, request.as_bytes()).await;
    server.await.unwrap();

    let text = String::from_utf8(wire).unwrap();
    assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
}
