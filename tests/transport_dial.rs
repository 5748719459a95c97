//! Dialling through an HTTP `CONNECT` proxy and over TLS.

mod common;

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use common::{ConnectProxy, TestServer, WAIT};
use exchange_feed::config::TlsMode;
use exchange_feed::{ConnectionStatus, Error, StreamTransport};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite;

#[tokio::test]
async fn test_connects_through_proxy_tunnel() {
    let mut server = TestServer::start().await;
    let proxy = ConnectProxy::start("200 Connection established").await;
    let config = server.config().with_proxy_url(Some(proxy.url()));

    let transport = StreamTransport::new(config).unwrap();
    transport.connect().await.unwrap();
    let mut conn = server.next_conn().await;

    transport.send("via proxy").await.unwrap();
    assert_eq!(conn.next_text().await, "via proxy");
    conn.send("back");
    let frame = timeout(WAIT, transport.recv()).await.unwrap().unwrap();
    assert_eq!(frame.payload, b"back");

    let requests = proxy.requests();
    assert_eq!(requests.len(), 1);
    let target = server.addr.to_string();
    assert!(requests[0].starts_with(&format!("CONNECT {target} HTTP/1.1\r\n")));
    assert!(requests[0].contains(&format!("Host: {target}\r\n")));
    assert!(!requests[0].contains("Proxy-Authorization"));

    transport.close().await;
}

#[tokio::test]
async fn test_proxy_credentials_are_sent() {
    let mut server = TestServer::start().await;
    let proxy = ConnectProxy::start("200 OK").await;
    let url = format!("http://alice:s3cret@{}", proxy.addr);
    let config = server.config().with_proxy_url(Some(url));

    let transport = StreamTransport::new(config).unwrap();
    transport.connect().await.unwrap();
    let _conn = server.next_conn().await;

    // base64("alice:s3cret")
    assert!(proxy.requests()[0].contains("Proxy-Authorization: Basic YWxpY2U6czNjcmV0\r\n"));

    transport.close().await;
}

#[tokio::test]
async fn test_proxy_refusal_fails_connect() {
    let mut server = TestServer::start().await;
    let proxy = ConnectProxy::start("407 Proxy Authentication Required").await;
    let config = server.config().with_proxy_url(Some(proxy.url()));

    let transport = StreamTransport::new(config).unwrap();
    let err = transport.connect().await.unwrap_err();
    assert!(
        matches!(&err, Error::Io(e) if e.kind() == ErrorKind::ConnectionRefused),
        "unexpected error: {err:?}"
    );
    assert!(err.to_string().contains("407"));
    assert_eq!(transport.status(), ConnectionStatus::Closed);
    assert_eq!(proxy.requests().len(), 1);
    assert!(server.no_conn_within(std::time::Duration::from_millis(200)).await);
}

/// Blocking TLS WebSocket echo server with a self-signed certificate
fn start_tls_echo() -> SocketAddr {
    let cert = CertificateDer::from(include_bytes!("fixtures/localhost.cert.der").to_vec());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        include_bytes!("fixtures/localhost.key.der").to_vec(),
    ));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .unwrap();
    let config = Arc::new(config);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for tcp in listener.incoming() {
            let Ok(tcp) = tcp else { continue };
            let config = Arc::clone(&config);
            std::thread::spawn(move || {
                let Ok(conn) = rustls::ServerConnection::new(config) else {
                    return;
                };
                let Ok(mut ws) = tungstenite::accept(rustls::StreamOwned::new(conn, tcp)) else {
                    return;
                };
                while let Ok(message) = ws.read() {
                    if message.is_text() && ws.send(message).is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_insecure_mode_accepts_self_signed_certificate() {
    let addr = start_tls_echo();
    let server = TestServer::start().await;
    let config = server
        .config()
        .with_websocket_url(format!("wss://{addr}"))
        .with_tls_mode(TlsMode::Insecure);

    let transport = StreamTransport::new(config).unwrap();
    transport.connect().await.unwrap();
    assert_eq!(transport.status(), ConnectionStatus::Open);

    transport.send("over tls").await.unwrap();
    let frame = timeout(WAIT, transport.recv()).await.unwrap().unwrap();
    assert_eq!(frame.payload, b"over tls");

    transport.close().await;
}

#[tokio::test]
async fn test_verified_mode_rejects_self_signed_certificate() {
    let addr = start_tls_echo();
    let server = TestServer::start().await;
    let config = server
        .config()
        .with_websocket_url(format!("wss://{addr}"))
        .with_tls_mode(TlsMode::Verify);

    let transport = StreamTransport::new(config).unwrap();
    assert!(transport.connect().await.is_err());
    assert_eq!(transport.status(), ConnectionStatus::Closed);
}
