//! Reconnect and replay behaviour of the streaming transport.
//!
//! Runs against a local WebSocket server; no network access needed.

mod common;

use std::time::Duration;

use common::{eventually, TestServer, WAIT};
use exchange_feed::client::ReconnectConfig;
use exchange_feed::types::SubscriptionIntent;
use exchange_feed::{ConnectionStatus, Error, StreamTransport};
use tokio::time::timeout;

fn intent(name: &str) -> SubscriptionIntent {
    SubscriptionIntent::new("depth", vec![name.to_string()], format!("subscribe {name}"))
}

#[tokio::test]
async fn test_replays_subscriptions_in_order() {
    let mut server = TestServer::start().await;
    let transport = StreamTransport::new(server.config()).unwrap();
    assert_eq!(transport.status(), ConnectionStatus::Init);

    transport.connect().await.unwrap();
    let mut first = server.next_conn().await;
    assert_eq!(transport.status(), ConnectionStatus::Open);

    for name in ["a", "b", "c"] {
        transport.subscribe(intent(name)).await.unwrap();
    }
    // same logical subscription again: sent, but not registered twice
    transport.subscribe(intent("a")).await.unwrap();

    for expected in ["subscribe a", "subscribe b", "subscribe c", "subscribe a"] {
        assert_eq!(first.next_text().await, expected);
    }
    assert_eq!(transport.registry().len(), 3);
    assert!(transport.registry().iter().all(|i| i.replay));

    let session = transport.session_id();
    drop(first);

    let mut second = server.next_conn().await;
    for expected in ["subscribe a", "subscribe b", "subscribe c"] {
        assert_eq!(second.next_text().await, expected);
    }
    assert!(eventually(|| transport.status() == ConnectionStatus::Open).await);
    assert!(transport.session_id() > session);

    // replay does not grow the registry
    assert_eq!(transport.registry().len(), 3);

    transport.close().await;
}

#[tokio::test]
async fn test_frames_from_old_session_are_discarded() {
    let mut server = TestServer::start().await;
    let transport = StreamTransport::new(server.config()).unwrap();
    transport.connect().await.unwrap();

    let first = server.next_conn().await;
    first.send("old-1");
    first.send("old-2");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let session = transport.session_id();
    drop(first);

    let second = server.next_conn().await;
    assert!(eventually(|| transport.session_id() > session
        && transport.status() == ConnectionStatus::Open)
    .await);
    second.send("new-1");

    let frame = timeout(WAIT, transport.recv()).await.unwrap().unwrap();
    assert_eq!(frame.payload, b"new-1");
    assert_eq!(frame.session, transport.session_id());

    transport.close().await;
}

#[tokio::test]
async fn test_explicit_reconnect_replays() {
    let mut server = TestServer::start().await;
    let transport = StreamTransport::new(server.config()).unwrap();
    transport.connect().await.unwrap();
    let mut first = server.next_conn().await;

    transport.subscribe(intent("x")).await.unwrap();
    assert_eq!(first.next_text().await, "subscribe x");

    transport.reconnect("manual").await.unwrap();
    let mut second = server.next_conn().await;
    assert_eq!(second.next_text().await, "subscribe x");
    assert_eq!(transport.status(), ConnectionStatus::Open);

    transport.close().await;
}

#[tokio::test]
async fn test_concurrent_reconnects_open_one_session() {
    let mut server = TestServer::start().await;
    let transport = StreamTransport::new(server.config()).unwrap();
    transport.connect().await.unwrap();
    let _first = server.next_conn().await;

    let a = transport.clone();
    let b = transport.clone();
    let (ra, rb) = tokio::join!(a.reconnect("a"), b.reconnect("b"));
    assert!(ra.is_ok());
    assert!(rb.is_ok());

    let _second = server.next_conn().await;
    assert!(server.no_conn_within(Duration::from_millis(200)).await);

    transport.close().await;
}

#[tokio::test]
async fn test_connect_fails_without_server() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let server = TestServer::start().await;
    let config = server.config().with_websocket_url(format!("ws://{addr}"));

    let transport = StreamTransport::new(config).unwrap();
    assert!(transport.connect().await.is_err());
    assert_eq!(transport.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let mut server = TestServer::start().await;
    let config = server.config().with_reconnect(
        ReconnectConfig::new()
            .max_retries(2)
            .initial_delay_ms(10)
            .max_delay_ms(20),
    );
    let transport = StreamTransport::new(config).unwrap();
    transport.connect().await.unwrap();
    let conn = server.next_conn().await;

    server.stop();
    drop(conn);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(transport.status(), ConnectionStatus::Closed);
    assert!(matches!(transport.send("x").await, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_close_stops_everything() {
    let mut server = TestServer::start().await;
    let transport = StreamTransport::new(server.config()).unwrap();
    transport.connect().await.unwrap();
    let _conn = server.next_conn().await;

    transport.close().await;
    assert_eq!(transport.status(), ConnectionStatus::Closed);
    assert!(transport.recv().await.is_none());
    assert!(matches!(transport.send("x").await, Err(Error::ConnectionClosed)));
    assert!(matches!(
        transport.reconnect("after close").await,
        Err(Error::ConnectionClosed)
    ));
    assert!(server.no_conn_within(Duration::from_millis(200)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recovers_when_fresh_sessions_drop_at_once() {
    let mut server = TestServer::start().await;
    let transport = StreamTransport::new(server.config()).unwrap();
    transport.connect().await.unwrap();
    let mut first = server.next_conn().await;

    transport.subscribe(intent("x")).await.unwrap();
    assert_eq!(first.next_text().await, "subscribe x");
    drop(first);

    // each replacement dies right after the handshake
    for _ in 0..3 {
        drop(server.next_conn().await);
    }

    let mut steady = server.next_conn().await;
    assert_eq!(steady.next_text().await, "subscribe x");
    assert!(eventually(|| transport.status() == ConnectionStatus::Open).await);
    assert!(server.no_conn_within(Duration::from_millis(300)).await);
    assert_eq!(transport.status(), ConnectionStatus::Open);

    transport.close().await;
}
