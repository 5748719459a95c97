//! Local WebSocket server for integration tests.
//!
//! Every accepted connection is handed to the test as a [`ServerConn`]:
//! frames the client sends show up on `inbound`, and anything pushed into
//! `outbound` is written to the client. Dropping the `ServerConn` drops the
//! socket, which looks like a network failure to the client.
//!
//! [`ConnectProxy`] is a minimal HTTP `CONNECT` proxy in front of it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use exchange_feed::client::websocket::ReconnectConfig;
use exchange_feed::config::{MarketType, Venue};
use exchange_feed::Config;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<ServerConn>,
    accept: JoinHandle<()>,
}

pub struct ServerConn {
    pub inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Command>,
}

enum Command {
    Text(String),
    /// Stop reading the socket; pings go unanswered
    Pause,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conns) = mpsc::unbounded_channel();

        let accept = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                let (in_tx, inbound) = mpsc::unbounded_channel();
                let (outbound, mut out_rx) = mpsc::unbounded_channel::<Command>();
                if conn_tx.send(ServerConn { inbound, outbound }).is_err() {
                    return;
                }

                tokio::spawn(async move {
                    let (mut sink, mut source) = ws.split();
                    loop {
                        tokio::select! {
                            msg = source.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = in_tx.send(text);
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            out = out_rx.recv() => match out {
                                Some(Command::Text(text)) => {
                                    if sink.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Command::Pause) => {
                                    // hold the socket open until the test drops it
                                    while out_rx.recv().await.is_some() {}
                                    break;
                                }
                                // test dropped the connection
                                None => break,
                            },
                        }
                    }
                });
            }
        });

        Self { addr, conns, accept }
    }

    /// Stop accepting; new dials are refused
    pub fn stop(&self) {
        self.accept.abort();
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn config(&self) -> Config {
        Config::new(Venue::Binance, MarketType::Spot)
            .with_websocket_url(self.url())
            .with_keepalive(false)
            .with_timeout(Duration::from_secs(2))
            .with_reconnect(ReconnectConfig::new().initial_delay_ms(10).max_delay_ms(50))
    }

    pub async fn next_conn(&mut self) -> ServerConn {
        timeout(WAIT, self.conns.recv())
            .await
            .expect("no connection within timeout")
            .expect("server stopped")
    }

    pub async fn no_conn_within(&mut self, wait: Duration) -> bool {
        timeout(wait, self.conns.recv()).await.is_err()
    }
}

impl ServerConn {
    pub async fn next_text(&mut self) -> String {
        timeout(WAIT, self.inbound.recv())
            .await
            .expect("no frame within timeout")
            .expect("connection closed")
    }

    pub fn send(&self, text: impl Into<String>) {
        self.outbound.send(Command::Text(text.into())).unwrap();
    }

    /// Keep the TCP connection but stop reading from it
    pub fn pause(&self) {
        self.outbound.send(Command::Pause).unwrap();
    }
}

/// HTTP `CONNECT` proxy that answers every request with a fixed status
///
/// On `200` it relays bytes between the client and the requested target.
pub struct ConnectProxy {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    accept: JoinHandle<()>,
}

impl ConnectProxy {
    pub async fn start(status: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        let accept = tokio::spawn(async move {
            while let Ok((mut client, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let head = read_head(&mut client).await;
                    let target = head
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or_default()
                        .to_string();
                    seen.lock().push(head);

                    let reply = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\n\r\n");
                    if client.write_all(reply.as_bytes()).await.is_err() {
                        return;
                    }
                    if !status.starts_with("200") {
                        return;
                    }
                    if let Ok(mut upstream) = TcpStream::connect(target).await {
                        let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                    }
                });
            }
        });

        Self {
            addr,
            requests,
            accept,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request heads received so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl Drop for ConnectProxy {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Poll `check` until it holds or [`WAIT`] runs out
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
