//! Resilient WebSocket transport.
//!
//! [`StreamTransport`] owns one logical connection to a venue's streaming
//! endpoint and keeps it alive:
//!
//! - a receive pump task moves application frames into a bounded inbound
//!   queue and answers pings
//! - a heartbeat task pings on an interval and declares the session dead if
//!   nothing was heard between one ping and the next tick
//! - every subscribe request is recorded once as a [`SubscriptionIntent`] and
//!   re-sent, in registration order, after each reconnect
//!
//! Each physical connection is a new session with its own id. Frames are
//! tagged with the session that received them and frames from a retired
//! session are never handed to the consumer.
//!
//! # Example
//!
//! ```rust,no_run
//! use exchange_feed::client::websocket::StreamTransport;
//! use exchange_feed::config::{Config, MarketType, Venue};
//! use exchange_feed::types::SubscriptionIntent;
//!
//! # async fn example() -> exchange_feed::Result<()> {
//! let transport = StreamTransport::new(Config::new(Venue::Binance, MarketType::Spot))?;
//! transport.connect().await?;
//!
//! let payload = r#"{"method":"SUBSCRIBE","params":["btcusdt@depth@100ms"],"id":1}"#;
//! transport
//!     .subscribe(SubscriptionIntent::new("depth", vec!["btcusdt@depth@100ms".into()], payload))
//!     .await?;
//!
//! while let Some(frame) = transport.recv().await {
//!     println!("{}", String::from_utf8_lossy(&frame.payload));
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::{Config, TlsMode};
use crate::error::Error;
use crate::types::{now_ms, SubscriptionIntent, TimestampMs};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// How long a retired session gets to send its close frame
const RETIRE_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest proxy `CONNECT` response head we accept
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

/// Configuration for reconnection behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (0 = infinite)
    pub max_retries: u32,
    /// Initial delay between reconnection attempts
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnection attempts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retries (0 = infinite)
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay in milliseconds
    #[must_use]
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    #[must_use]
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

/// Lifecycle state of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Created, never connected
    Init = 0,
    /// Session is live
    Open = 1,
    /// Session is gone; a reconnect may or may not be pending
    Closed = 2,
    /// A reconnect attempt is running
    Reconnecting = 3,
}

impl ConnectionStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionStatus::Init,
            1 => ConnectionStatus::Open,
            3 => ConnectionStatus::Reconnecting,
            _ => ConnectionStatus::Closed,
        }
    }

    /// Lowercase name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Init => "init",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One application frame taken off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Session that received the frame
    pub session: u64,
    /// Frame body (text frames as UTF-8 bytes)
    pub payload: Vec<u8>,
    /// Local receive time
    pub received_at: TimestampMs,
}

/// The write half of one physical connection
struct Session {
    id: u64,
    sink: AsyncMutex<WsSink>,
}

struct Inner {
    config: Config,
    status: AtomicU8,
    session: Mutex<Option<Arc<Session>>>,
    current_session: AtomicU64,
    next_session: AtomicU64,
    last_seen: AtomicU64,
    /// When the current session was last pinged; 0 until the first ping
    last_ping: AtomicU64,
    inbound_tx: mpsc::Sender<InboundFrame>,
    inbound_rx: AsyncMutex<mpsc::Receiver<InboundFrame>>,
    registry: Mutex<Vec<SubscriptionIntent>>,
    /// Held for the whole of a connect or reconnect, including replay
    replay_lock: AsyncMutex<()>,
    retrying: AtomicBool,
    heartbeat_started: AtomicBool,
    cancel: CancellationToken,
}

/// Self-healing streaming connection with subscription replay.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("connection", &self.inner.config.connection_id())
            .field("status", &self.status())
            .field("session", &self.session_id())
            .field("subscriptions", &self.inner.registry.lock().len())
            .finish()
    }
}

impl StreamTransport {
    /// Create a transport; nothing is dialled until [`connect`](Self::connect)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration does not validate.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Create a transport whose tasks stop when `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration does not validate.
    pub fn with_cancellation(config: Config, cancel: CancellationToken) -> Result<Self, Error> {
        config.validate()?;
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_depth());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                status: AtomicU8::new(ConnectionStatus::Init as u8),
                session: Mutex::new(None),
                current_session: AtomicU64::new(0),
                next_session: AtomicU64::new(0),
                last_seen: AtomicU64::new(0),
                last_ping: AtomicU64::new(0),
                inbound_tx,
                inbound_rx: AsyncMutex::new(inbound_rx),
                registry: Mutex::new(Vec::new()),
                replay_lock: AsyncMutex::new(()),
                retrying: AtomicBool::new(false),
                heartbeat_started: AtomicBool::new(false),
                cancel,
            }),
        })
    }

    /// Open a new session, replacing and closing any previous one
    ///
    /// Frames still queued from the previous session are discarded. The
    /// subscription registry is not replayed; use
    /// [`reconnect`](Self::reconnect) for that.
    ///
    /// # Errors
    ///
    /// Dial, TLS, proxy and handshake failures; [`Error::Timeout`] if the
    /// handshake does not finish within the configured timeout.
    pub async fn connect(&self) -> Result<(), Error> {
        self.inner.connect().await
    }

    /// Re-open the connection and replay every registered subscription
    ///
    /// Only one reconnect runs at a time; a caller that arrives while another
    /// reconnect is in flight waits for it and shares its outcome.
    ///
    /// # Errors
    ///
    /// [`Error::ReplayFailed`] if any registered subscription could not be
    /// re-sent; the transport is then `Closed`.
    pub async fn reconnect(&self, cause: &str) -> Result<(), Error> {
        self.inner.reconnect(cause).await
    }

    /// Send a subscribe request and record it for replay
    ///
    /// The intent is registered once per logical subscription, after its
    /// first successful send. Intents already carrying the replay marker are
    /// sent without being registered again.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] without a session; [`Error::Timeout`] if
    /// the frame could not be written in time.
    pub async fn subscribe(&self, intent: SubscriptionIntent) -> Result<(), Error> {
        self.inner.send_text(&intent.payload).await?;
        if !intent.replay {
            self.inner.register(intent);
        }
        Ok(())
    }

    /// Send a frame without recording it (unsubscribe, one-off requests)
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn send(&self, payload: &str) -> Result<(), Error> {
        self.inner.send_text(payload).await
    }

    /// Wait for the next frame of the current session
    ///
    /// Returns `None` once the transport is cancelled.
    pub async fn recv(&self) -> Option<InboundFrame> {
        let mut rx = self.inner.inbound_rx.lock().await;
        loop {
            let frame = tokio::select! {
                _ = self.inner.cancel.cancelled() => return None,
                frame = rx.recv() => frame?,
            };
            if frame.session == self.inner.current_session.load(Ordering::Acquire) {
                return Some(frame);
            }
            trace!(session = frame.session, "dropping frame from retired session");
        }
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    /// Id of the current session (0 before the first connect)
    pub fn session_id(&self) -> u64 {
        self.inner.current_session.load(Ordering::Acquire)
    }

    /// Local time anything was last heard on the connection
    pub fn last_seen(&self) -> TimestampMs {
        self.inner.last_seen.load(Ordering::Acquire)
    }

    /// Registered subscriptions, in registration order
    pub fn registry(&self) -> Vec<SubscriptionIntent> {
        self.inner.registry.lock().clone()
    }

    /// Logical connection id
    pub fn connection_id(&self) -> &str {
        self.inner.config.connection_id()
    }

    /// Token parenting every task of this transport
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Stop all tasks and close the connection
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.retire_session().await;
        self.inner.set_status(ConnectionStatus::Closed);
        info!(connection = %self.connection_id(), "transport closed");
    }
}

impl Inner {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn touch(&self) {
        self.last_seen.store(now_ms(), Ordering::Release);
    }

    fn is_current(&self, session: u64) -> bool {
        self.current_session.load(Ordering::Acquire) == session
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    fn register(&self, intent: SubscriptionIntent) {
        let mut registry = self.registry.lock();
        if registry.iter().any(|known| known.same_subscription(&intent)) {
            return;
        }
        debug!(
            connection = %self.config.connection_id(),
            channel = %intent.channel,
            "subscription registered for replay"
        );
        registry.push(intent.as_replay());
    }

    async fn connect(self: &Arc<Self>) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        let _guard = self.replay_lock.lock().await;

        self.retire_session().await;
        let (session, source) = match self.open_session().await {
            Ok(opened) => opened,
            Err(e) => {
                self.set_status(ConnectionStatus::Closed);
                return Err(e);
            }
        };
        let id = self.install(session);
        self.drain_inbound();
        self.set_status(ConnectionStatus::Open);
        self.spawn_receive_loop(id, source);
        self.start_heartbeat();

        info!(connection = %self.config.connection_id(), session = id, "connected");
        Ok(())
    }

    async fn reconnect(self: &Arc<Self>, cause: &str) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        let seen = self.current_session.load(Ordering::Acquire);
        let _guard = self.replay_lock.lock().await;

        // somebody else reconnected while we waited for the lock
        if self.current_session.load(Ordering::Acquire) != seen {
            return match self.status() {
                ConnectionStatus::Open => Ok(()),
                _ => Err(Error::ConnectionClosed),
            };
        }

        self.set_status(ConnectionStatus::Reconnecting);
        info!(connection = %self.config.connection_id(), cause, "reconnecting");

        self.retire_session().await;
        let (session, source) = match self.open_session().await {
            Ok(opened) => opened,
            Err(e) => {
                self.set_status(ConnectionStatus::Closed);
                return Err(e);
            }
        };
        let id = self.install(session);

        let intents = self.registry.lock().clone();
        for intent in &intents {
            if let Err(e) = self.send_text(&intent.payload).await {
                error!(
                    connection = %self.config.connection_id(),
                    session = id,
                    channel = %intent.channel,
                    error = %e,
                    "subscription replay failed"
                );
                self.set_status(ConnectionStatus::Closed);
                return Err(Error::ReplayFailed {
                    channel: intent.channel.clone(),
                    source: Box::new(e),
                });
            }
        }

        self.set_status(ConnectionStatus::Open);
        self.spawn_receive_loop(id, source);
        self.start_heartbeat();
        info!(
            connection = %self.config.connection_id(),
            session = id,
            replayed = intents.len(),
            "reconnected"
        );
        Ok(())
    }

    /// Run reconnect attempts with backoff on a background task
    fn spawn_reconnect(self: &Arc<Self>, cause: &'static str) {
        if self.cancel.is_cancelled() || self.retrying.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let recovered = inner.reconnect_with_backoff(cause).await;
            inner.retrying.store(false, Ordering::Release);
            // the new session may have died before the flag was cleared,
            // in which case its own reconnect request was swallowed
            if recovered && inner.status() == ConnectionStatus::Closed {
                inner.spawn_reconnect("session lost while reconnecting");
            }
        });
    }

    /// Returns `true` once a session is open again
    async fn reconnect_with_backoff(self: &Arc<Self>, cause: &'static str) -> bool {
        let policy = self.config.reconnect().clone();
        let mut attempt = 0u32;
        loop {
            if policy.max_retries > 0 && attempt >= policy.max_retries {
                error!(
                    connection = %self.config.connection_id(),
                    attempts = attempt,
                    "giving up on reconnect"
                );
                self.set_status(ConnectionStatus::Closed);
                return false;
            }

            let delay = policy.delay_for_attempt(attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;

            match self.reconnect(cause).await {
                Ok(()) => return true,
                Err(e) => warn!(
                    connection = %self.config.connection_id(),
                    attempt,
                    error = %e,
                    "reconnect attempt failed"
                ),
            }
        }
    }

    async fn open_session(&self) -> Result<(Arc<Session>, WsSource), Error> {
        let id = self.next_session.fetch_add(1, Ordering::AcqRel) + 1;
        let stream = tokio::time::timeout(self.config.timeout(), dial(&self.config))
            .await
            .map_err(|_| Error::Timeout)??;
        let (sink, source) = stream.split();
        Ok((
            Arc::new(Session {
                id,
                sink: AsyncMutex::new(sink),
            }),
            source,
        ))
    }

    fn install(&self, session: Arc<Session>) -> u64 {
        let id = session.id;
        *self.session.lock() = Some(session);
        self.current_session.store(id, Ordering::Release);
        self.last_ping.store(0, Ordering::Release);
        self.touch();
        id
    }

    /// Close the current session, if any, and forget it
    async fn retire_session(&self) {
        let retired = self.session.lock().take();
        let Some(session) = retired else {
            return;
        };
        let closed = tokio::time::timeout(RETIRE_TIMEOUT, async {
            session.sink.lock().await.close().await
        })
        .await;
        if let Ok(Err(e)) = closed {
            debug!(session = session.id, error = %e, "close on retired session failed");
        }
    }

    fn drain_inbound(&self) {
        if let Ok(mut rx) = self.inbound_rx.try_lock() {
            let mut dropped = 0usize;
            while rx.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                debug!(connection = %self.config.connection_id(), dropped, "inbound queue discarded");
            }
        }
    }

    async fn send_text(&self, payload: &str) -> Result<(), Error> {
        self.send_message(Message::Text(payload.to_owned())).await
    }

    async fn send_message(&self, message: Message) -> Result<(), Error> {
        let session = self.current().ok_or(Error::ConnectionClosed)?;
        tokio::time::timeout(self.config.timeout(), async {
            session.sink.lock().await.send(message).await
        })
        .await
        .map_err(|_| Error::Timeout)??;
        Ok(())
    }

    async fn enqueue(&self, session: u64, payload: Vec<u8>) {
        let frame = InboundFrame {
            session,
            payload,
            received_at: now_ms(),
        };
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            sent = self.inbound_tx.send(frame) => {
                if sent.is_err() {
                    warn!(session, "inbound queue closed");
                }
            }
        }
    }

    fn spawn_receive_loop(self: &Arc<Self>, session: u64, source: WsSource) {
        tokio::spawn(Inner::receive_loop(Arc::clone(self), session, source));
    }

    fn receive_loop(inner: Arc<Self>, session: u64, mut source: WsSource) -> BoxFuture {
        Box::pin(async move {
            let connection = inner.config.connection_id().to_owned();
            loop {
                let next = tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    next = source.next() => next,
                };
                match next {
                    Some(Ok(Message::Text(text))) => {
                        inner.touch();
                        inner.enqueue(session, text.into_bytes()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        inner.touch();
                        inner.enqueue(session, data).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        inner.touch();
                        if let Err(e) = inner.send_message(Message::Pong(data)).await {
                            debug!(%connection, session, error = %e, "pong failed");
                        }
                    }
                    Some(Ok(Message::Pong(_))) => inner.touch(),
                    Some(Ok(Message::Close(frame))) => {
                        info!(%connection, session, ?frame, "server closed connection");
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!(%connection, session, error = %e, "read failed");
                        break;
                    }
                    None => {
                        info!(%connection, session, "stream ended");
                        break;
                    }
                }
            }

            if inner.is_current(session) && inner.status() == ConnectionStatus::Open {
                inner.set_status(ConnectionStatus::Closed);
                inner.spawn_reconnect("read failure");
            }
        })
    }

    /// A ping went out on this session and nothing has been heard since
    fn ping_unanswered(&self) -> bool {
        let pinged = self.last_ping.load(Ordering::Acquire);
        pinged > 0 && self.last_seen.load(Ordering::Acquire) < pinged
    }

    fn start_heartbeat(self: &Arc<Self>) {
        if !self.config.keepalive() || self.heartbeat_started.swap(true, Ordering::AcqRel) {
            return;
        }
        tokio::spawn(Inner::heartbeat(Arc::clone(self)));
    }

    async fn heartbeat(inner: Arc<Self>) {
        let period = inner.config.ping_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if inner.status() != ConnectionStatus::Open {
                continue;
            }

            if inner.ping_unanswered() {
                warn!(
                    connection = %inner.config.connection_id(),
                    session = inner.current_session.load(Ordering::Acquire),
                    "nothing heard since last ping"
                );
                inner.set_status(ConnectionStatus::Closed);
                inner.spawn_reconnect("liveness timeout");
                continue;
            }

            inner.last_ping.store(now_ms(), Ordering::Release);
            if let Err(e) = inner.send_message(Message::Ping(Vec::new())).await {
                warn!(connection = %inner.config.connection_id(), error = %e, "ping failed");
                inner.set_status(ConnectionStatus::Closed);
                inner.spawn_reconnect("ping failure");
            }
        }
    }
}

/// Dial the configured endpoint, through the proxy if one is set
async fn dial(config: &Config) -> Result<WsStream, Error> {
    let url = Url::parse(config.websocket_url())?;
    let connector = tls_connector(config.tls_mode())?;

    let (stream, _response) = match config.proxy_url() {
        None => {
            tokio_tungstenite::connect_async_tls_with_config(url.as_str(), None, true, connector)
                .await?
        }
        Some(proxy) => {
            let tcp = tunnel(proxy, &url).await?;
            tcp.set_nodelay(true)?;
            tokio_tungstenite::client_async_tls_with_config(url.as_str(), tcp, None, connector)
                .await?
        }
    };
    Ok(stream)
}

/// Open an HTTP `CONNECT` tunnel to the target host through `proxy`
async fn tunnel(proxy: &str, target: &Url) -> Result<TcpStream, Error> {
    let proxy = Url::parse(proxy)?;
    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| Error::Config("proxy url has no host".into()))?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(8080);
    let host = target
        .host_str()
        .ok_or_else(|| Error::Config("websocket url has no host".into()))?;
    let port = target
        .port_or_known_default()
        .ok_or_else(|| Error::Config("websocket url has no port".into()))?;

    let mut stream = TcpStream::connect((proxy_host, proxy_port)).await?;

    let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if !proxy.username().is_empty() {
        let credentials = format!("{}:{}", proxy.username(), proxy.password().unwrap_or(""));
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        request.push_str(&format!("Proxy-Authorization: Basic {encoded}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "proxy closed during CONNECT",
            )));
        }
        head.push(byte[0]);
        if head.len() > MAX_PROXY_RESPONSE {
            return Err(Error::Config("proxy CONNECT response too large".into()));
        }
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    if status_line.split_whitespace().nth(1) != Some("200") {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("proxy refused CONNECT: {status_line}"),
        )));
    }
    debug!(proxy = %proxy_host, target = %host, "proxy tunnel established");
    Ok(stream)
}

/// TLS connector for the configured verification mode
///
/// `None` lets tokio-tungstenite verify against the webpki roots.
fn tls_connector(mode: TlsMode) -> Result<Option<Connector>, Error> {
    match mode {
        TlsMode::Verify => Ok(None),
        TlsMode::Insecure => {
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
                .with_safe_default_protocol_versions()?
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(insecure::AcceptAnyCertificate(
                    provider,
                )))
                .with_no_client_auth();
            Ok(Some(Connector::Rustls(Arc::new(config))))
        }
    }
}

mod insecure {
    use std::sync::Arc;

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any certificate chain; signatures are still checked
    #[derive(Debug)]
    pub(super) struct AcceptAnyCertificate(pub(super) Arc<CryptoProvider>);

    impl ServerCertVerifier for AcceptAnyCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MarketType, Venue};

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.initial_delay_ms, 100);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reconnect_config_builder() {
        let config = ReconnectConfig::new()
            .max_retries(5)
            .initial_delay_ms(50)
            .max_delay_ms(10_000)
            .backoff_multiplier(1.5);

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_delay_ms, 50);
        assert_eq!(config.max_delay_ms, 10_000);
        assert!((config.backoff_multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delay_calculation() {
        let config = ReconnectConfig::new()
            .initial_delay_ms(100)
            .backoff_multiplier(2.0)
            .max_delay_ms(1000);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        // capped at max_delay_ms
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ConnectionStatus::Init,
            ConnectionStatus::Open,
            ConnectionStatus::Closed,
            ConnectionStatus::Reconnecting,
        ] {
            assert_eq!(ConnectionStatus::from_u8(status as u8), status);
        }
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn test_insecure_connector_builds() {
        assert!(tls_connector(TlsMode::Verify).unwrap().is_none());
        assert!(matches!(
            tls_connector(TlsMode::Insecure).unwrap(),
            Some(Connector::Rustls(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_dedups_and_marks_replay() {
        let transport = StreamTransport::new(Config::new(Venue::Gate, MarketType::Spot)).unwrap();
        let intent = SubscriptionIntent::new("spot.order_book_update", vec!["BTC_USDT".into()], "{}");

        transport.inner.register(intent.clone());
        transport.inner.register(intent.clone());
        transport.inner.register(intent.as_replay());

        let registry = transport.registry();
        assert_eq!(registry.len(), 1);
        assert!(registry[0].replay);
        assert_eq!(transport.status(), ConnectionStatus::Init);
    }

    #[tokio::test]
    async fn test_send_without_session_fails() {
        let transport = StreamTransport::new(Config::new(Venue::Gate, MarketType::Spot)).unwrap();
        let intent = SubscriptionIntent::new("spot.order_book_update", vec!["BTC_USDT".into()], "{}");

        assert!(matches!(
            transport.subscribe(intent).await,
            Err(Error::ConnectionClosed)
        ));
        assert!(transport.registry().is_empty());
    }

    #[test]
    fn test_liveness_needs_an_outstanding_ping() {
        let transport = StreamTransport::new(Config::new(Venue::Gate, MarketType::Spot)).unwrap();
        let inner = &transport.inner;

        // quiet, but never pinged
        inner.last_seen.store(1_000, Ordering::Release);
        assert!(!inner.ping_unanswered());

        inner.last_ping.store(2_000, Ordering::Release);
        assert!(inner.ping_unanswered());

        // pong arrives in the same millisecond
        inner.last_seen.store(2_000, Ordering::Release);
        assert!(!inner.ping_unanswered());

        inner.last_ping.store(0, Ordering::Release);
        inner.last_seen.store(0, Ordering::Release);
        assert!(!inner.ping_unanswered());
    }

    #[tokio::test]
    async fn test_pending_recv_wakes_on_close() {
        use tokio_test::{assert_pending, assert_ready_eq};

        let transport = StreamTransport::new(Config::new(Venue::Binance, MarketType::Spot)).unwrap();
        let mut recv = tokio_test::task::spawn(transport.recv());
        assert_pending!(recv.poll());

        transport.close().await;
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), None);
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_close() {
        let transport = StreamTransport::new(Config::new(Venue::Gate, MarketType::Spot)).unwrap();
        transport.close().await;
        assert_eq!(transport.recv().await, None);
        assert_eq!(transport.status(), ConnectionStatus::Closed);
        assert!(matches!(transport.connect().await, Err(Error::ConnectionClosed)));
    }
}
