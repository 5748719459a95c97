//! Configuration for the streaming client.
//!
//! This module provides the [`Config`] struct: which venue and market to
//! connect to, where, through which proxy, and how the connection and the
//! order books it feeds should behave.

use std::time::Duration;

use crate::client::auth::Credentials;
use crate::client::websocket::ReconnectConfig;
use crate::error::Error;

/// Supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    /// Binance (spot, USD-M futures, COIN-M futures)
    Binance,
    /// Gate (spot, USDT perpetual and delivery futures)
    Gate,
}

impl Venue {
    /// Short lowercase name, used in book ids and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Gate => "gate",
        }
    }

    /// Get the WebSocket URL for a market type
    pub fn websocket_url(&self, market_type: MarketType) -> &'static str {
        match (self, market_type) {
            (Venue::Binance, MarketType::Spot) => "wss://stream.binance.com:9443/ws",
            (Venue::Binance, MarketType::LinearFutures) => "wss://fstream.binance.com/ws",
            (Venue::Binance, MarketType::DeliveryFutures) => "wss://dstream.binance.com/ws",
            (Venue::Gate, MarketType::Spot) => "wss://api.gateio.ws/ws/v4/",
            (Venue::Gate, MarketType::LinearFutures) => "wss://fx-ws.gateio.ws/v4/ws/usdt",
            (Venue::Gate, MarketType::DeliveryFutures) => {
                "wss://fx-ws.gateio.ws/v4/ws/delivery/usdt"
            }
        }
    }

    /// Get the base URL for REST API
    pub fn rest_base_url(&self, market_type: MarketType) -> &'static str {
        match (self, market_type) {
            (Venue::Binance, MarketType::Spot) => "https://api.binance.com",
            (Venue::Binance, MarketType::LinearFutures) => "https://fapi.binance.com",
            (Venue::Binance, MarketType::DeliveryFutures) => "https://dapi.binance.com",
            (Venue::Gate, _) => "https://api.gateio.ws/api/v4",
        }
    }

    /// Default number of levels requested in a REST snapshot
    pub fn default_snapshot_limit(&self) -> u32 {
        match self {
            Venue::Binance => 1000,
            Venue::Gate => 100,
        }
    }
}

/// Market type on a venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MarketType {
    /// Spot market
    #[default]
    Spot,
    /// Linear (stablecoin-margined) perpetual futures
    LinearFutures,
    /// Delivery (coin-margined) futures
    DeliveryFutures,
}

impl MarketType {
    /// Short lowercase name, used in book ids and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::LinearFutures => "linear",
            MarketType::DeliveryFutures => "delivery",
        }
    }
}

/// Certificate verification mode for the streaming and REST connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Verify server certificates against the webpki roots
    #[default]
    Verify,
    /// Accept any server certificate
    Insecure,
}

/// Configuration for one venue connection
///
/// # Example
///
/// ```rust
/// use exchange_feed::Config;
/// use exchange_feed::config::{MarketType, TlsMode, Venue};
/// use std::time::Duration;
///
/// let config = Config::new(Venue::Binance, MarketType::LinearFutures)
///     .with_proxy_url(Some("http://127.0.0.1:7890".to_string()))
///     .with_ping_interval(Duration::from_secs(15))
///     .with_max_book_depth(200);
///
/// assert!(config.websocket_url().starts_with("wss://fstream"));
/// assert_eq!(config.tls_mode(), TlsMode::Verify);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Exchange
    venue: Venue,

    /// Market type on the exchange
    market_type: MarketType,

    /// Logical connection id (used in logs)
    connection_id: String,

    /// Streaming endpoint
    websocket_url: String,

    /// REST base URL for snapshot fetches
    rest_base_url: String,

    /// Optional HTTP proxy (`http://host:port`)
    proxy_url: Option<String>,

    /// Certificate verification mode
    tls_mode: TlsMode,

    /// Capacity of the inbound frame queue
    inbound_queue_depth: usize,

    /// Send pings and watch liveness
    keepalive: bool,

    /// Ping interval; also the read-liveness timeout
    ping_interval: Duration,

    /// HTTP request and frame send timeout
    timeout: Duration,

    /// Levels kept per side after a snapshot
    max_book_depth: usize,

    /// Levels requested per REST snapshot
    snapshot_limit: u32,

    /// API credentials (only needed for private channels)
    credentials: Option<Credentials>,

    /// Reconnect backoff
    reconnect: ReconnectConfig,
}

impl Config {
    /// Create a configuration with venue defaults
    pub fn new(venue: Venue, market_type: MarketType) -> Self {
        Self {
            venue,
            market_type,
            connection_id: format!("{}_{}", venue.as_str(), market_type.as_str()),
            websocket_url: venue.websocket_url(market_type).to_string(),
            rest_base_url: venue.rest_base_url(market_type).to_string(),
            proxy_url: None,
            tls_mode: TlsMode::default(),
            inbound_queue_depth: 1024,
            keepalive: true,
            ping_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            max_book_depth: 1000,
            snapshot_limit: venue.default_snapshot_limit(),
            credentials: None,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Set the logical connection id
    #[must_use]
    pub fn with_connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = id.into();
        self
    }

    /// Override the streaming endpoint
    #[must_use]
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = url.into();
        self
    }

    /// Override the REST base URL
    #[must_use]
    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = url.into();
        self
    }

    /// Set or clear the HTTP proxy
    #[must_use]
    pub fn with_proxy_url(mut self, proxy_url: Option<String>) -> Self {
        self.proxy_url = proxy_url;
        self
    }

    /// Set the certificate verification mode
    #[must_use]
    pub fn with_tls_mode(mut self, tls_mode: TlsMode) -> Self {
        self.tls_mode = tls_mode;
        self
    }

    /// Set the inbound frame queue capacity
    #[must_use]
    pub fn with_inbound_queue_depth(mut self, depth: usize) -> Self {
        self.inbound_queue_depth = depth;
        self
    }

    /// Enable or disable keepalive pings
    #[must_use]
    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set the ping interval (also the liveness timeout)
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the HTTP request and send timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of levels kept per side
    #[must_use]
    pub fn with_max_book_depth(mut self, depth: usize) -> Self {
        self.max_book_depth = depth;
        self
    }

    /// Set the number of levels requested per REST snapshot
    #[must_use]
    pub fn with_snapshot_limit(mut self, limit: u32) -> Self {
        self.snapshot_limit = limit;
        self
    }

    /// Set API credentials
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the reconnect backoff
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Get the venue
    pub fn venue(&self) -> Venue {
        self.venue
    }

    /// Get the market type
    pub fn market_type(&self) -> MarketType {
        self.market_type
    }

    /// Get the logical connection id
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Get the WebSocket URL
    pub fn websocket_url(&self) -> &str {
        &self.websocket_url
    }

    /// Get the REST API base URL
    pub fn rest_base_url(&self) -> &str {
        &self.rest_base_url
    }

    /// Get the proxy URL
    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    /// Get the certificate verification mode
    pub fn tls_mode(&self) -> TlsMode {
        self.tls_mode
    }

    /// Get the inbound queue capacity
    pub fn inbound_queue_depth(&self) -> usize {
        self.inbound_queue_depth
    }

    /// Whether keepalive pings are enabled
    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    /// Get the ping interval
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the number of levels kept per side
    pub fn max_book_depth(&self) -> usize {
        self.max_book_depth
    }

    /// Get the REST snapshot limit
    pub fn snapshot_limit(&self) -> u32 {
        self.snapshot_limit
    }

    /// Get the credentials
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Get the reconnect backoff
    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    /// Check that the configuration can actually be used
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero capacities/intervals or unparsable
    /// URLs.
    pub fn validate(&self) -> Result<(), Error> {
        if self.inbound_queue_depth == 0 {
            return Err(Error::Config("inbound queue depth must be > 0".into()));
        }
        if self.max_book_depth == 0 {
            return Err(Error::Config("max book depth must be > 0".into()));
        }
        if self.keepalive && self.ping_interval.is_zero() {
            return Err(Error::Config("ping interval must be > 0".into()));
        }

        let ws = url::Url::parse(&self.websocket_url)?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "websocket url must use ws:// or wss://, got {}",
                ws.scheme()
            )));
        }
        url::Url::parse(&self.rest_base_url)?;
        if let Some(proxy) = &self.proxy_url {
            url::Url::parse(proxy)?;
        }
        Ok(())
    }
}
