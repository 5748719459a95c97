//! # exchange-feed
//!
//! Streaming market data from crypto exchanges into local order book
//! replicas that stay consistent with the venue.
//!
//! ## Features
//!
//! - **Resilient Transport** - WebSocket sessions that reconnect with backoff
//!   and replay every subscription in order
//! - **Synchronized Replicas** - REST snapshot plus sequenced diffs, with gap
//!   detection and automatic resync
//! - **Sorted Price Ledger** - flat sorted levels with binary-search updates
//! - **Venue Adapters** - Binance (spot, USD-M, COIN-M) and Gate (spot)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use exchange_feed::config::{MarketType, Venue};
//! use exchange_feed::{Config, MarketFeed};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), exchange_feed::Error> {
//!     let config = Config::new(Venue::Binance, MarketType::LinearFutures);
//!     let feed = MarketFeed::connect(config).await?;
//!
//!     let book = feed.subscribe_orderbook("BTC_USDT").await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(2)).await;
//!
//!     if let Ok(depth) = book.snapshot() {
//!         println!("bid {:?} ask {:?}", depth.best_bid(), depth.best_ask());
//!     }
//!
//!     feed.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Instruments
//!
//! Instruments are written `BASE_QUOTE` (`BTC_USDT`, `BTC_USD_PERP` for
//! COIN-M perpetuals) whatever the venue calls them; adapters translate.
//!
//! ## Architecture
//!
//! - [`client`] - streaming transport, REST client, credentials
//! - [`venue`] - per-venue wire formats behind [`venue::VenueAdapter`]
//! - [`orderbook`] - ledger, replica, gap rules and the reconciler
//! - [`feed`] - [`MarketFeed`], one connection with many replicas
//! - [`pool`] - [`ConnectionPool`], shared feeds per venue and account
//! - [`types`] - venue-neutral levels, diffs, snapshots, events
//! - [`config`] - connection settings
//! - [`error`] - error types for the crate
//!
//! ## Logging
//!
//! Everything is logged through [`tracing`] with the connection id and
//! instrument as fields; install any subscriber to see it.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod orderbook;
pub mod pool;
pub mod types;
pub mod venue;

// Re-export main types at crate root for convenience
pub use client::websocket::{ConnectionStatus, StreamTransport};
pub use config::Config;
pub use error::Error;
pub use feed::MarketFeed;
pub use orderbook::{BookReplica, DepthSnapshot};
pub use pool::{ConnectionPool, PoolKey};

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;
