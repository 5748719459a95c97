//! Venue adapters.
//!
//! A [`VenueAdapter`] is everything venue-specific the core needs:
//!
//! - fetch a REST snapshot for an instrument
//! - decode a raw stream frame into a [`StreamEvent`]
//! - encode subscribe/unsubscribe frames, and ticker subscriptions
//! - say which [`GapPolicy`] its diffs follow
//!
//! Adapters are picked explicitly from the [`Config`] with [`adapter_for`].
//! Instruments cross this boundary in canonical `BASE_QUOTE` form
//! (`BTC_USDT`); adapters translate to and from the venue's symbols.

pub mod binance;
pub mod gate;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::{Config, MarketType, Venue};
use crate::error::Error;
use crate::orderbook::GapPolicy;
use crate::types::{BookSnapshot, PriceLevel, StreamEvent, SubscriptionIntent};

pub use binance::BinanceAdapter;
pub use gate::GateAdapter;

/// Venue-specific wire handling for one market
#[async_trait]
pub trait VenueAdapter: Send + Sync + fmt::Debug {
    /// Exchange this adapter talks to
    fn venue(&self) -> Venue;

    /// Market type this adapter talks to
    fn market_type(&self) -> MarketType;

    /// How consecutive diffs are linked
    fn gap_policy(&self) -> GapPolicy;

    /// Fetch a full order book snapshot over REST
    async fn fetch_snapshot(&self, instrument: &str) -> Result<BookSnapshot, Error>;

    /// Decode one inbound frame
    ///
    /// Returns `Ok(None)` for frames that carry nothing worth routing.
    fn decode(&self, frame: &[u8]) -> Result<Option<StreamEvent>, Error>;

    /// Build the subscribe request for an instrument's diff channel
    fn encode_subscribe(&self, instrument: &str) -> Result<SubscriptionIntent, Error>;

    /// Build the unsubscribe frame for an instrument's diff channel
    fn encode_unsubscribe(&self, instrument: &str) -> Result<String, Error>;

    /// Build the subscribe request for an instrument's ticker channel
    ///
    /// Ticker updates come back as [`StreamEvent::Other`].
    fn encode_ticker_subscribe(&self, instrument: &str) -> Result<SubscriptionIntent, Error> {
        Err(Error::Config(format!(
            "{} {} has no ticker channel for {}",
            self.venue().as_str(),
            self.market_type().as_str(),
            instrument
        )))
    }
}

/// Pick the adapter for a configuration
///
/// # Errors
///
/// Whatever the adapter's constructor returns, typically a REST client
/// build failure.
pub fn adapter_for(config: &Config) -> Result<Arc<dyn VenueAdapter>, Error> {
    match config.venue() {
        Venue::Binance => Ok(Arc::new(BinanceAdapter::new(config)?)),
        Venue::Gate => Ok(Arc::new(GateAdapter::new(config)?)),
    }
}

/// `[price, size]` pair as venues send it (strings or numbers)
pub(crate) type WireLevel = (Decimal, Decimal);

pub(crate) fn to_levels(wire: Vec<WireLevel>) -> Vec<PriceLevel> {
    wire.into_iter().map(PriceLevel::from).collect()
}

/// Split `BASE_QUOTE[_SUFFIX...]` and check it is well formed
pub(crate) fn split_instrument(instrument: &str) -> Result<Vec<String>, Error> {
    let parts: Vec<String> = instrument
        .split('_')
        .map(|p| p.trim().to_uppercase())
        .collect();
    if parts.len() < 2 || parts.iter().any(|p| p.is_empty() || !p.chars().all(char::is_alphanumeric)) {
        return Err(Error::InvalidInstrument(instrument.to_string()));
    }
    Ok(parts)
}

/// Request id for outbound frames
pub(crate) fn request_id() -> u64 {
    rand::random::<u32>() as u64
}
