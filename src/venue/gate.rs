//! Gate spot and futures order book updates.
//!
//! Spot uses channel `spot.order_book_update` with payload `[pair, "100ms"]`
//! and levels as `[price, size]` pairs. Futures (USDT perpetual and
//! delivery) use `futures.order_book_update` with payload
//! `[contract, "100ms", depth]` and levels as `{"p": price, "s": size}`,
//! sizes counted in contracts.
//!
//! Updates cover `[U, u]` and the next one starts at `u + 1` on every Gate
//! market, so the adapter uses [`GapPolicy::Contiguous`]. Gate pairs and
//! contracts are already `BASE_QUOTE`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::rest::RestClient;
use crate::config::{Config, MarketType, Venue};
use crate::error::Error;
use crate::orderbook::GapPolicy;
use crate::types::{now_ms, BookSnapshot, DiffMessage, PriceLevel, StreamEvent, SubscriptionIntent};

use super::{request_id, split_instrument, VenueAdapter, WireLevel};

const UPDATE_INTERVAL: &str = "100ms";

/// Depths the futures update channel accepts
const FUTURES_DEPTHS: [u32; 3] = [100, 50, 20];

/// Channel names for one market family
#[derive(Debug, Clone, Copy)]
struct Channels {
    depth: &'static str,
    tickers: &'static str,
    pong: &'static str,
}

const SPOT: Channels = Channels {
    depth: "spot.order_book_update",
    tickers: "spot.tickers",
    pong: "spot.pong",
};

const FUTURES: Channels = Channels {
    depth: "futures.order_book_update",
    tickers: "futures.tickers",
    pong: "futures.pong",
};

/// Outbound request
#[derive(Debug, Serialize)]
struct Request<'a> {
    time: u64,
    id: u64,
    channel: &'a str,
    event: &'a str,
    payload: Vec<String>,
}

/// Inbound envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    event: String,
    #[serde(default)]
    error: Option<ChannelError>,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct ChannelError {
    code: i64,
    message: String,
}

/// Futures level: `{"p": "19137.7", "s": 120}`
#[derive(Debug, Deserialize)]
struct ContractLevel {
    p: Decimal,
    s: Decimal,
}

impl From<ContractLevel> for PriceLevel {
    fn from(level: ContractLevel) -> Self {
        PriceLevel::new(level.p, level.s)
    }
}

/// `*.order_book_update` result
#[derive(Debug, Deserialize)]
struct DepthUpdate<L> {
    /// Update time in milliseconds
    t: u64,
    #[serde(rename = "s")]
    name: String,
    #[serde(rename = "U")]
    first_id: u64,
    #[serde(rename = "u")]
    last_id: u64,
    #[serde(rename = "b", default = "Vec::new")]
    bids: Vec<L>,
    #[serde(rename = "a", default = "Vec::new")]
    asks: Vec<L>,
}

/// `GET .../order_book?with_id=true` response
///
/// `current` is milliseconds on spot and fractional seconds on futures.
#[derive(Debug, Deserialize)]
struct OrderBookResponse<L> {
    id: u64,
    #[serde(default)]
    current: f64,
    asks: Vec<L>,
    bids: Vec<L>,
}

fn levels<L: Into<PriceLevel>>(wire: Vec<L>) -> Vec<PriceLevel> {
    wire.into_iter().map(Into::into).collect()
}

/// Adapter for Gate spot, USDT perpetual and delivery futures
#[derive(Debug)]
pub struct GateAdapter {
    market_type: MarketType,
    channels: Channels,
    rest: RestClient,
    /// Levels requested in snapshots, and on futures in the update stream
    depth: u32,
}

impl GateAdapter {
    /// Create an adapter for the configured market
    pub fn new(config: &Config) -> Result<Self, Error> {
        let market_type = config.market_type();
        let (channels, depth) = match market_type {
            MarketType::Spot => (SPOT, config.snapshot_limit()),
            MarketType::LinearFutures | MarketType::DeliveryFutures => {
                (FUTURES, futures_depth(config.snapshot_limit()))
            }
        };
        Ok(Self {
            market_type,
            channels,
            rest: RestClient::new(config)?,
            depth,
        })
    }

    fn pair(instrument: &str) -> Result<String, Error> {
        Ok(split_instrument(instrument)?.join("_"))
    }

    fn is_spot(&self) -> bool {
        self.market_type == MarketType::Spot
    }

    fn depth_payload(&self, pair: String) -> Vec<String> {
        let mut payload = vec![pair, UPDATE_INTERVAL.to_string()];
        if !self.is_spot() {
            payload.push(self.depth.to_string());
        }
        payload
    }

    fn request(&self, channel: &str, event: &str, payload: Vec<String>) -> Result<String, Error> {
        Ok(serde_json::to_string(&Request {
            time: now_ms() / 1000,
            id: request_id(),
            channel,
            event,
            payload,
        })?)
    }

    /// REST path and instrument parameter name
    fn book_endpoint(&self) -> (&'static str, &'static str) {
        match self.market_type {
            MarketType::Spot => ("/spot/order_book", "currency_pair"),
            MarketType::LinearFutures => ("/futures/usdt/order_book", "contract"),
            MarketType::DeliveryFutures => ("/delivery/usdt/order_book", "contract"),
        }
    }

    async fn fetch<L>(&self, pair: &str) -> Result<OrderBookResponse<L>, Error>
    where
        L: DeserializeOwned,
    {
        let (path, key) = self.book_endpoint();
        let limit = self.depth.to_string();
        self.rest
            .get(path, &[(key, pair), ("limit", limit.as_str()), ("with_id", "true")])
            .await
    }

    fn decode_update<L>(&self, result: Value) -> Result<StreamEvent, Error>
    where
        L: DeserializeOwned + Into<PriceLevel>,
    {
        let update: DepthUpdate<L> = serde_json::from_value(result)?;
        Ok(StreamEvent::Diff(DiffMessage {
            instrument: update.name.to_uppercase(),
            first_seq: update.first_id,
            last_seq: update.last_id,
            prior_seq: None,
            bids: levels(update.bids),
            asks: levels(update.asks),
            server_time: update.t,
        }))
    }
}

/// Largest accepted futures depth not above the configured limit
fn futures_depth(limit: u32) -> u32 {
    FUTURES_DEPTHS
        .into_iter()
        .find(|depth| *depth <= limit)
        .unwrap_or(FUTURES_DEPTHS[FUTURES_DEPTHS.len() - 1])
}

#[async_trait]
impl VenueAdapter for GateAdapter {
    fn venue(&self) -> Venue {
        Venue::Gate
    }

    fn market_type(&self) -> MarketType {
        self.market_type
    }

    fn gap_policy(&self) -> GapPolicy {
        GapPolicy::Contiguous
    }

    async fn fetch_snapshot(&self, instrument: &str) -> Result<BookSnapshot, Error> {
        let pair = Self::pair(instrument)?;

        let (asks, bids, sequence, server_time) = if self.is_spot() {
            let book: OrderBookResponse<WireLevel> = self.fetch(&pair).await?;
            (levels(book.asks), levels(book.bids), book.id, book.current as u64)
        } else {
            let book: OrderBookResponse<ContractLevel> = self.fetch(&pair).await?;
            let millis = (book.current * 1000.0) as u64;
            (levels(book.asks), levels(book.bids), book.id, millis)
        };

        Ok(BookSnapshot {
            asks,
            bids,
            sequence,
            server_time,
        })
    }

    fn decode(&self, frame: &[u8]) -> Result<Option<StreamEvent>, Error> {
        let envelope: Envelope = serde_json::from_slice(frame)?;

        if let Some(err) = envelope.error {
            return Err(Error::Decode(format!(
                "{} {} error {}: {}",
                envelope.channel, envelope.event, err.code, err.message
            )));
        }
        if envelope.channel == self.channels.pong {
            return Ok(Some(StreamEvent::Pong));
        }

        match envelope.event.as_str() {
            "subscribe" | "unsubscribe" => Ok(Some(StreamEvent::Ack {
                id: envelope.id,
                channel: Some(envelope.channel),
            })),
            "update" if envelope.channel == self.channels.depth => {
                if self.is_spot() {
                    self.decode_update::<WireLevel>(envelope.result).map(Some)
                } else {
                    self.decode_update::<ContractLevel>(envelope.result).map(Some)
                }
            }
            "" => Ok(None),
            _ => Ok(Some(StreamEvent::Other {
                channel: envelope.channel,
                raw: String::from_utf8_lossy(frame).into_owned(),
            })),
        }
    }

    fn encode_subscribe(&self, instrument: &str) -> Result<SubscriptionIntent, Error> {
        let params = self.depth_payload(Self::pair(instrument)?);
        let payload = self.request(self.channels.depth, "subscribe", params.clone())?;
        Ok(SubscriptionIntent::new(self.channels.depth, params, payload))
    }

    fn encode_unsubscribe(&self, instrument: &str) -> Result<String, Error> {
        let params = self.depth_payload(Self::pair(instrument)?);
        self.request(self.channels.depth, "unsubscribe", params)
    }

    fn encode_ticker_subscribe(&self, instrument: &str) -> Result<SubscriptionIntent, Error> {
        let params = vec![Self::pair(instrument)?];
        let payload = self.request(self.channels.tickers, "subscribe", params.clone())?;
        Ok(SubscriptionIntent::new(self.channels.tickers, params, payload))
    }
}
