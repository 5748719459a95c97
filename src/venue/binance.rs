//! Binance spot, USD-M and COIN-M depth streams.
//!
//! Diff stream: `<symbol>@depth@100ms`. Futures diffs carry `pu` (the
//! previous diff's `u`) and follow [`GapPolicy::Linked`]; spot diffs only
//! carry `U`/`u` and follow [`GapPolicy::Contiguous`].
//!
//! Canonical `BTC_USDT` maps to wire `BTCUSDT`; `BTC_USD_PERP` maps to the
//! delivery symbol `BTCUSD_PERP`. Tickers come from `<symbol>@ticker` and
//! surface as `24hrTicker` side-channel events.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::rest::RestClient;
use crate::config::{Config, MarketType, Venue};
use crate::error::Error;
use crate::orderbook::GapPolicy;
use crate::types::{BookSnapshot, DiffMessage, StreamEvent, SubscriptionIntent};

use super::{request_id, split_instrument, to_levels, VenueAdapter, WireLevel};

const DEPTH_SUFFIX: &str = "@depth@100ms";
const TICKER_SUFFIX: &str = "@ticker";

/// Outbound stream command
#[derive(Debug, Serialize)]
struct StreamCommand<'a> {
    method: &'a str,
    params: Vec<String>,
    id: u64,
}

/// `depthUpdate` event
#[derive(Debug, Deserialize)]
struct DepthEvent {
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "T", default)]
    transaction_time: Option<u64>,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "pu", default)]
    prev_final_update_id: Option<u64>,
    #[serde(rename = "b")]
    bids: Vec<WireLevel>,
    #[serde(rename = "a")]
    asks: Vec<WireLevel>,
}

/// REST depth response
#[derive(Debug, Deserialize)]
struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    #[serde(rename = "T", default)]
    transaction_time: Option<u64>,
    #[serde(rename = "E", default)]
    event_time: Option<u64>,
    bids: Vec<WireLevel>,
    asks: Vec<WireLevel>,
}

/// Adapter for one Binance market
#[derive(Debug)]
pub struct BinanceAdapter {
    market_type: MarketType,
    rest: RestClient,
    snapshot_limit: u32,
    /// Wire symbol -> canonical instrument, filled as instruments are used
    symbols: RwLock<FxHashMap<String, String>>,
}

impl BinanceAdapter {
    /// Create an adapter for the configured market
    pub fn new(config: &Config) -> Result<Self, Error> {
        Ok(Self {
            market_type: config.market_type(),
            rest: RestClient::new(config)?,
            snapshot_limit: config.snapshot_limit(),
            symbols: RwLock::new(FxHashMap::default()),
        })
    }

    fn depth_path(&self) -> &'static str {
        match self.market_type {
            MarketType::Spot => "/api/v3/depth",
            MarketType::LinearFutures => "/fapi/v1/depth",
            MarketType::DeliveryFutures => "/dapi/v1/depth",
        }
    }

    /// Wire symbol for a canonical instrument, remembering the mapping
    fn wire_symbol(&self, instrument: &str) -> Result<String, Error> {
        let parts = split_instrument(instrument)?;
        let mut symbol = format!("{}{}", parts[0], parts[1]);
        for suffix in &parts[2..] {
            symbol.push('_');
            symbol.push_str(suffix);
        }
        self.symbols
            .write()
            .entry(symbol.clone())
            .or_insert_with(|| parts.join("_"));
        Ok(symbol)
    }

    fn canonical(&self, symbol: &str) -> Result<String, Error> {
        self.symbols
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::Decode(format!("depth update for unknown symbol {}", symbol)))
    }

    fn stream_name(&self, instrument: &str, suffix: &str) -> Result<String, Error> {
        Ok(format!(
            "{}{}",
            self.wire_symbol(instrument)?.to_lowercase(),
            suffix
        ))
    }

    fn command(&self, method: &str, stream: String) -> Result<String, Error> {
        Ok(serde_json::to_string(&StreamCommand {
            method,
            params: vec![stream],
            id: request_id(),
        })?)
    }

    fn decode_depth(&self, event: DepthEvent) -> Result<StreamEvent, Error> {
        Ok(StreamEvent::Diff(DiffMessage {
            instrument: self.canonical(&event.symbol)?,
            first_seq: event.first_update_id,
            last_seq: event.final_update_id,
            prior_seq: match self.market_type {
                MarketType::Spot => None,
                _ => event.prev_final_update_id,
            },
            bids: to_levels(event.bids),
            asks: to_levels(event.asks),
            server_time: event.transaction_time.unwrap_or(event.event_time),
        }))
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn market_type(&self) -> MarketType {
        self.market_type
    }

    fn gap_policy(&self) -> GapPolicy {
        match self.market_type {
            MarketType::Spot => GapPolicy::Contiguous,
            MarketType::LinearFutures | MarketType::DeliveryFutures => GapPolicy::Linked,
        }
    }

    async fn fetch_snapshot(&self, instrument: &str) -> Result<BookSnapshot, Error> {
        let symbol = self.wire_symbol(instrument)?;
        let limit = self.snapshot_limit.to_string();
        let depth: DepthResponse = self
            .rest
            .get(self.depth_path(), &[("symbol", &symbol), ("limit", &limit)])
            .await?;

        Ok(BookSnapshot {
            asks: to_levels(depth.asks),
            bids: to_levels(depth.bids),
            sequence: depth.last_update_id,
            server_time: depth.transaction_time.or(depth.event_time).unwrap_or_default(),
        })
    }

    fn decode(&self, frame: &[u8]) -> Result<Option<StreamEvent>, Error> {
        let mut value: Value = serde_json::from_slice(frame)?;

        // combined-stream envelope: {"stream": .., "data": {..}}
        if let Some(data) = value.get_mut("data").map(Value::take) {
            value = data;
        }

        if let Some(event) = value.get("e").and_then(Value::as_str) {
            if event == "depthUpdate" {
                let depth: DepthEvent = serde_json::from_value(value)?;
                return self.decode_depth(depth).map(Some);
            }
            return Ok(Some(StreamEvent::Other {
                channel: event.to_string(),
                raw: String::from_utf8_lossy(frame).into_owned(),
            }));
        }

        if let Some(code) = value.get("code") {
            let msg = value.get("msg").and_then(Value::as_str).unwrap_or_default();
            return Err(Error::Decode(format!("stream error {}: {}", code, msg)));
        }

        if value.get("result").is_some() {
            return Ok(Some(StreamEvent::Ack {
                id: value.get("id").and_then(Value::as_u64),
                channel: None,
            }));
        }

        Ok(None)
    }

    fn encode_subscribe(&self, instrument: &str) -> Result<SubscriptionIntent, Error> {
        let stream = self.stream_name(instrument, DEPTH_SUFFIX)?;
        let payload = self.command("SUBSCRIBE", stream.clone())?;
        Ok(SubscriptionIntent::new("depth", vec![stream], payload))
    }

    fn encode_unsubscribe(&self, instrument: &str) -> Result<String, Error> {
        let stream = self.stream_name(instrument, DEPTH_SUFFIX)?;
        self.command("UNSUBSCRIBE", stream)
    }

    fn encode_ticker_subscribe(&self, instrument: &str) -> Result<SubscriptionIntent, Error> {
        let stream = self.stream_name(instrument, TICKER_SUFFIX)?;
        let payload = self.command("SUBSCRIBE", stream.clone())?;
        Ok(SubscriptionIntent::new("ticker", vec![stream], payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceLevel;
    use rust_decimal::Decimal;

    fn adapter(market_type: MarketType) -> BinanceAdapter {
        BinanceAdapter::new(&Config::new(Venue::Binance, market_type)).unwrap()
    }

    const FUTURES_DEPTH: &str = r#"{
        "e": "depthUpdate",
        "E": 1700000000123,
        "T": 1700000000120,
        "s": "BTCUSDT",
        "U": 157,
        "u": 160,
        "pu": 149,
        "b": [["36000.10", "0.5"], ["35999.90", "0"]],
        "a": [["36000.20", "1.25"]]
    }"#;

    #[test]
    fn test_subscribe_frame() {
        let adapter = adapter(MarketType::LinearFutures);
        let intent = adapter.encode_subscribe("btc_usdt").unwrap();

        assert_eq!(intent.channel, "depth");
        assert_eq!(intent.params, vec!["btcusdt@depth@100ms".to_string()]);
        assert!(!intent.replay);

        let frame: Value = serde_json::from_str(&intent.payload).unwrap();
        assert_eq!(frame["method"], "SUBSCRIBE");
        assert_eq!(frame["params"][0], "btcusdt@depth@100ms");
        assert!(frame["id"].is_u64());

        let unsub: Value =
            serde_json::from_str(&adapter.encode_unsubscribe("BTC_USDT").unwrap()).unwrap();
        assert_eq!(unsub["method"], "UNSUBSCRIBE");
    }

    #[test]
    fn test_decode_futures_depth() {
        let adapter = adapter(MarketType::LinearFutures);
        adapter.encode_subscribe("BTC_USDT").unwrap();

        let Some(StreamEvent::Diff(diff)) = adapter.decode(FUTURES_DEPTH.as_bytes()).unwrap() else {
            panic!("expected diff");
        };
        assert_eq!(diff.instrument, "BTC_USDT");
        assert_eq!((diff.first_seq, diff.last_seq), (157, 160));
        assert_eq!(diff.prior_seq, Some(149));
        assert_eq!(diff.server_time, 1700000000120);
        assert_eq!(
            diff.bids[0],
            PriceLevel::new(Decimal::new(3600010, 2), Decimal::new(5, 1))
        );
        assert!(diff.bids[1].is_removal());
        assert_eq!(diff.asks.len(), 1);
    }

    #[test]
    fn test_spot_ignores_prior_and_uses_contiguous() {
        let adapter = adapter(MarketType::Spot);
        adapter.encode_subscribe("BTC_USDT").unwrap();
        assert_eq!(adapter.gap_policy(), GapPolicy::Contiguous);

        let spot = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":5,"u":7,"b":[],"a":[]}"#;
        let Some(StreamEvent::Diff(diff)) = adapter.decode(spot.as_bytes()).unwrap() else {
            panic!("expected diff");
        };
        assert_eq!(diff.prior_seq, None);
        assert_eq!(diff.server_time, 1);
    }

    #[test]
    fn test_combined_stream_envelope() {
        let adapter = adapter(MarketType::LinearFutures);
        adapter.encode_subscribe("BTC_USDT").unwrap();

        let wrapped = format!(r#"{{"stream":"btcusdt@depth@100ms","data":{}}}"#, FUTURES_DEPTH);
        assert!(matches!(
            adapter.decode(wrapped.as_bytes()).unwrap(),
            Some(StreamEvent::Diff(_))
        ));
    }

    #[test]
    fn test_ticker_subscribe_frame() {
        let adapter = adapter(MarketType::LinearFutures);
        let intent = adapter.encode_ticker_subscribe("eth_usdt").unwrap();
        assert_eq!(intent.channel, "ticker");
        assert_eq!(intent.params, vec!["ethusdt@ticker".to_string()]);

        let frame: Value = serde_json::from_str(&intent.payload).unwrap();
        assert_eq!(frame["method"], "SUBSCRIBE");
        assert_eq!(frame["params"][0], "ethusdt@ticker");

        let depth = adapter.encode_subscribe("ETH_USDT").unwrap();
        assert!(!intent.same_subscription(&depth));

        let ticker = br#"{"e":"24hrTicker","E":1700000000123,"s":"ETHUSDT","c":"2000.10"}"#;
        assert!(matches!(
            adapter.decode(ticker).unwrap(),
            Some(StreamEvent::Other { channel, .. }) if channel == "24hrTicker"
        ));
    }

    #[test]
    fn test_decode_control_messages() {
        let adapter = adapter(MarketType::Spot);

        assert_eq!(
            adapter.decode(br#"{"result":null,"id":42}"#).unwrap(),
            Some(StreamEvent::Ack {
                id: Some(42),
                channel: None
            })
        );
        assert!(matches!(
            adapter.decode(br#"{"code":2,"msg":"Invalid request","id":1}"#),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            adapter.decode(br#"{"e":"aggTrade","s":"BTCUSDT"}"#).unwrap(),
            Some(StreamEvent::Other { channel, .. }) if channel == "aggTrade"
        ));
    }

    #[test]
    fn test_unknown_symbol_and_garbage() {
        let adapter = adapter(MarketType::LinearFutures);
        assert!(matches!(
            adapter.decode(FUTURES_DEPTH.as_bytes()),
            Err(Error::Decode(_))
        ));
        assert!(matches!(adapter.decode(b"not json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_delivery_symbol() {
        let adapter = adapter(MarketType::DeliveryFutures);
        let intent = adapter.encode_subscribe("BTC_USD_PERP").unwrap();
        assert_eq!(intent.params, vec!["btcusd_perp@depth@100ms".to_string()]);
        assert_eq!(adapter.canonical("BTCUSD_PERP").unwrap(), "BTC_USD_PERP");
        assert_eq!(adapter.depth_path(), "/dapi/v1/depth");
    }

    #[test]
    fn test_snapshot_response_shape() {
        let body = r#"{"lastUpdateId":1027024,"E":1589436922972,"T":1589436922959,
            "bids":[["4.00000000","431.00000000"]],"asks":[["4.00000200","12.00000000"]]}"#;
        let depth: DepthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(depth.last_update_id, 1027024);
        assert_eq!(depth.transaction_time, Some(1589436922959));
        assert_eq!(depth.bids.len(), 1);
    }
}
