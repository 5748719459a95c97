//! Local order book replicas.
//!
//! - [`ledger`] - one sorted side of a book ([`PriceLedger`])
//! - [`book`] - the replica itself and its read snapshots
//! - [`sync`] - sequence rules deciding whether a diff fits
//! - [`reconciler`] - the per-instrument task keeping a replica in sync
//! - [`manager`] - every replica of one feed, keyed by instrument
//!
//! # Example
//!
//! ```rust
//! use exchange_feed::config::{MarketType, Venue};
//! use exchange_feed::orderbook::{BookReplica, GapPolicy, SyncCheck};
//! use exchange_feed::types::{BookId, BookSnapshot, DiffMessage, PriceLevel};
//! use rust_decimal::Decimal;
//!
//! let id = BookId::new(Venue::Binance, MarketType::Spot, "BTC_USDT");
//! let replica = BookReplica::new(id, 1000);
//!
//! replica.apply_snapshot(&BookSnapshot {
//!     asks: vec![PriceLevel::new(Decimal::from(101), Decimal::ONE)],
//!     bids: vec![PriceLevel::new(Decimal::from(99), Decimal::ONE)],
//!     sequence: 10,
//!     server_time: 0,
//! });
//! assert!(!replica.is_ready());
//!
//! let diff = DiffMessage {
//!     instrument: "BTC_USDT".into(),
//!     first_seq: 9,
//!     last_seq: 11,
//!     prior_seq: None,
//!     bids: vec![PriceLevel::new(Decimal::from(100), Decimal::TWO)],
//!     asks: vec![],
//!     server_time: 0,
//! };
//! let check = replica.apply_diff(&diff, GapPolicy::Contiguous);
//! assert_eq!(check, SyncCheck::Apply { becomes_ready: true });
//!
//! let book = replica.snapshot().unwrap();
//! assert_eq!(book.best_bid().unwrap().price, Decimal::from(100));
//! ```

pub mod book;
pub mod ledger;
pub mod manager;
pub mod reconciler;
pub mod sync;

pub use book::{BookReplica, DepthSnapshot, Orderbook};
pub use ledger::PriceLedger;
pub use manager::{OrderbookManager, OrderbookState};
pub use reconciler::{DiffOutcome, Reconciler};
pub use sync::{GapPolicy, ResyncReason, SyncCheck};
