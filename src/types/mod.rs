//! Venue-neutral data types.
//!
//! Everything in here is what the core works with after a venue adapter has
//! translated the wire format:
//!
//! - [`PriceLevel`] and [`BookSide`] - one level of one side of a book
//! - [`BookId`] - identity of a replica (venue, market type, instrument)
//! - [`messages`] - diffs, snapshots, stream events, subscription intents

pub mod messages;

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{MarketType, Venue};

pub use messages::{BookEvent, BookSnapshot, DiffMessage, StreamEvent, SubscriptionIntent};

/// Price as an exact decimal
///
/// Venues send prices as strings; keeping them as `Decimal` means two levels
/// compare equal exactly when the venue meant the same price.
pub type Price = Decimal;

/// Size (quantity) resting at a price level
pub type Size = Decimal;

/// Monotonic update id attached to snapshots and diffs
pub type Sequence = u64;

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = u64;

/// Current wall-clock time in milliseconds
pub fn now_ms() -> TimestampMs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as TimestampMs)
        .unwrap_or_default()
}

/// A single `(price, size)` level
///
/// A level with size zero does not exist in a book; a zero size in a diff or
/// snapshot means "remove this price".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price of the level
    pub price: Price,
    /// Total size resting at the price
    pub size: Size,
}

impl PriceLevel {
    /// Create a new level
    #[must_use]
    pub const fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }

    /// Whether this level means "remove" (size zero or negative)
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.size <= Decimal::ZERO
    }
}

impl From<(Price, Size)> for PriceLevel {
    fn from((price, size): (Price, Size)) -> Self {
        Self { price, size }
    }
}

/// Side of an order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    /// Sell side, best (lowest) price first
    Ask,
    /// Buy side, best (highest) price first
    Bid,
}

impl BookSide {
    /// Get the opposite side
    pub fn opposite(self) -> Self {
        match self {
            BookSide::Ask => BookSide::Bid,
            BookSide::Bid => BookSide::Ask,
        }
    }

    /// Order two prices so that the better price for this side sorts first
    #[inline]
    pub fn cmp_prices(self, a: &Price, b: &Price) -> Ordering {
        match self {
            BookSide::Ask => a.cmp(b),
            BookSide::Bid => b.cmp(a),
        }
    }
}

/// Identity of one order book replica
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookId {
    /// Exchange
    pub venue: Venue,
    /// Market type on that exchange
    pub market_type: MarketType,
    /// Canonical instrument symbol (`BASE_QUOTE`)
    pub instrument: String,
}

impl BookId {
    /// Create a book id, normalising the instrument to upper case
    pub fn new(venue: Venue, market_type: MarketType, instrument: impl AsRef<str>) -> Self {
        Self {
            venue,
            market_type,
            instrument: instrument.as_ref().to_uppercase(),
        }
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.venue.as_str(),
            self.market_type.as_str(),
            self.instrument
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_ordering() {
        let low = Decimal::from(99);
        let high = Decimal::from(100);
        assert_eq!(BookSide::Ask.cmp_prices(&low, &high), Ordering::Less);
        assert_eq!(BookSide::Bid.cmp_prices(&low, &high), Ordering::Greater);
        assert_eq!(BookSide::Bid.opposite(), BookSide::Ask);
    }

    #[test]
    fn test_removal_level() {
        assert!(PriceLevel::new(Decimal::from(100), Decimal::ZERO).is_removal());
        assert!(!PriceLevel::new(Decimal::from(100), Decimal::ONE).is_removal());
    }

    #[test]
    fn test_book_id_display() {
        let id = BookId::new(Venue::Binance, MarketType::LinearFutures, "btc_usdt");
        assert_eq!(id.to_string(), "binance_linear_BTC_USDT");
    }
}
