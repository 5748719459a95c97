//! Sorted price ledger for one side of a book.
//!
//! Levels live in a contiguous `Vec` ordered best-first, so the best price is
//! always index 0 and depth queries are plain slices. Lookups are binary
//! searches in the side's direction:
//!
//! - asks ascending (lowest first)
//! - bids descending (highest first)
//!
//! The ledger does no locking. [`BookReplica`](super::BookReplica) owns two of
//! them behind its lock.

use crate::types::{BookSide, Price, PriceLevel, Size};

/// One side of an order book, best price first.
///
/// Invariant: sorted in the side's direction, unique prices, no zero sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLedger {
    side: BookSide,
    levels: Vec<PriceLevel>,
}

impl PriceLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new(side: BookSide) -> Self {
        Self {
            side,
            levels: Vec::new(),
        }
    }

    /// Build a ledger from levels in arbitrary order
    ///
    /// Duplicate prices keep the last occurrence; removal levels are dropped.
    #[must_use]
    pub fn from_levels(side: BookSide, levels: impl IntoIterator<Item = PriceLevel>) -> Self {
        let mut ledger = Self {
            side,
            levels: levels.into_iter().collect(),
        };
        ledger.full_resort();
        ledger
    }

    /// Side this ledger belongs to
    #[must_use]
    pub fn side(&self) -> BookSide {
        self.side
    }

    /// Number of levels
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the ledger holds no levels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Best level (index 0)
    #[inline]
    #[must_use]
    pub fn best(&self) -> Option<PriceLevel> {
        self.levels.first().copied()
    }

    /// All levels, best first
    #[must_use]
    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    /// Best `n` levels
    #[must_use]
    pub fn top(&self, n: usize) -> &[PriceLevel] {
        &self.levels[..n.min(self.levels.len())]
    }

    /// Size resting at `price`, if the level exists
    #[must_use]
    pub fn get(&self, price: &Price) -> Option<Size> {
        self.position(price).ok().map(|i| self.levels[i].size)
    }

    /// Sum of all sizes on this side
    #[must_use]
    pub fn total_size(&self) -> Size {
        self.levels.iter().map(|l| l.size).sum()
    }

    #[inline]
    fn position(&self, price: &Price) -> Result<usize, usize> {
        let side = self.side;
        self.levels
            .binary_search_by(|level| side.cmp_prices(&level.price, price))
    }

    /// Insert a level at its sorted position
    ///
    /// If the price already exists its size is overwritten; a removal size
    /// deletes the level instead.
    pub fn insert(&mut self, price: Price, size: Size) {
        let level = PriceLevel::new(price, size);
        if level.is_removal() {
            self.delete(&price);
            return;
        }
        match self.position(&price) {
            Ok(i) => self.levels[i].size = size,
            Err(i) => self.levels.insert(i, level),
        }
    }

    /// Apply one change from a diff
    ///
    /// Size zero removes the level (no-op if absent). Otherwise the size is
    /// set in place, or the level inserted if the price is new.
    pub fn update(&mut self, price: Price, size: Size) {
        self.insert(price, size);
    }

    /// Remove the level at `price`, returning it if it existed
    pub fn delete(&mut self, price: &Price) -> Option<PriceLevel> {
        match self.position(price) {
            Ok(i) => Some(self.levels.remove(i)),
            Err(_) => None,
        }
    }

    /// Replace the contents with an unsorted working set and re-sort it
    pub fn replace_unsorted(&mut self, levels: impl IntoIterator<Item = PriceLevel>) {
        self.levels.clear();
        self.levels.extend(levels);
        self.full_resort();
    }

    /// Sort the whole ledger and restore the invariant
    ///
    /// Used after bulk ingestion. Equal prices keep the last occurrence, and
    /// levels with a removal size are dropped.
    pub fn full_resort(&mut self) {
        let side = self.side;
        // stable, so duplicates stay in arrival order
        self.levels.sort_by(|a, b| side.cmp_prices(&a.price, &b.price));

        let mut write = 0;
        for read in 0..self.levels.len() {
            let level = self.levels[read];
            if write > 0 && self.levels[write - 1].price == level.price {
                self.levels[write - 1] = level;
            } else {
                self.levels[write] = level;
                write += 1;
            }
        }
        self.levels.truncate(write);
        self.levels.retain(|l| !l.is_removal());
    }

    /// Keep only the best `n` levels
    pub fn truncate(&mut self, n: usize) {
        self.levels.truncate(n);
    }

    /// Remove every level
    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Check the ledger invariant
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let side = self.side;
        self.levels.iter().all(|l| !l.is_removal())
            && self
                .levels
                .windows(2)
                .all(|w| side.cmp_prices(&w[0].price, &w[1].price).is_lt())
    }
}
