//! Registry of the replicas fed by one connection.
//!
//! This module provides [`OrderbookManager`], a thread-safe map from
//! instrument to [`BookReplica`]. Reconcilers write through the replicas they
//! are handed; strategy code looks books up here by instrument.
//!
//! # State tracking
//!
//! Each entry reports an [`OrderbookState`]. A reconciler marks its book as
//! needing a resync when it detects a gap and clears the mark once a fresh
//! snapshot is in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{BookId, Price, PriceLevel};

use super::{BookReplica, DepthSnapshot};

/// State of an orderbook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderbookState {
    /// Orderbook is ready and receiving updates
    Synchronized,
    /// A gap was detected and a resync is in progress
    NeedsResync,
    /// Waiting for a snapshot, or for the stream to catch up with one
    WaitingForSnapshot,
}

#[derive(Debug)]
struct OrderbookEntry {
    replica: Arc<BookReplica>,
    resync_pending: AtomicBool,
}

/// Thread-safe registry of replicas keyed by canonical instrument.
///
/// # Example
///
/// ```rust
/// use exchange_feed::config::{MarketType, Venue};
/// use exchange_feed::orderbook::{OrderbookManager, OrderbookState};
/// use exchange_feed::types::BookId;
///
/// let manager = OrderbookManager::new(500);
/// manager.add_market(BookId::new(Venue::Gate, MarketType::Spot, "BTC_USDT"));
///
/// assert_eq!(
///     manager.get_state("BTC_USDT"),
///     Some(OrderbookState::WaitingForSnapshot)
/// );
/// assert!(manager.best_bid("BTC_USDT").is_none());
/// ```
#[derive(Debug)]
pub struct OrderbookManager {
    books: RwLock<FxHashMap<String, OrderbookEntry>>,
    max_depth: usize,
}

impl OrderbookManager {
    /// Create an empty manager; new replicas keep `max_depth` levels per side
    pub fn new(max_depth: usize) -> Self {
        Self {
            books: RwLock::new(FxHashMap::default()),
            max_depth,
        }
    }

    /// Track a book, returning its replica
    ///
    /// If the instrument is already tracked the existing replica is returned.
    pub fn add_market(&self, id: BookId) -> Arc<BookReplica> {
        let mut books = self.books.write();
        let entry = books
            .entry(id.instrument.clone())
            .or_insert_with(|| OrderbookEntry {
                replica: Arc::new(BookReplica::new(id, self.max_depth)),
                resync_pending: AtomicBool::new(false),
            });
        Arc::clone(&entry.replica)
    }

    /// Stop tracking a book
    pub fn remove_market(&self, instrument: &str) -> Option<Arc<BookReplica>> {
        self.books.write().remove(instrument).map(|e| e.replica)
    }

    /// Get the replica for an instrument
    pub fn get(&self, instrument: &str) -> Option<Arc<BookReplica>> {
        self.books
            .read()
            .get(instrument)
            .map(|e| Arc::clone(&e.replica))
    }

    /// Get the state of an orderbook
    pub fn get_state(&self, instrument: &str) -> Option<OrderbookState> {
        self.books.read().get(instrument).map(Self::state_of)
    }

    fn state_of(entry: &OrderbookEntry) -> OrderbookState {
        if entry.resync_pending.load(Ordering::Acquire) {
            OrderbookState::NeedsResync
        } else if entry.replica.is_ready() {
            OrderbookState::Synchronized
        } else {
            OrderbookState::WaitingForSnapshot
        }
    }

    /// Get all instruments whose book is not usable right now
    pub fn markets_needing_resync(&self) -> Vec<String> {
        self.books
            .read()
            .iter()
            .filter(|(_, entry)| Self::state_of(entry) != OrderbookState::Synchronized)
            .map(|(instrument, _)| instrument.clone())
            .collect()
    }

    /// Whether an orderbook is marked for resync
    pub fn resync_pending(&self, instrument: &str) -> bool {
        self.books
            .read()
            .get(instrument)
            .is_some_and(|entry| entry.resync_pending.load(Ordering::Acquire))
    }

    /// Mark an orderbook as needing resync
    pub fn mark_needs_resync(&self, instrument: &str) {
        if let Some(entry) = self.books.read().get(instrument) {
            entry.resync_pending.store(true, Ordering::Release);
        }
    }

    /// Clear the resync mark after a fresh snapshot
    pub fn clear_resync(&self, instrument: &str) {
        if let Some(entry) = self.books.read().get(instrument) {
            entry.resync_pending.store(false, Ordering::Release);
        }
    }

    /// Consistent copy of a book, if tracked and ready
    pub fn snapshot(&self, instrument: &str) -> Option<Arc<DepthSnapshot>> {
        self.get(instrument).and_then(|r| r.snapshot().ok())
    }

    /// Get best bid for an instrument
    pub fn best_bid(&self, instrument: &str) -> Option<PriceLevel> {
        self.get(instrument).and_then(|r| r.best_bid().ok().flatten())
    }

    /// Get best ask for an instrument
    pub fn best_ask(&self, instrument: &str) -> Option<PriceLevel> {
        self.get(instrument).and_then(|r| r.best_ask().ok().flatten())
    }

    /// Get mid price for an instrument
    pub fn mid_price(&self, instrument: &str) -> Option<Price> {
        self.snapshot(instrument).and_then(|s| s.mid_price())
    }

    /// Get spread for an instrument
    pub fn spread(&self, instrument: &str) -> Option<Price> {
        self.snapshot(instrument).and_then(|s| s.spread())
    }

    /// Remove every book
    pub fn clear(&self) {
        self.books.write().clear();
    }

    /// Get number of tracked books
    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    /// Check if manager has no books
    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    /// Get all tracked instruments
    pub fn instruments(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}
