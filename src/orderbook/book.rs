//! Order book replica.
//!
//! [`Orderbook`] is the plain state: two [`PriceLedger`]s plus the sequence
//! bookkeeping. [`BookReplica`] wraps it for sharing between the one task that
//! writes (the reconciler) and any number of readers.
//!
//! Readers never see the live ledgers. [`BookReplica::snapshot`] copies both
//! sides under the read lock into an immutable [`DepthSnapshot`], and keeps
//! that copy until the next write, so polling readers between updates share a
//! single allocation.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

use crate::error::Error;
use crate::types::{
    now_ms, BookId, BookSide, BookSnapshot, DiffMessage, Price, PriceLevel, Sequence, Size,
    TimestampMs,
};

use super::ledger::PriceLedger;
use super::sync::{GapPolicy, SyncCheck};

/// State of one instrument's book.
///
/// Not internally synchronized; see [`BookReplica`] for the shared version.
#[derive(Debug, Clone)]
pub struct Orderbook {
    id: BookId,

    /// Ask levels, lowest first
    asks: PriceLedger,

    /// Bid levels, highest first
    bids: PriceLedger,

    /// Last applied snapshot or diff id
    sequence: Sequence,

    /// A snapshot has been applied and the stream has caught up with it
    ready: bool,

    /// Venue time of the last applied message
    response_time: TimestampMs,

    /// Local time of the last write
    update_time: TimestampMs,

    /// Bumped on every write; keys the snapshot cache
    revision: u64,

    /// Levels kept per side after a snapshot
    max_depth: usize,
}

impl Orderbook {
    /// Create an empty, not-ready book
    #[must_use]
    pub fn new(id: BookId, max_depth: usize) -> Self {
        Self {
            id,
            asks: PriceLedger::new(BookSide::Ask),
            bids: PriceLedger::new(BookSide::Bid),
            sequence: 0,
            ready: false,
            response_time: 0,
            update_time: 0,
            revision: 0,
            max_depth,
        }
    }

    /// Book identity
    #[must_use]
    pub fn id(&self) -> &BookId {
        &self.id
    }

    /// Last applied sequence
    #[must_use]
    pub const fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Whether the book is authoritative
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Venue time of the last applied message
    #[must_use]
    pub const fn response_time(&self) -> TimestampMs {
        self.response_time
    }

    /// Local time of the last write
    #[must_use]
    pub const fn update_time(&self) -> TimestampMs {
        self.update_time
    }

    /// Write counter
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Ask ledger
    #[must_use]
    pub fn asks(&self) -> &PriceLedger {
        &self.asks
    }

    /// Bid ledger
    #[must_use]
    pub fn bids(&self) -> &PriceLedger {
        &self.bids
    }

    /// Replace both sides with a snapshot
    ///
    /// The book becomes not-ready at the snapshot's sequence; a later diff
    /// that catches up with it makes it ready again.
    pub fn apply_snapshot(&mut self, snapshot: &BookSnapshot) {
        self.ready = false;

        self.asks.replace_unsorted(snapshot.asks.iter().copied());
        self.bids.replace_unsorted(snapshot.bids.iter().copied());
        self.asks.truncate(self.max_depth);
        self.bids.truncate(self.max_depth);

        self.sequence = snapshot.sequence;
        self.response_time = snapshot.server_time;
        self.touch();
    }

    /// Check a diff against the current sequence and apply it if it fits
    ///
    /// Returns the check that was made. Only [`SyncCheck::Apply`] changes
    /// the book; a resync verdict is left for the caller to act on.
    pub fn apply_diff(&mut self, diff: &DiffMessage, policy: GapPolicy) -> SyncCheck {
        let check = policy.check(self.ready, self.sequence, diff);
        if let SyncCheck::Apply { becomes_ready } = check {
            for level in &diff.bids {
                self.bids.update(level.price, level.size);
            }
            for level in &diff.asks {
                self.asks.update(level.price, level.size);
            }
            self.sequence = diff.last_seq;
            self.response_time = diff.server_time;
            if becomes_ready {
                self.ready = true;
            }
            self.touch();
        }
        check
    }

    /// Drop all state; the book waits for a new snapshot
    pub fn reset(&mut self) {
        self.asks.clear();
        self.bids.clear();
        self.sequence = 0;
        self.ready = false;
        self.touch();
    }

    /// Best ask level
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.best()
    }

    /// Best bid level
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.best()
    }

    /// Copy both sides into an immutable snapshot
    #[must_use]
    pub fn depth_snapshot(&self) -> DepthSnapshot {
        DepthSnapshot {
            id: self.id.clone(),
            asks: self.asks.levels().to_vec(),
            bids: self.bids.levels().to_vec(),
            sequence: self.sequence,
            server_time: self.response_time,
            local_time: self.update_time,
            revision: self.revision,
        }
    }

    fn touch(&mut self) {
        self.update_time = now_ms();
        self.revision = self.revision.wrapping_add(1);
        debug_assert!(self.asks.is_well_formed() && self.bids.is_well_formed());
    }
}

/// Immutable copy of a book at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthSnapshot {
    /// Book identity
    pub id: BookId,
    /// Ask levels, lowest first
    pub asks: Vec<PriceLevel>,
    /// Bid levels, highest first
    pub bids: Vec<PriceLevel>,
    /// Sequence the copy reflects
    pub sequence: Sequence,
    /// Venue time of the last applied message
    pub server_time: TimestampMs,
    /// Local time of the last write
    pub local_time: TimestampMs,
    /// Write counter the copy was taken at
    pub revision: u64,
}

impl DepthSnapshot {
    /// Best ask level
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Best bid level
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    /// Average of best bid and best ask
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Best ask minus best bid
    #[must_use]
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Check if the book is crossed (best bid >= best ask)
    ///
    /// This shouldn't happen in a healthy book but is useful for validation.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    /// Get the top N ask levels
    #[must_use]
    pub fn top_asks(&self, n: usize) -> &[PriceLevel] {
        &self.asks[..n.min(self.asks.len())]
    }

    /// Get the top N bid levels
    #[must_use]
    pub fn top_bids(&self, n: usize) -> &[PriceLevel] {
        &self.bids[..n.min(self.bids.len())]
    }

    /// Total ask size
    #[must_use]
    pub fn total_ask_size(&self) -> Size {
        self.asks.iter().map(|l| l.size).sum()
    }

    /// Total bid size
    #[must_use]
    pub fn total_bid_size(&self) -> Size {
        self.bids.iter().map(|l| l.size).sum()
    }
}

/// Shared, lock-guarded replica of one instrument's book.
///
/// One writer at a time holds the write lock for the duration of a single
/// snapshot or diff. Reads copy under the read lock, so every reader sees a
/// book either before or after a given diff, never in between.
///
/// All reads fail with [`Error::NotReady`] until the stream has caught up
/// with a snapshot.
#[derive(Debug)]
pub struct BookReplica {
    book: RwLock<Orderbook>,
    cache: Mutex<Option<Arc<DepthSnapshot>>>,
}

impl BookReplica {
    /// Create an empty, not-ready replica
    #[must_use]
    pub fn new(id: BookId, max_depth: usize) -> Self {
        Self {
            book: RwLock::new(Orderbook::new(id, max_depth)),
            cache: Mutex::new(None),
        }
    }

    /// Book identity
    #[must_use]
    pub fn id(&self) -> BookId {
        self.book.read().id().clone()
    }

    /// Replace the book with a snapshot (marks it not ready)
    pub fn apply_snapshot(&self, snapshot: &BookSnapshot) {
        self.book.write().apply_snapshot(snapshot);
    }

    /// Check and, if it fits, apply a diff as one atomic write
    pub fn apply_diff(&self, diff: &DiffMessage, policy: GapPolicy) -> SyncCheck {
        self.book.write().apply_diff(diff, policy)
    }

    /// Drop all state until the next snapshot
    pub fn reset(&self) {
        self.book.write().reset();
    }

    /// Whether the book is authoritative
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.book.read().is_ready()
    }

    /// Last applied sequence
    #[must_use]
    pub fn last_sequence(&self) -> Sequence {
        self.book.read().sequence()
    }

    /// Venue time of the last applied message
    #[must_use]
    pub fn last_response_time(&self) -> TimestampMs {
        self.book.read().response_time()
    }

    /// Local time of the last write
    #[must_use]
    pub fn last_update_time(&self) -> TimestampMs {
        self.book.read().update_time()
    }

    /// Consistent copy of both sides
    ///
    /// Repeated calls between writes return the same `Arc`.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] while the book is not authoritative.
    pub fn snapshot(&self) -> Result<Arc<DepthSnapshot>, Error> {
        let book = self.book.read();
        if !book.is_ready() {
            return Err(Error::NotReady(book.id().to_string()));
        }

        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.revision == book.revision() {
                return Ok(Arc::clone(cached));
            }
        }
        let fresh = Arc::new(book.depth_snapshot());
        *cache = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Best ask, or `None` if the ask side is empty
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] while the book is not authoritative.
    pub fn best_ask(&self) -> Result<Option<PriceLevel>, Error> {
        let book = self.book.read();
        if !book.is_ready() {
            return Err(Error::NotReady(book.id().to_string()));
        }
        Ok(book.best_ask())
    }

    /// Best bid, or `None` if the bid side is empty
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] while the book is not authoritative.
    pub fn best_bid(&self) -> Result<Option<PriceLevel>, Error> {
        let book = self.book.read();
        if !book.is_ready() {
            return Err(Error::NotReady(book.id().to_string()));
        }
        Ok(book.best_bid())
    }
}
