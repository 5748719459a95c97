//! Per-instrument synchronization between REST snapshots and stream diffs.
//!
//! A [`Reconciler`] is the only writer of its [`BookReplica`]. It primes the
//! book from a snapshot, opens the diff subscription, and from then on feeds
//! diffs to the replica in arrival order. When the replica reports a gap (or
//! has no snapshot, or the book was marked after diffs were dropped upstream)
//! it fetches a new snapshot and retries the diff that triggered it against
//! the fresh state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::websocket::StreamTransport;
use crate::error::Error;
use crate::types::{BookEvent, DiffMessage};
use crate::venue::VenueAdapter;

use super::sync::{ResyncReason, SyncCheck};
use super::{BookReplica, OrderbookManager};

/// Minimum pause between snapshot fetches after one failed
const RESYNC_COOLDOWN: Duration = Duration::from_secs(1);

/// What happened to one diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Applied to the replica
    Applied {
        /// This diff made the replica ready
        became_ready: bool,
    },
    /// Late or duplicate; dropped
    Stale,
    /// A fresh snapshot was applied; `applied` tells whether the diff was
    /// then applied on top of it
    Resynced {
        /// Whether the triggering diff fitted the new snapshot
        applied: bool,
    },
    /// A resync was needed but the snapshot fetch failed or is cooling down
    ResyncFailed,
}

/// Single writer for one instrument's replica
#[derive(Debug)]
pub struct Reconciler {
    instrument: String,
    replica: Arc<BookReplica>,
    adapter: Arc<dyn VenueAdapter>,
    books: Arc<OrderbookManager>,
    events: broadcast::Sender<BookEvent>,
    last_failed_fetch: Mutex<Option<Instant>>,
}

impl Reconciler {
    /// Create a reconciler for a replica tracked by `books`
    pub fn new(
        replica: Arc<BookReplica>,
        adapter: Arc<dyn VenueAdapter>,
        books: Arc<OrderbookManager>,
        events: broadcast::Sender<BookEvent>,
    ) -> Self {
        Self {
            instrument: replica.id().instrument,
            replica,
            adapter,
            books,
            events,
            last_failed_fetch: Mutex::new(None),
        }
    }

    /// Canonical instrument
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// The replica this reconciler writes
    pub fn replica(&self) -> &Arc<BookReplica> {
        &self.replica
    }

    /// Prime the book and open the diff subscription
    ///
    /// A failed snapshot is logged and left to the first diff to retry; the
    /// subscription is opened either way.
    ///
    /// # Errors
    ///
    /// Encoding or sending the subscribe request failed.
    pub async fn start(&self, transport: &StreamTransport) -> Result<(), Error> {
        if let Err(e) = self.resync().await {
            warn!(instrument = %self.instrument, error = %e, "initial snapshot failed");
        }
        let intent = self.adapter.encode_subscribe(&self.instrument)?;
        transport.subscribe(intent).await?;
        info!(instrument = %self.instrument, "diff subscription opened");
        Ok(())
    }

    /// Replace the book with a fresh snapshot
    ///
    /// On failure the replica is reset, so it reads as not ready rather than
    /// stale.
    ///
    /// # Errors
    ///
    /// Whatever the snapshot fetch returned.
    pub async fn resync(&self) -> Result<(), Error> {
        self.books.mark_needs_resync(&self.instrument);
        debug!(instrument = %self.instrument, "fetching snapshot");

        match self.adapter.fetch_snapshot(&self.instrument).await {
            Ok(snapshot) => {
                let sequence = snapshot.sequence;
                self.replica.apply_snapshot(&snapshot);
                self.books.clear_resync(&self.instrument);
                *self.last_failed_fetch.lock() = None;
                info!(
                    instrument = %self.instrument,
                    sequence,
                    asks = snapshot.asks.len(),
                    bids = snapshot.bids.len(),
                    "snapshot applied"
                );
                let _ = self.events.send(BookEvent::Resynced {
                    instrument: self.instrument.clone(),
                    sequence,
                });
                Ok(())
            }
            Err(e) => {
                self.replica.reset();
                *self.last_failed_fetch.lock() = Some(Instant::now());
                error!(instrument = %self.instrument, error = %e, "snapshot fetch failed");
                Err(e)
            }
        }
    }

    fn cooling_down(&self) -> bool {
        self.last_failed_fetch
            .lock()
            .is_some_and(|at| at.elapsed() < RESYNC_COOLDOWN)
    }

    /// Apply one diff, resyncing first if the sequence does not fit
    pub async fn handle_diff(&self, diff: &DiffMessage) -> DiffOutcome {
        let policy = self.adapter.gap_policy();
        let check = if self.replica.is_ready() && self.books.resync_pending(&self.instrument) {
            SyncCheck::Resync(ResyncReason::Overflow)
        } else {
            self.replica.apply_diff(diff, policy)
        };
        match check {
            SyncCheck::Apply { becomes_ready } => {
                self.applied(diff, becomes_ready);
                DiffOutcome::Applied {
                    became_ready: becomes_ready,
                }
            }
            SyncCheck::Stale => {
                debug!(
                    instrument = %self.instrument,
                    last_seq = diff.last_seq,
                    sequence = self.replica.last_sequence(),
                    "stale diff dropped"
                );
                DiffOutcome::Stale
            }
            SyncCheck::Resync(reason) => {
                if self.cooling_down() {
                    return DiffOutcome::ResyncFailed;
                }
                warn!(instrument = %self.instrument, %reason, "resynchronizing");
                if self.resync().await.is_err() {
                    return DiffOutcome::ResyncFailed;
                }

                // the diff that triggered the resync may already fit
                match self.replica.apply_diff(diff, policy) {
                    SyncCheck::Apply { becomes_ready } => {
                        self.applied(diff, becomes_ready);
                        DiffOutcome::Resynced { applied: true }
                    }
                    _ => DiffOutcome::Resynced { applied: false },
                }
            }
        }
    }

    fn applied(&self, diff: &DiffMessage, became_ready: bool) {
        if became_ready {
            info!(instrument = %self.instrument, sequence = diff.last_seq, "book ready");
        }
        let _ = self.events.send(BookEvent::Updated {
            instrument: self.instrument.clone(),
            sequence: diff.last_seq,
        });
    }

    /// Consume diffs until the queue closes or `cancel` fires
    pub async fn run(self, mut diffs: mpsc::Receiver<DiffMessage>, cancel: CancellationToken) {
        loop {
            let diff = tokio::select! {
                _ = cancel.cancelled() => break,
                diff = diffs.recv() => match diff {
                    Some(diff) => diff,
                    None => break,
                },
            };
            self.handle_diff(&diff).await;
        }
        debug!(instrument = %self.instrument, "reconciler stopped");
    }
}
